pub mod telegram;

pub use telegram::TelegramRateLimiter;
