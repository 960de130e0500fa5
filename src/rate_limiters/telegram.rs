use log::debug;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::sleep;

/// spaces out outgoing telegram sends to a fixed rate
#[derive(Clone)]
pub struct TelegramRateLimiter {
    min_interval: Duration,
    last_send: Arc<Mutex<Option<Instant>>>,
}

impl TelegramRateLimiter {
    /// `messages_per_second` must be positive; non-positive values disable pacing
    pub fn new(messages_per_second: f64) -> Self {
        let min_interval = if messages_per_second > 0.0 {
            Duration::from_secs_f64(1.0 / messages_per_second)
        } else {
            Duration::ZERO
        };
        Self {
            min_interval,
            last_send: Arc::new(Mutex::new(None)),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// waits until the next send is allowed and claims the slot
    pub async fn wait_for_send(&self) {
        let mut last_send = self.last_send.lock().await;

        if let Some(last_time) = *last_send {
            let elapsed = last_time.elapsed();
            if elapsed < self.min_interval {
                let wait_time = self.min_interval - elapsed;
                debug!("Rate limiting send: waiting {}ms", wait_time.as_millis());
                sleep(wait_time).await;
            }
        }

        *last_send = Some(Instant::now());
    }
}
