use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use log::{error, info, warn};
use std::collections::HashMap;
use std::error::Error;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use teloxide::payloads::SendMessage;
use teloxide::prelude::*;
use teloxide::requests::JsonRequest;
use teloxide::types::{MessageId, ParseMode};
use teloxide::{ApiError, RequestError};
use tokio::sync::Mutex;

use crate::config::get_readable_time;
use crate::rate_limiters::telegram::TelegramRateLimiter;
use crate::utils::message_formatter::{MessageFormatter, TELEGRAM_MESSAGE_LIMIT};

pub const CONFIRM_TIMEOUT: Duration = Duration::from_secs(30);
pub const PROMPT_TIMEOUT: Duration = Duration::from_secs(60);
const PREVIEW_CHARS: usize = 200;
const MAX_ID_ATTEMPTS: u32 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// bot blocked or account deactivated
    Blocked,
    /// chat or user does not exist
    Invalid,
    /// telegram asked us to wait before retrying
    Flood(Duration),
    Other(String),
}

impl DeliveryError {
    pub fn from_request_error(err: &RequestError) -> Self {
        match err {
            RequestError::Api(ApiError::BotBlocked)
            | RequestError::Api(ApiError::UserDeactivated)
            | RequestError::Api(ApiError::BotKicked) => DeliveryError::Blocked,
            RequestError::Api(ApiError::ChatNotFound) | RequestError::Api(ApiError::UserNotFound) => {
                DeliveryError::Invalid
            }
            RequestError::RetryAfter(seconds) => DeliveryError::Flood(seconds.duration()),
            other => DeliveryError::Other(other.to_string()),
        }
    }

    /// key used in the error breakdown
    pub fn kind(&self) -> &'static str {
        match self {
            DeliveryError::Blocked => "blocked",
            DeliveryError::Invalid => "invalid",
            DeliveryError::Flood(_) => "flood_retry_failed",
            DeliveryError::Other(_) => "other",
        }
    }
}

/// where broadcast messages and progress reports go
pub trait BroadcastTransport: Send + Sync {
    fn deliver(&self, chat_id: i64, text: &str) -> impl Future<Output = Result<(), DeliveryError>> + Send;

    fn report_progress(&self, text: &str) -> impl Future<Output = ()> + Send;
}

/// sends through the bot; progress edits a single status message in the admin chat
pub struct TelegramTransport {
    bot: Arc<Bot>,
    admin_chat: Option<ChatId>,
    status_message: Mutex<Option<MessageId>>,
}

impl TelegramTransport {
    pub fn new(bot: Arc<Bot>, admin_chat: Option<ChatId>) -> Self {
        Self {
            bot,
            admin_chat,
            status_message: Mutex::new(None),
        }
    }

    /// broadcast text is sent as typed, without markup parsing
    fn message_request(&self, chat_id: i64, text: &str) -> JsonRequest<SendMessage> {
        self.bot.send_message(ChatId(chat_id), text)
    }
}

impl BroadcastTransport for TelegramTransport {
    async fn deliver(&self, chat_id: i64, text: &str) -> Result<(), DeliveryError> {
        self.message_request(chat_id, text)
            .await
            .map(|_| ())
            .map_err(|e| DeliveryError::from_request_error(&e))
    }

    async fn report_progress(&self, text: &str) {
        let Some(chat_id) = self.admin_chat else {
            info!("{}", text.replace("<b>", "").replace("</b>", ""));
            return;
        };

        let mut status = self.status_message.lock().await;
        if let Some(message_id) = *status {
            match self
                .bot
                .edit_message_text(chat_id, message_id, text)
                .parse_mode(ParseMode::Html)
                .await
            {
                Ok(_) => return,
                Err(e) => warn!("Progress update failed, sending a new message: {}", e),
            }
        }
        match self
            .bot
            .send_message(chat_id, text)
            .parse_mode(ParseMode::Html)
            .await
        {
            Ok(sent) => *status = Some(sent.id),
            Err(e) => error!("Failed to send broadcast progress: {}", e),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BroadcastSummary {
    pub total: usize,
    pub sent: usize,
    pub failed: usize,
    pub errors: HashMap<String, usize>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_secs: f64,
}

impl BroadcastSummary {
    /// (kind, count) with the most frequent first
    pub fn error_breakdown(&self) -> Vec<(&str, usize)> {
        let mut breakdown: Vec<(&str, usize)> = self.errors.iter().map(|(k, v)| (k.as_str(), *v)).collect();
        breakdown.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        breakdown
    }

    pub fn broadcast_id(&self) -> String {
        broadcast_id(self.started_at)
    }
}

pub fn broadcast_id(started_at: DateTime<Utc>) -> String {
    format!("bc_{}", started_at.format("%Y%m%d_%H%M%S"))
}

/// `bc_..` first, then `bc_.._2`, `bc_.._3` for runs started in the same second
pub fn broadcast_id_candidate(base: &str, attempt: u32) -> String {
    if attempt <= 1 {
        base.to_string()
    } else {
        format!("{}_{}", base, attempt)
    }
}

/// rejects empty text and text over the telegram message limit
pub fn validate_message(text: &str) -> Result<(), String> {
    let length = text.chars().count();
    if text.trim().is_empty() {
        return Err("Broadcast message is empty.".to_string());
    }
    if length > TELEGRAM_MESSAGE_LIMIT {
        return Err(format!(
            "<b>Message Too Long</b>\n\nMaximum length: {} characters\nYour message: {} characters",
            TELEGRAM_MESSAGE_LIMIT, length
        ));
    }
    Ok(())
}

pub fn format_confirmation(recipients: usize, text: &str) -> String {
    format!(
        "<b>Broadcast Confirmation</b>\n\n\
         <b>Recipients:</b> {} users\n\
         <b>Message Preview:</b>\n{}\n\n\
         This will send the message to all eligible users.\n\n\
         Reply <b>YES</b> to confirm or <b>NO</b> to cancel.\n\
         <b>Timeout:</b> {} seconds",
        MessageFormatter::format_number(recipients as i64),
        MessageFormatter::escape_html(&MessageFormatter::truncate(text, PREVIEW_CHARS)),
        CONFIRM_TIMEOUT.as_secs()
    )
}

pub fn format_progress(total: usize, sent: usize, failed: usize, elapsed: f64, remaining: f64) -> String {
    let n = |v: usize| MessageFormatter::format_number(v as i64);
    let pct = |v: usize| MessageFormatter::percentage(v as i64, total as i64);
    let processed = sent + failed;
    let remaining = if remaining > 0.0 {
        get_readable_time(remaining)
    } else {
        "calculating...".to_string()
    };
    format!(
        "<b>BROADCAST IN PROGRESS</b>\n\n\
         <b>Total Users:</b> {}\n\
         <b>Sent:</b> {} ({:.1}%)\n\
         <b>Failed:</b> {} ({:.1}%)\n\
         <b>Progress:</b> {}/{} ({:.1}%)\n\
         <b>Elapsed:</b> {}\n\
         <b>Remaining:</b> {}",
        n(total),
        n(sent),
        pct(sent),
        n(failed),
        pct(failed),
        n(processed),
        n(total),
        pct(processed),
        get_readable_time(elapsed),
        remaining
    )
}

pub fn format_summary(summary: &BroadcastSummary, admin_id: Option<i64>) -> String {
    let n = |v: usize| MessageFormatter::format_number(v as i64);
    let mut lines = vec![
        "<b>BROADCAST COMPLETED</b>".to_string(),
        String::new(),
        format!("<b>Total Users:</b> {}", n(summary.total)),
        format!(
            "<b>Successfully Sent:</b> {} ({:.1}%)",
            n(summary.sent),
            MessageFormatter::percentage(summary.sent as i64, summary.total as i64)
        ),
        format!(
            "<b>Failed:</b> {} ({:.1}%)",
            n(summary.failed),
            MessageFormatter::percentage(summary.failed as i64, summary.total as i64)
        ),
        String::new(),
    ];

    let breakdown = summary.error_breakdown();
    if !breakdown.is_empty() {
        lines.push("<b>Error Breakdown:</b>".to_string());
        for (kind, count) in breakdown {
            lines.push(format!(
                "• {}: {} ({:.1}%)",
                kind,
                count,
                MessageFormatter::percentage(count as i64, summary.failed as i64)
            ));
        }
        lines.push(String::new());
    }

    lines.push(format!("<b>Total Time:</b> {}", get_readable_time(summary.duration_secs)));
    lines.push(format!(
        "<b>Completed:</b> {}",
        summary.completed_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    if let Some(admin_id) = admin_id {
        lines.push(format!("<b>By:</b> Admin (ID: {})", admin_id));
    }
    lines.join("\n")
}

pub struct BroadcastEngine {
    pacer: TelegramRateLimiter,
    progress_interval: usize,
}

impl BroadcastEngine {
    pub fn new(messages_per_second: f64, progress_interval: usize) -> Self {
        Self {
            pacer: TelegramRateLimiter::new(messages_per_second),
            progress_interval: progress_interval.max(1),
        }
    }

    /// one delivery, waiting out a flood limit and retrying once
    async fn deliver_one<T: BroadcastTransport>(transport: &T, chat_id: i64, text: &str) -> Result<(), DeliveryError> {
        match transport.deliver(chat_id, text).await {
            Err(DeliveryError::Flood(wait)) => {
                warn!("Flood wait of {:?} while broadcasting to {}", wait, chat_id);
                tokio::time::sleep(wait).await;
                transport.deliver(chat_id, text).await.map_err(|e| match e {
                    DeliveryError::Other(_) | DeliveryError::Flood(_) => DeliveryError::Flood(wait),
                    classified => classified,
                })
            }
            result => result,
        }
    }

    /// sends `text` to every recipient in order; failures are counted, never fatal
    pub async fn run<T: BroadcastTransport>(&self, transport: &T, recipients: &[i64], text: &str) -> BroadcastSummary {
        let started_at = Utc::now();
        let clock = Instant::now();
        let total = recipients.len();
        let mut sent = 0;
        let mut failed = 0;
        let mut errors: HashMap<String, usize> = HashMap::new();

        transport.report_progress(&format_progress(total, 0, 0, 0.0, 0.0)).await;

        for (idx, &chat_id) in recipients.iter().enumerate() {
            self.pacer.wait_for_send().await;

            match Self::deliver_one(transport, chat_id, text).await {
                Ok(()) => sent += 1,
                Err(e) => {
                    if let DeliveryError::Other(message) = &e {
                        warn!("Broadcast to {} failed: {}", chat_id, message);
                    }
                    failed += 1;
                    *errors.entry(e.kind().to_string()).or_insert(0) += 1;
                }
            }

            let processed = idx + 1;
            if processed % self.progress_interval == 0 || processed == total {
                let elapsed = clock.elapsed().as_secs_f64();
                let rate = if elapsed > 0.0 { processed as f64 / elapsed } else { 0.0 };
                let remaining = if rate > 0.0 {
                    (total - processed) as f64 / rate
                } else {
                    0.0
                };
                transport
                    .report_progress(&format_progress(total, sent, failed, elapsed, remaining))
                    .await;
            }
        }

        let summary = BroadcastSummary {
            total,
            sent,
            failed,
            errors,
            started_at,
            completed_at: Utc::now(),
            duration_secs: clock.elapsed().as_secs_f64(),
        };
        info!(
            "Broadcast {} finished: {}/{} sent, {} failed",
            summary.broadcast_id(),
            sent,
            total,
            failed
        );
        summary
    }
}

/// writes the audit row for a finished broadcast
pub async fn record_broadcast(
    pool: &Pool,
    admin_id: i64,
    admin_username: Option<&str>,
    message_text: &str,
    summary: &BroadcastSummary,
) -> Result<String, Box<dyn Error + Send + Sync>> {
    let base_id = summary.broadcast_id();
    let breakdown = serde_json::to_value(&summary.errors)?;
    let client = pool.get().await?;
    for attempt in 1..=MAX_ID_ATTEMPTS {
        let broadcast_id = broadcast_id_candidate(&base_id, attempt);
        let inserted = client
            .execute(
                "INSERT INTO broadcasts (broadcast_id, admin_id, admin_username, message_text, total_users,
                    sent_count, failed_count, error_breakdown, started_at, completed_at, duration_seconds, status)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, 'completed')
                 ON CONFLICT (broadcast_id) DO NOTHING",
                &[
                    &broadcast_id,
                    &admin_id,
                    &admin_username,
                    &message_text,
                    &(summary.total as i32),
                    &(summary.sent as i32),
                    &(summary.failed as i32),
                    &breakdown,
                    &summary.started_at,
                    &summary.completed_at,
                    &summary.duration_secs,
                ],
            )
            .await?;
        if inserted == 1 {
            info!("Logged broadcast {}", broadcast_id);
            return Ok(broadcast_id);
        }
        warn!("Broadcast id {} already taken", broadcast_id);
    }
    Err(format!(
        "no free broadcast id after {} attempts for {}",
        MAX_ID_ATTEMPTS, base_id
    )
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct MockTransport {
        failures: HashMap<i64, Vec<DeliveryError>>,
        attempts: StdMutex<Vec<i64>>,
        delivered: StdMutex<Vec<i64>>,
        texts: StdMutex<Vec<String>>,
        progress: StdMutex<Vec<String>>,
    }

    impl MockTransport {
        fn failing(failures: Vec<(i64, Vec<DeliveryError>)>) -> Self {
            Self {
                failures: failures.into_iter().collect(),
                ..Default::default()
            }
        }
    }

    impl BroadcastTransport for MockTransport {
        async fn deliver(&self, chat_id: i64, text: &str) -> Result<(), DeliveryError> {
            self.texts.lock().unwrap().push(text.to_string());
            let attempt = {
                let mut attempts = self.attempts.lock().unwrap();
                attempts.push(chat_id);
                attempts.iter().filter(|id| **id == chat_id).count()
            };
            match self.failures.get(&chat_id).and_then(|f| f.get(attempt - 1)) {
                Some(err) => Err(err.clone()),
                None => {
                    self.delivered.lock().unwrap().push(chat_id);
                    Ok(())
                }
            }
        }

        async fn report_progress(&self, text: &str) {
            self.progress.lock().unwrap().push(text.to_string());
        }
    }

    #[tokio::test]
    async fn test_broadcast_counts_and_classifies() {
        let flood = DeliveryError::Flood(Duration::from_millis(1));
        let transport = MockTransport::failing(vec![
            (2, vec![DeliveryError::Blocked]),
            (3, vec![DeliveryError::Invalid]),
            (4, vec![flood.clone()]),
            (5, vec![flood.clone(), flood.clone()]),
            (6, vec![DeliveryError::Blocked]),
        ]);
        let engine = BroadcastEngine::new(1000.0, 2);

        let summary = engine.run(&transport, &[1, 2, 3, 4, 5, 6], "hello").await;

        assert_eq!(summary.total, 6);
        assert_eq!(summary.sent, 2);
        assert_eq!(summary.failed, 4);
        assert_eq!(
            summary.error_breakdown(),
            vec![("blocked", 2), ("flood_retry_failed", 1), ("invalid", 1)]
        );
        assert_eq!(*transport.delivered.lock().unwrap(), vec![1, 4]);
        // flood-limited users are tried twice
        assert_eq!(transport.attempts.lock().unwrap().len(), 8);
    }

    #[tokio::test]
    async fn test_progress_reported_every_interval_and_at_end() {
        let transport = MockTransport::default();
        let engine = BroadcastEngine::new(1000.0, 2);

        engine.run(&transport, &[1, 2, 3, 4, 5], "hi").await;

        // initial report, after 2, after 4, final after 5
        let progress = transport.progress.lock().unwrap();
        assert_eq!(progress.len(), 4);
        assert!(progress[3].contains("<b>Progress:</b> 5/5 (100.0%)"));
    }

    #[tokio::test]
    async fn test_markup_characters_are_delivered_verbatim() {
        let transport = MockTransport::default();
        let text = "Tom & Jerry <3 are back! <b>not bold</b>";
        assert!(validate_message(text).is_ok());

        let summary = BroadcastEngine::new(1000.0, 25).run(&transport, &[1, 2], text).await;

        assert_eq!(summary.sent, 2);
        assert_eq!(*transport.texts.lock().unwrap(), vec![text.to_string(), text.to_string()]);
    }

    #[test]
    fn test_telegram_delivery_uses_plain_text() {
        use teloxide::requests::HasPayload;

        let transport = TelegramTransport::new(Arc::new(Bot::new("123456:test-token")), None);
        let request = transport.message_request(42, "Tom & Jerry <3");
        let payload = request.payload_ref();
        assert_eq!(payload.text, "Tom & Jerry <3");
        assert_eq!(payload.chat_id, teloxide::types::Recipient::Id(ChatId(42)));
        assert!(payload.parse_mode.is_none());
    }

    #[test]
    fn test_broadcast_id_candidates() {
        assert_eq!(broadcast_id_candidate("bc_20240203_040506", 1), "bc_20240203_040506");
        assert_eq!(broadcast_id_candidate("bc_20240203_040506", 2), "bc_20240203_040506_2");
        assert!(broadcast_id_candidate("bc_20240203_040506", MAX_ID_ATTEMPTS).len() <= 32);
    }

    #[tokio::test]
    async fn test_empty_recipient_list() {
        let transport = MockTransport::default();
        let summary = BroadcastEngine::new(1000.0, 25).run(&transport, &[], "hi").await;
        assert_eq!(summary.sent, 0);
        assert_eq!(summary.failed, 0);
        assert_eq!(transport.progress.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_validate_message() {
        assert!(validate_message("hello").is_ok());
        assert!(validate_message("   ").is_err());
        assert!(validate_message(&"é".repeat(TELEGRAM_MESSAGE_LIMIT)).is_ok());
        let err = validate_message(&"a".repeat(TELEGRAM_MESSAGE_LIMIT + 1)).unwrap_err();
        assert!(err.contains("Your message: 4097 characters"));
    }

    #[test]
    fn test_broadcast_id_and_summary() {
        let started_at = Utc.with_ymd_and_hms(2024, 2, 3, 4, 5, 6).unwrap();
        let summary = BroadcastSummary {
            total: 10,
            sent: 7,
            failed: 3,
            errors: HashMap::from([("blocked".to_string(), 2), ("invalid".to_string(), 1)]),
            started_at,
            completed_at: started_at,
            duration_secs: 75.0,
        };
        assert_eq!(summary.broadcast_id(), "bc_20240203_040506");

        let text = format_summary(&summary, Some(99));
        assert!(text.contains("<b>Successfully Sent:</b> 7 (70.0%)"));
        assert!(text.contains("• blocked: 2 (66.7%)\n• invalid: 1 (33.3%)"));
        assert!(text.contains("<b>Total Time:</b> 1m 15s"));
        assert!(text.contains("<b>By:</b> Admin (ID: 99)"));
    }

    #[test]
    fn test_retry_after_is_flood() {
        let err = RequestError::RetryAfter(teloxide::types::Seconds::from_seconds(3));
        assert_eq!(
            DeliveryError::from_request_error(&err),
            DeliveryError::Flood(Duration::from_secs(3))
        );
        assert_eq!(
            DeliveryError::from_request_error(&RequestError::Api(ApiError::BotBlocked)),
            DeliveryError::Blocked
        );
    }
}
