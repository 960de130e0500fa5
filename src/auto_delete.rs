use chrono::{DateTime, Duration, Utc};
use deadpool_postgres::Pool;
use log::{error, info, warn};
use std::error::Error;
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::types::{MessageId, ParseMode};

const PROCESSOR_INTERVAL_SECS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeletionPolicy {
    pub delete_after_minutes: i64,
    pub warn_before_minutes: i64,
}

pub const SINGLE_FILE_POLICY: DeletionPolicy = DeletionPolicy {
    delete_after_minutes: 5,
    warn_before_minutes: 2,
};

pub const BULK_POLICY: DeletionPolicy = DeletionPolicy {
    delete_after_minutes: 15,
    warn_before_minutes: 5,
};

impl DeletionPolicy {
    /// (delete_at, warn_at)
    pub fn deadlines(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let delete_at = now + Duration::minutes(self.delete_after_minutes);
        (delete_at, delete_at - Duration::minutes(self.warn_before_minutes))
    }

    pub fn notice(&self) -> String {
        format!(
            "<b>Auto-Delete Notice</b>\n\n\
             This file will be automatically deleted in <b>{} minutes</b>.\n\
             You will get a warning {} minutes before deletion.\n\
             Please save it somewhere else if you want to keep it!",
            self.delete_after_minutes, self.warn_before_minutes
        )
    }
}

pub fn warning_text(minutes_left: i64) -> String {
    format!(
        "<b>{}-Minute Warning</b>\n\n\
         The file I sent you will be <b>auto-deleted</b> in {} minutes.\n\
         Please save it if you want to keep it!",
        minutes_left, minutes_left
    )
}

pub const DELETED_TEXT: &str = "<b>Auto-Deleted</b>\n\nThe file has been automatically deleted as scheduled.";

#[derive(Debug, Clone)]
pub struct ScheduledDeletion {
    pub id: i32,
    pub chat_id: i64,
    pub message_id: i32,
    pub delete_at: DateTime<Utc>,
    pub warn_at: DateTime<Utc>,
    pub notified: bool,
}

impl ScheduledDeletion {
    fn from_row(row: &tokio_postgres::Row) -> Self {
        Self {
            id: row.get("id"),
            chat_id: row.get("chat_id"),
            message_id: row.get("message_id"),
            delete_at: row.get("delete_at"),
            warn_at: row.get("warn_at"),
            notified: row.get("notified"),
        }
    }

    /// whole minutes between the warning and the deletion
    pub fn warning_minutes(&self) -> i64 {
        (self.delete_at - self.warn_at).num_minutes().max(1)
    }
}

pub struct DeletionScheduler {
    pool: Pool,
}

impl DeletionScheduler {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub async fn schedule(
        &self,
        chat_id: i64,
        message_id: i32,
        policy: DeletionPolicy,
    ) -> Result<DateTime<Utc>, Box<dyn Error + Send + Sync>> {
        let (delete_at, warn_at) = policy.deadlines(Utc::now());
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO scheduled_deletions (chat_id, message_id, delete_at, warn_at)
                 VALUES ($1, $2, $3, $4)",
                &[&chat_id, &message_id, &delete_at, &warn_at],
            )
            .await?;
        Ok(delete_at)
    }

    /// rows past their warning time that are not yet due for deletion
    pub async fn due_warnings(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledDeletion>, Box<dyn Error + Send + Sync>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT id, chat_id, message_id, delete_at, warn_at, notified
                 FROM scheduled_deletions
                 WHERE NOT notified AND warn_at <= $1 AND delete_at > $1
                 ORDER BY warn_at",
                &[&now],
            )
            .await?;
        Ok(rows.iter().map(ScheduledDeletion::from_row).collect())
    }

    pub async fn due_deletions(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledDeletion>, Box<dyn Error + Send + Sync>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT id, chat_id, message_id, delete_at, warn_at, notified
                 FROM scheduled_deletions
                 WHERE delete_at <= $1
                 ORDER BY delete_at",
                &[&now],
            )
            .await?;
        Ok(rows.iter().map(ScheduledDeletion::from_row).collect())
    }

    pub async fn mark_notified(&self, id: i32) -> Result<(), Box<dyn Error + Send + Sync>> {
        let client = self.pool.get().await?;
        client
            .execute("UPDATE scheduled_deletions SET notified = TRUE WHERE id = $1", &[&id])
            .await?;
        Ok(())
    }

    pub async fn remove(&self, id: i32) -> Result<(), Box<dyn Error + Send + Sync>> {
        let client = self.pool.get().await?;
        client
            .execute("DELETE FROM scheduled_deletions WHERE id = $1", &[&id])
            .await?;
        Ok(())
    }

    pub async fn pending_count(&self) -> Result<i64, Box<dyn Error + Send + Sync>> {
        let client = self.pool.get().await?;
        let row = client
            .query_one("SELECT COUNT(*) FROM scheduled_deletions", &[])
            .await?;
        Ok(row.get(0))
    }
}

/// sends due warnings, then deletes due messages; returns (warned, deleted)
pub async fn process_due(
    bot: &Bot,
    scheduler: &DeletionScheduler,
    now: DateTime<Utc>,
) -> Result<(usize, usize), Box<dyn Error + Send + Sync>> {
    let mut warned = 0;
    for row in scheduler.due_warnings(now).await? {
        match bot
            .send_message(ChatId(row.chat_id), warning_text(row.warning_minutes()))
            .parse_mode(ParseMode::Html)
            .await
        {
            Ok(_) => warned += 1,
            Err(e) => warn!("Failed to send deletion warning to {}: {}", row.chat_id, e),
        }
        // a failed warning is not retried
        scheduler.mark_notified(row.id).await?;
    }

    let mut deleted = 0;
    let mut failed = 0;
    for row in scheduler.due_deletions(now).await? {
        match bot
            .delete_message(ChatId(row.chat_id), MessageId(row.message_id))
            .await
        {
            Ok(_) => {
                deleted += 1;
                if row.notified {
                    if let Err(e) = bot
                        .send_message(ChatId(row.chat_id), DELETED_TEXT)
                        .parse_mode(ParseMode::Html)
                        .await
                    {
                        warn!("Failed to send deletion notice to {}: {}", row.chat_id, e);
                    }
                }
            }
            Err(e) => {
                failed += 1;
                warn!(
                    "Failed to delete message {} for {}: {}",
                    row.message_id, row.chat_id, e
                );
            }
        }
        scheduler.remove(row.id).await?;
    }

    if deleted > 0 || failed > 0 {
        info!("Auto-deleted {} file(s), {} failed", deleted, failed);
    }
    Ok((warned, deleted))
}

pub async fn run_deletion_processor(bot: Arc<Bot>, scheduler: Arc<DeletionScheduler>) {
    info!("Starting auto-delete processor");
    let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(PROCESSOR_INTERVAL_SECS));

    loop {
        interval.tick().await;
        if let Err(e) = process_due(&bot, &scheduler, Utc::now()).await {
            error!("Auto-delete processing failed: {}", e);
        }
    }
}
