use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::error::Error;
use tokio_postgres::error::SqlState;

use crate::config::INDEX_EXTENSIONS;
use crate::metadata_parser::{parse_metadata, ContentType, ParsedMetadata};

const AUTO_INDEXING_KEY: &str = "auto_indexing";

/// media attached to a channel post, extracted from the telegram message
#[derive(Debug, Clone, Default)]
pub struct MediaInfo {
    pub channel_id: i64,
    pub message_id: i32,
    pub channel_title: Option<String>,
    pub caption: Option<String>,
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
    pub file_size: Option<i64>,
    /// true for native telegram videos, false for documents
    pub is_video: bool,
}

impl MediaInfo {
    /// videos always qualify; documents need a video mime type or a known extension
    pub fn is_indexable(&self) -> bool {
        if self.is_video {
            return true;
        }
        if let Some(mime) = &self.mime_type {
            if mime.to_lowercase().starts_with("video/") {
                return true;
            }
        }
        match &self.file_name {
            Some(name) => {
                let lower = name.to_lowercase();
                INDEX_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
            }
            None => false,
        }
    }
}

/// a row of the movies table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MovieEntry {
    pub channel_id: i64,
    pub message_id: i32,
    pub title: String,
    pub metadata: ParsedMetadata,
    pub file_name: Option<String>,
    pub file_size: Option<i64>,
    pub mime_type: Option<String>,
    pub channel_title: Option<String>,
    pub caption: Option<String>,
    pub indexed_at: Option<DateTime<Utc>>,
}

pub const MOVIE_COLUMNS: &str = "channel_id, message_id, title, year, quality, rip, source, extension, \
     resolution, audio, audio_channels, video_codec, bit_depth, hdr_format, imdb, content_type, \
     season, episode, file_name, file_size, mime_type, channel_title, caption, indexed_at";

impl MovieEntry {
    pub fn from_row(row: &tokio_postgres::Row) -> Self {
        let title: String = row.get("title");
        Self {
            channel_id: row.get("channel_id"),
            message_id: row.get("message_id"),
            metadata: ParsedMetadata {
                title: Some(title.clone()),
                year: row.get("year"),
                quality: row.get("quality"),
                rip: row.get("rip"),
                source: row.get("source"),
                extension: row.get("extension"),
                resolution: row.get("resolution"),
                audio: row.get("audio"),
                audio_channels: row.get("audio_channels"),
                video_codec: row.get("video_codec"),
                bit_depth: row.get("bit_depth"),
                hdr_format: row.get("hdr_format"),
                imdb: row.get("imdb"),
                content_type: ContentType::from_label(row.get::<_, &str>("content_type")),
                season: row.get("season"),
                episode: row.get("episode"),
            },
            title,
            file_name: row.get("file_name"),
            file_size: row.get("file_size"),
            mime_type: row.get("mime_type"),
            channel_title: row.get("channel_title"),
            caption: row.get("caption"),
            indexed_at: row.get("indexed_at"),
        }
    }
}

/// parses the post into an index row; the title falls back to the caption's
/// first line, then the file name, then "Unknown"
pub fn build_entry(media: &MediaInfo) -> MovieEntry {
    let metadata = parse_metadata(media.caption.as_deref(), media.file_name.as_deref());

    let title = metadata
        .title
        .clone()
        .or_else(|| {
            media
                .caption
                .as_deref()
                .and_then(|c| c.lines().next())
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
        })
        .or_else(|| media.file_name.clone().filter(|name| !name.trim().is_empty()))
        .unwrap_or_else(|| "Unknown".to_string());

    MovieEntry {
        channel_id: media.channel_id,
        message_id: media.message_id,
        title,
        metadata,
        file_name: media.file_name.clone(),
        file_size: media.file_size,
        mime_type: media.mime_type.clone(),
        channel_title: media.channel_title.clone(),
        caption: media.caption.clone(),
        indexed_at: None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelReference {
    Id(i64),
    Username(String),
}

/// accepts a numeric id, "@name", "t.me/name" or "https://t.me/name"
pub fn parse_channel_reference(input: &str) -> Option<ChannelReference> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    if let Ok(id) = input.parse::<i64>() {
        return Some(ChannelReference::Id(id));
    }

    if let Some(name) = input.strip_prefix('@') {
        return valid_username(name).map(ChannelReference::Username);
    }

    let with_scheme = if input.starts_with("http://") || input.starts_with("https://") {
        input.to_string()
    } else {
        format!("https://{}", input)
    };

    let parsed = url::Url::parse(&with_scheme).ok()?;
    match parsed.host_str() {
        Some("t.me") | Some("telegram.me") | Some("www.t.me") => {}
        _ => return None,
    }
    let name = parsed.path_segments()?.find(|segment| !segment.is_empty())?;
    valid_username(name).map(ChannelReference::Username)
}

fn valid_username(name: &str) -> Option<String> {
    let ok = !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if ok {
        Some(name.to_string())
    } else {
        None
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub channel_id: i64,
    pub channel_title: Option<String>,
    pub enabled: bool,
    pub added_by: Option<i64>,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexingStats {
    pub total_attempts: i64,
    pub successful_inserts: i64,
    pub duplicate_errors: i64,
    pub other_errors: i64,
    pub last_reset: Option<DateTime<Utc>>,
}

impl IndexingStats {
    pub fn success_rate(&self) -> f64 {
        if self.total_attempts == 0 {
            0.0
        } else {
            self.successful_inserts as f64 * 100.0 / self.total_attempts as f64
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexOutcome {
    Indexed,
    Duplicate,
    Failed,
    NotMonitored,
    AutoIndexingOff,
    NotMedia,
}

pub struct ChannelMonitor {
    pool: Pool,
    auto_indexing_default: bool,
}

impl ChannelMonitor {
    pub fn new(pool: Pool, auto_indexing_default: bool) -> Self {
        Self {
            pool,
            auto_indexing_default,
        }
    }

    /// registers (or re-enables) a channel; returns false when it was already active
    pub async fn add_channel(
        &self,
        channel_id: i64,
        channel_title: Option<&str>,
        added_by: i64,
    ) -> Result<bool, Box<dyn Error + Send + Sync>> {
        let client = self.pool.get().await?;
        let existing = client
            .query_opt(
                "SELECT enabled FROM channels WHERE channel_id = $1",
                &[&channel_id],
            )
            .await?;

        if let Some(row) = existing {
            if row.get::<_, bool>(0) {
                return Ok(false);
            }
            client
                .execute(
                    "UPDATE channels SET enabled = TRUE, channel_title = COALESCE($2, channel_title) WHERE channel_id = $1",
                    &[&channel_id, &channel_title],
                )
                .await?;
        } else {
            client
                .execute(
                    "INSERT INTO channels (channel_id, channel_title, added_by) VALUES ($1, $2, $3)",
                    &[&channel_id, &channel_title, &added_by],
                )
                .await?;
        }

        info!("Channel {} added by {}", channel_id, added_by);
        Ok(true)
    }

    /// unregisters a channel, its indexed files stay searchable
    pub async fn remove_channel(&self, channel_id: i64) -> Result<bool, Box<dyn Error + Send + Sync>> {
        let client = self.pool.get().await?;
        let deleted = client
            .execute("DELETE FROM channels WHERE channel_id = $1", &[&channel_id])
            .await?;
        if deleted > 0 {
            info!("Channel {} removed", channel_id);
        }
        Ok(deleted > 0)
    }

    pub async fn list_channels(&self) -> Result<Vec<Channel>, Box<dyn Error + Send + Sync>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT channel_id, channel_title, enabled, added_by, added_at FROM channels ORDER BY added_at",
                &[],
            )
            .await?;
        Ok(rows
            .iter()
            .map(|r| Channel {
                channel_id: r.get(0),
                channel_title: r.get(1),
                enabled: r.get(2),
                added_by: r.get(3),
                added_at: r.get(4),
            })
            .collect())
    }

    /// indexed file counts per registered channel
    pub async fn channel_stats(&self) -> Result<Vec<(Channel, i64)>, Box<dyn Error + Send + Sync>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT c.channel_id, c.channel_title, c.enabled, c.added_by, c.added_at, COUNT(m.id)
                 FROM channels c
                 LEFT JOIN movies m ON m.channel_id = c.channel_id
                 GROUP BY c.channel_id, c.channel_title, c.enabled, c.added_by, c.added_at
                 ORDER BY COUNT(m.id) DESC",
                &[],
            )
            .await?;
        Ok(rows
            .iter()
            .map(|r| {
                (
                    Channel {
                        channel_id: r.get(0),
                        channel_title: r.get(1),
                        enabled: r.get(2),
                        added_by: r.get(3),
                        added_at: r.get(4),
                    },
                    r.get::<_, i64>(5),
                )
            })
            .collect())
    }

    pub async fn is_channel_enabled(&self, channel_id: i64) -> Result<bool, Box<dyn Error + Send + Sync>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT enabled FROM channels WHERE channel_id = $1",
                &[&channel_id],
            )
            .await?;
        Ok(row.map(|r| r.get::<_, bool>(0)).unwrap_or(false))
    }

    pub async fn auto_indexing(&self) -> Result<bool, Box<dyn Error + Send + Sync>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT value FROM settings WHERE key = $1",
                &[&AUTO_INDEXING_KEY],
            )
            .await?;
        Ok(row
            .and_then(|r| r.get::<_, serde_json::Value>(0).as_bool())
            .unwrap_or(self.auto_indexing_default))
    }

    /// flips the setting and returns the new value
    pub async fn toggle_auto_indexing(&self) -> Result<bool, Box<dyn Error + Send + Sync>> {
        let new_value = !self.auto_indexing().await?;
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO settings (key, value) VALUES ($1, $2)
                 ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()",
                &[&AUTO_INDEXING_KEY, &serde_json::Value::Bool(new_value)],
            )
            .await?;
        info!("Auto-indexing set to {}", new_value);
        Ok(new_value)
    }

    /// indexes a channel post, keeping the attempt counters in step
    pub async fn index_post(&self, media: &MediaInfo) -> Result<IndexOutcome, Box<dyn Error + Send + Sync>> {
        if !self.is_channel_enabled(media.channel_id).await? {
            return Ok(IndexOutcome::NotMonitored);
        }
        if !self.auto_indexing().await? {
            return Ok(IndexOutcome::AutoIndexingOff);
        }
        if !media.is_indexable() {
            return Ok(IndexOutcome::NotMedia);
        }

        let entry = build_entry(media);
        let client = self.pool.get().await?;
        client
            .execute(
                "UPDATE indexing_stats SET total_attempts = total_attempts + 1 WHERE id = 1",
                &[],
            )
            .await?;

        let md = &entry.metadata;
        let result = client
            .execute(
                "INSERT INTO movies (channel_id, message_id, title, year, quality, rip, source, extension,
                    resolution, audio, audio_channels, video_codec, bit_depth, hdr_format, imdb, content_type,
                    season, episode, file_name, file_size, mime_type, channel_title, caption)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                    $17, $18, $19, $20, $21, $22, $23)",
                &[
                    &entry.channel_id,
                    &entry.message_id,
                    &entry.title,
                    &md.year,
                    &md.quality,
                    &md.rip,
                    &md.source,
                    &md.extension,
                    &md.resolution,
                    &md.audio,
                    &md.audio_channels,
                    &md.video_codec,
                    &md.bit_depth,
                    &md.hdr_format,
                    &md.imdb,
                    &md.content_type.as_str(),
                    &md.season,
                    &md.episode,
                    &entry.file_name,
                    &entry.file_size,
                    &entry.mime_type,
                    &entry.channel_title,
                    &entry.caption,
                ],
            )
            .await;

        let (outcome, counter) = match result {
            Ok(_) => {
                info!(
                    "Indexed '{}' from channel {} (message {})",
                    entry.title, entry.channel_id, entry.message_id
                );
                (IndexOutcome::Indexed, "successful_inserts")
            }
            Err(e) if e.code() == Some(&SqlState::UNIQUE_VIOLATION) => {
                warn!(
                    "Duplicate post {} in channel {}",
                    entry.message_id, entry.channel_id
                );
                (IndexOutcome::Duplicate, "duplicate_errors")
            }
            Err(e) => {
                error!(
                    "Failed to index post {} in channel {}: {}",
                    entry.message_id, entry.channel_id, e
                );
                (IndexOutcome::Failed, "other_errors")
            }
        };

        client
            .execute(
                &format!(
                    "UPDATE indexing_stats SET {0} = {0} + 1 WHERE id = 1",
                    counter
                ),
                &[],
            )
            .await?;

        Ok(outcome)
    }

    pub async fn indexing_stats(&self) -> Result<IndexingStats, Box<dyn Error + Send + Sync>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT total_attempts, successful_inserts, duplicate_errors, other_errors, last_reset
                 FROM indexing_stats WHERE id = 1",
                &[],
            )
            .await?;
        Ok(row
            .map(|r| IndexingStats {
                total_attempts: r.get(0),
                successful_inserts: r.get(1),
                duplicate_errors: r.get(2),
                other_errors: r.get(3),
                last_reset: r.get(4),
            })
            .unwrap_or_default())
    }

    pub async fn reset_indexing_stats(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO indexing_stats (id) VALUES (1)
                 ON CONFLICT (id) DO UPDATE SET total_attempts = 0, successful_inserts = 0,
                    duplicate_errors = 0, other_errors = 0, last_reset = NOW()",
                &[],
            )
            .await?;
        info!("Indexing stats reset");
        Ok(())
    }

    pub async fn total_indexed(&self) -> Result<i64, Box<dyn Error + Send + Sync>> {
        let client = self.pool.get().await?;
        let row = client.query_one("SELECT COUNT(*) FROM movies", &[]).await?;
        Ok(row.get(0))
    }

    /// deletes every indexed file; returns the number removed
    pub async fn reset_all(&self) -> Result<u64, Box<dyn Error + Send + Sync>> {
        let client = self.pool.get().await?;
        let deleted = client.execute("DELETE FROM movies", &[]).await?;
        warn!("Index reset: {} files deleted", deleted);
        Ok(deleted)
    }

    /// deletes indexed files of one channel
    pub async fn reset_channel(&self, channel_id: i64) -> Result<u64, Box<dyn Error + Send + Sync>> {
        let client = self.pool.get().await?;
        let deleted = client
            .execute("DELETE FROM movies WHERE channel_id = $1", &[&channel_id])
            .await?;
        warn!("Channel {} reset: {} files deleted", channel_id, deleted);
        Ok(deleted)
    }

    pub async fn get_entry(
        &self,
        channel_id: i64,
        message_id: i32,
    ) -> Result<Option<MovieEntry>, Box<dyn Error + Send + Sync>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!(
                    "SELECT {} FROM movies WHERE channel_id = $1 AND message_id = $2",
                    MOVIE_COLUMNS
                ),
                &[&channel_id, &message_id],
            )
            .await?;
        Ok(row.as_ref().map(MovieEntry::from_row))
    }
}
