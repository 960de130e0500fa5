use log::{debug, error, info};
use teloxide::prelude::*;

use crate::bot::BotContext;
use crate::channel_monitor::{IndexOutcome, MediaInfo};

/// file attributes shared by videos and documents
#[derive(Debug, Clone, Default)]
pub struct Attachment {
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
    pub file_size: u32,
    pub is_video: bool,
}

impl Attachment {
    pub fn from_message(msg: &Message) -> Option<Self> {
        if let Some(video) = msg.video() {
            return Some(Self {
                file_name: video.file_name.clone(),
                mime_type: video.mime_type.as_ref().map(|m| m.to_string()),
                file_size: video.file.size,
                is_video: true,
            });
        }
        msg.document().map(|document| Self {
            file_name: document.file_name.clone(),
            mime_type: document.mime_type.as_ref().map(|m| m.to_string()),
            file_size: document.file.size,
            is_video: false,
        })
    }
}

pub fn media_info(
    channel_id: i64,
    message_id: i32,
    channel_title: Option<&str>,
    caption: Option<&str>,
    attachment: Attachment,
) -> MediaInfo {
    MediaInfo {
        channel_id,
        message_id,
        channel_title: channel_title.map(str::to_string),
        caption: caption.map(str::to_string),
        file_name: attachment.file_name,
        mime_type: attachment.mime_type,
        file_size: (attachment.file_size > 0).then_some(attachment.file_size as i64),
        is_video: attachment.is_video,
    }
}

pub struct ChannelHandler;

impl ChannelHandler {
    pub async fn handle_channel_post(ctx: BotContext, msg: Message) -> ResponseResult<()> {
        let Some(attachment) = Attachment::from_message(&msg) else {
            debug!("Ignoring non-media post {} in {}", msg.id.0, msg.chat.id);
            return Ok(());
        };
        let media = media_info(
            msg.chat.id.0,
            msg.id.0,
            msg.chat.title(),
            msg.caption(),
            attachment,
        );

        match ctx.channel_monitor.index_post(&media).await {
            Ok(IndexOutcome::Indexed) => {
                info!("New post {} in channel {} indexed", media.message_id, media.channel_id)
            }
            Ok(IndexOutcome::NotMonitored) => {
                debug!("Channel {} is not monitored", media.channel_id)
            }
            Ok(IndexOutcome::AutoIndexingOff) => {
                debug!("Auto-indexing is off, skipping post {}", media.message_id)
            }
            Ok(outcome) => debug!(
                "Post {} in channel {}: {:?}",
                media.message_id, media.channel_id, outcome
            ),
            Err(e) => error!(
                "Failed to index post {} in channel {}: {}",
                media.message_id, media.channel_id, e
            ),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_info_from_document() {
        let attachment = Attachment {
            file_name: Some("Inception.2010.1080p.mkv".to_string()),
            mime_type: Some("video/x-matroska".to_string()),
            file_size: 2048,
            is_video: false,
        };
        let media = media_info(-100123, 5, Some("Movies"), Some("Inception 2010"), attachment);
        assert_eq!(media.channel_id, -100123);
        assert_eq!(media.file_size, Some(2048));
        assert_eq!(media.channel_title.as_deref(), Some("Movies"));
        assert!(media.is_indexable());
    }

    #[test]
    fn test_media_info_unknown_size() {
        let media = media_info(1, 1, None, None, Attachment::default());
        assert_eq!(media.file_size, None);
        assert!(!media.is_indexable());
    }
}
