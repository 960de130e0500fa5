use chrono::Utc;
use log::{error, info, warn};
use serde_json::json;
use std::time::Duration;
use teloxide::prelude::*;
use teloxide::types::{ChatId, InputFile, ParseMode, Recipient};

use crate::bot::{BotContext, Command};
use crate::broadcast::{
    format_confirmation, format_summary, record_broadcast, validate_message, BroadcastEngine,
    TelegramTransport, CONFIRM_TIMEOUT, PROMPT_TIMEOUT,
};
use crate::channel_monitor::{parse_channel_reference, ChannelReference};
use crate::handlers::{
    require_admin, resolve_user_id, wait_for_text, TextReply, UserInfo, GENERIC_ERROR_TEXT,
};
use crate::statistics::{
    collection_failed, export_csv, export_json, format_dashboard, format_quick_stats,
};
use crate::user_manager::Role;
use crate::utils::MessageFormatter;

const RESET_TIMEOUT: Duration = Duration::from_secs(30);

const RESET_CONFIRMATION_TEXT: &str = "⚠️ <b>Database Reset Confirmation</b>\n\n\
🗑️ This will <b>PERMANENTLY DELETE</b> all indexed movie data!\n\n\
📊 <b>What stays:</b>\n\
• Search history\n\
• User accounts\n\
• Channel configurations\n\n\
<b>To confirm, type:</b> <code>CONFIRM</code>\n\
<b>To cancel, type anything else or wait 30 seconds</b>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "json" => Some(ExportFormat::Json),
            "csv" => Some(ExportFormat::Csv),
            _ => None,
        }
    }

    fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
        }
    }
}

/// 1-based choice from the channel list; None for anything out of range
pub fn parse_selection(input: &str, count: usize) -> Option<usize> {
    match input.trim().parse::<usize>() {
        Ok(n) if n >= 1 && n <= count => Some(n - 1),
        _ => None,
    }
}

pub struct AdminHandler;

impl AdminHandler {
    pub async fn handle_command(ctx: BotContext, msg: Message, cmd: Command) -> ResponseResult<()> {
        let Some(user_id) = UserInfo::from_message(&msg).map(|user| user.telegram_user_id) else {
            return Ok(());
        };
        if !require_admin(&ctx, msg.chat.id, user_id).await? {
            return Ok(());
        }

        match cmd {
            Command::Stats => Self::handle_stats(ctx, msg).await?,
            Command::Quickstat => Self::handle_quickstat(ctx, msg).await?,
            Command::ExportStats(format) => Self::handle_export_stats(ctx, msg, &format).await?,
            Command::Broadcast(text) => {
                let username = msg.from.as_ref().and_then(|user| user.username.clone());
                let chat_id = msg.chat.id;
                tokio::spawn(async move {
                    if let Err(e) =
                        Self::run_broadcast_flow(ctx, chat_id, user_id, username, text).await
                    {
                        error!("Broadcast flow failed: {}", e);
                    }
                });
            }
            Command::AddChannel(reference) => {
                Self::handle_add_channel(ctx, msg, user_id, &reference).await?
            }
            Command::RemoveChannel(reference) => {
                Self::handle_remove_channel(ctx, msg, user_id, &reference).await?
            }
            Command::ListChannels => Self::handle_list_channels(ctx, msg).await?,
            Command::ChannelStats => Self::handle_channel_stats(ctx, msg).await?,
            Command::ToggleIndexing => Self::handle_toggle_indexing(ctx, msg, user_id).await?,
            Command::Promote(target) => {
                Self::handle_role_change(ctx, msg, user_id, &target, Role::Admin, "promote").await?
            }
            Command::Demote(target) => {
                Self::handle_role_change(ctx, msg, user_id, &target, Role::User, "demote").await?
            }
            Command::BanUser(target) => {
                Self::handle_role_change(ctx, msg, user_id, &target, Role::Banned, "ban_user").await?
            }
            Command::UnbanUser(target) => {
                Self::handle_role_change(ctx, msg, user_id, &target, Role::User, "unban_user").await?
            }
            Command::Reset => {
                let chat_id = msg.chat.id;
                tokio::spawn(async move {
                    if let Err(e) = Self::run_reset_flow(ctx, chat_id, user_id).await {
                        error!("Reset flow failed: {}", e);
                    }
                });
            }
            Command::ResetChannel => {
                let chat_id = msg.chat.id;
                tokio::spawn(async move {
                    if let Err(e) = Self::run_reset_channel_flow(ctx, chat_id, user_id).await {
                        error!("Channel reset flow failed: {}", e);
                    }
                });
            }
            Command::IndexingStats => Self::handle_indexing_stats(ctx, msg).await?,
            Command::ResetStats => Self::handle_reset_stats(ctx, msg, user_id).await?,
            other => warn!("Command {:?} is not an admin command", other),
        }
        Ok(())
    }

    async fn resolve_channel(ctx: &BotContext, reference: &ChannelReference) -> Result<(i64, Option<String>), String> {
        let recipient = match reference {
            ChannelReference::Id(id) => Recipient::Id(ChatId(*id)),
            ChannelReference::Username(name) => Recipient::ChannelUsername(format!("@{}", name)),
        };
        match ctx.bot.get_chat(recipient).await {
            Ok(chat) => Ok((chat.id.0, chat.title().map(str::to_string))),
            Err(e) => Err(e.to_string()),
        }
    }

    async fn handle_add_channel(ctx: BotContext, msg: Message, user_id: i64, reference: &str) -> ResponseResult<()> {
        let Some(reference) = parse_channel_reference(reference) else {
            ctx.bot
                .send_message(msg.chat.id, "Usage: /add_channel <link|id|@username>")
                .await?;
            return Ok(());
        };

        let (channel_id, title) = match Self::resolve_channel(&ctx, &reference).await {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!("Could not resolve channel {:?}: {}", reference, e);
                ctx.bot
                    .send_message(
                        msg.chat.id,
                        "❌ Could not resolve channel. Make sure the bot is an admin there.",
                    )
                    .await?;
                return Ok(());
            }
        };

        let display = title.clone().unwrap_or_else(|| channel_id.to_string());
        let text = match ctx
            .channel_monitor
            .add_channel(channel_id, title.as_deref(), user_id)
            .await
        {
            Ok(true) => {
                ctx.log_action("add_channel", Some(user_id), Some(channel_id), Some(json!({ "title": title })))
                    .await;
                format!("✅ Channel added: {} ({})", display, channel_id)
            }
            Ok(false) => format!("ℹ️ Channel already monitored: {} ({})", display, channel_id),
            Err(e) => {
                error!("Failed to add channel {}: {}", channel_id, e);
                GENERIC_ERROR_TEXT.to_string()
            }
        };
        ctx.bot.send_message(msg.chat.id, text).await?;
        Ok(())
    }

    async fn handle_remove_channel(ctx: BotContext, msg: Message, user_id: i64, reference: &str) -> ResponseResult<()> {
        let channel_id = match parse_channel_reference(reference) {
            Some(ChannelReference::Id(id)) => id,
            Some(reference) => match Self::resolve_channel(&ctx, &reference).await {
                Ok((id, _)) => id,
                Err(e) => {
                    warn!("Could not resolve channel {:?}: {}", reference, e);
                    ctx.bot
                        .send_message(msg.chat.id, "❌ Could not resolve channel.")
                        .await?;
                    return Ok(());
                }
            },
            None => {
                ctx.bot
                    .send_message(msg.chat.id, "Usage: /remove_channel <link|id|@username>")
                    .await?;
                return Ok(());
            }
        };

        let text = match ctx.channel_monitor.remove_channel(channel_id).await {
            Ok(true) => {
                ctx.log_action("remove_channel", Some(user_id), Some(channel_id), None)
                    .await;
                format!(
                    "✅ Channel removed: {}\nIndexed files from it are kept.",
                    channel_id
                )
            }
            Ok(false) => format!("❌ Channel {} is not registered.", channel_id),
            Err(e) => {
                error!("Failed to remove channel {}: {}", channel_id, e);
                GENERIC_ERROR_TEXT.to_string()
            }
        };
        ctx.bot.send_message(msg.chat.id, text).await?;
        Ok(())
    }

    async fn handle_list_channels(ctx: BotContext, msg: Message) -> ResponseResult<()> {
        let text = match ctx.channel_monitor.list_channels().await {
            Ok(channels) if channels.is_empty() => "No channels configured.".to_string(),
            Ok(channels) => {
                let mut text = String::from("📺 <b>Monitored Channels</b>\n\n");
                for channel in &channels {
                    text.push_str(&format!(
                        "• {} <code>{}</code> {}\n",
                        MessageFormatter::escape_html(channel.channel_title.as_deref().unwrap_or("?")),
                        channel.channel_id,
                        if channel.enabled { "✅ Enabled" } else { "❌ Disabled" }
                    ));
                }
                text
            }
            Err(e) => {
                error!("Failed to list channels: {}", e);
                GENERIC_ERROR_TEXT.to_string()
            }
        };
        ctx.bot
            .send_message(msg.chat.id, text)
            .parse_mode(ParseMode::Html)
            .await?;
        Ok(())
    }

    async fn handle_channel_stats(ctx: BotContext, msg: Message) -> ResponseResult<()> {
        let text = match ctx.channel_monitor.channel_stats().await {
            Ok(stats) if stats.is_empty() => "No data.".to_string(),
            Ok(stats) => {
                let mut text = String::from("📊 <b>Files per Channel</b>\n\n");
                for (channel, count) in &stats {
                    text.push_str(&format!(
                        "{} (<code>{}</code>): {}\n",
                        MessageFormatter::escape_html(
                            channel.channel_title.as_deref().unwrap_or("?")
                        ),
                        channel.channel_id,
                        MessageFormatter::format_number(*count)
                    ));
                }
                text
            }
            Err(e) => {
                error!("Failed to load channel stats: {}", e);
                GENERIC_ERROR_TEXT.to_string()
            }
        };
        ctx.bot
            .send_message(msg.chat.id, text)
            .parse_mode(ParseMode::Html)
            .await?;
        Ok(())
    }

    async fn handle_toggle_indexing(ctx: BotContext, msg: Message, user_id: i64) -> ResponseResult<()> {
        let text = match ctx.channel_monitor.toggle_auto_indexing().await {
            Ok(enabled) => {
                ctx.log_action("toggle_indexing", Some(user_id), None, Some(json!({ "new": enabled })))
                    .await;
                format!("🔄 Auto-indexing is now {}", if enabled { "ON" } else { "OFF" })
            }
            Err(e) => {
                error!("Failed to toggle auto-indexing: {}", e);
                GENERIC_ERROR_TEXT.to_string()
            }
        };
        ctx.bot.send_message(msg.chat.id, text).await?;
        Ok(())
    }

    async fn handle_role_change(
        ctx: BotContext,
        msg: Message,
        user_id: i64,
        target: &str,
        role: Role,
        action: &str,
    ) -> ResponseResult<()> {
        let target_id = match resolve_user_id(&ctx, target).await {
            Ok(Some(id)) => id,
            Ok(None) => {
                ctx.bot
                    .send_message(msg.chat.id, format!("Usage: /{} <user_id|@username>", action))
                    .await?;
                return Ok(());
            }
            Err(e) => {
                error!("Failed to resolve user '{}': {}", target, e);
                ctx.bot.send_message(msg.chat.id, GENERIC_ERROR_TEXT).await?;
                return Ok(());
            }
        };

        if let Err(e) = ctx.user_manager.set_role(target_id, role).await {
            error!("Failed to {} {}: {}", action, target_id, e);
            ctx.bot.send_message(msg.chat.id, GENERIC_ERROR_TEXT).await?;
            return Ok(());
        }
        ctx.log_action(action, Some(user_id), Some(target_id), None).await;

        let text = match action {
            "promote" => format!("✅ {} promoted to admin.", target_id),
            "demote" => format!("✅ {} demoted to user.", target_id),
            "ban_user" => format!("🚫 {} has been banned.", target_id),
            _ => format!("✅ {} has been unbanned.", target_id),
        };
        ctx.bot.send_message(msg.chat.id, text).await?;
        Ok(())
    }

    async fn run_reset_flow(ctx: BotContext, chat_id: ChatId, user_id: i64) -> ResponseResult<()> {
        ctx.bot
            .send_message(chat_id, RESET_CONFIRMATION_TEXT)
            .parse_mode(ParseMode::Html)
            .await?;

        let confirmed = match wait_for_text(&ctx, chat_id, user_id, RESET_TIMEOUT).await {
            TextReply::Text(text) => text.eq_ignore_ascii_case("CONFIRM"),
            TextReply::TimedOut => {
                ctx.bot
                    .send_message(
                        chat_id,
                        "⏰ Database reset timed out.\n🛡️ All your indexed movie data is safe.",
                    )
                    .await?;
                return Ok(());
            }
            TextReply::Cancelled | TextReply::NotText => false,
        };

        if !confirmed {
            ctx.bot
                .send_message(
                    chat_id,
                    "❌ Database reset cancelled.\n🛡️ No changes were made to the database.",
                )
                .await?;
            return Ok(());
        }

        let text = match ctx.channel_monitor.reset_all().await {
            Ok(deleted) => {
                ctx.log_action("reset_database", Some(user_id), None, Some(json!({ "deleted_count": deleted })))
                    .await;
                info!("Database reset by {}: {} entries deleted", user_id, deleted);
                format!(
                    "✅ <b>Database Reset Complete!</b>\n\n🗑️ Deleted: {} movie entries\n👤 By: {}\n🕒 Time: {}",
                    deleted,
                    user_id,
                    Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
                )
            }
            Err(e) => {
                error!("Database reset failed: {}", e);
                ctx.log_action("reset_database", Some(user_id), None, Some(json!({ "success": false })))
                    .await;
                "❌ <b>Database Reset Failed!</b>\n\nThe database was not modified. Please try again later."
                    .to_string()
            }
        };
        ctx.bot
            .send_message(chat_id, text)
            .parse_mode(ParseMode::Html)
            .await?;
        Ok(())
    }

    async fn run_reset_channel_flow(ctx: BotContext, chat_id: ChatId, user_id: i64) -> ResponseResult<()> {
        let channels = match ctx.channel_monitor.channel_stats().await {
            Ok(channels) => channels,
            Err(e) => {
                error!("Failed to load channels for reset: {}", e);
                ctx.bot.send_message(chat_id, GENERIC_ERROR_TEXT).await?;
                return Ok(());
            }
        };
        if channels.is_empty() {
            ctx.bot
                .send_message(
                    chat_id,
                    "📺 No registered channels found. Use /add_channel to add channels first.",
                )
                .await?;
            return Ok(());
        }

        let mut text = String::from("📺 <b>Select a channel to reset:</b>\n\n");
        for (i, (channel, count)) in channels.iter().enumerate() {
            text.push_str(&format!(
                "{}. <b>{}</b>\n   📊 ID: <code>{}</code> | {} files | {}\n\n",
                i + 1,
                MessageFormatter::escape_html(channel.channel_title.as_deref().unwrap_or("?")),
                channel.channel_id,
                count,
                if channel.enabled { "✅ Enabled" } else { "❌ Disabled" }
            ));
        }
        text.push_str("🔢 Send the <b>number</b> of the channel to reset\n⏰ Timeout: 30 seconds\n🛑 To cancel: send CANCEL");
        ctx.bot
            .send_message(chat_id, text)
            .parse_mode(ParseMode::Html)
            .await?;

        let index = match wait_for_text(&ctx, chat_id, user_id, RESET_TIMEOUT).await {
            TextReply::Text(reply) => match parse_selection(&reply, channels.len()) {
                Some(index) => index,
                None => {
                    ctx.bot
                        .send_message(chat_id, "❌ Invalid selection. Use /reset_channel to start over.")
                        .await?;
                    return Ok(());
                }
            },
            TextReply::TimedOut => {
                ctx.bot
                    .send_message(chat_id, "⏰ Channel reset timed out. No changes were made.")
                    .await?;
                return Ok(());
            }
            TextReply::Cancelled | TextReply::NotText => {
                ctx.bot
                    .send_message(chat_id, "❌ Channel reset cancelled. No changes were made.")
                    .await?;
                return Ok(());
            }
        };

        let (channel, count) = &channels[index];
        let title = channel
            .channel_title
            .clone()
            .unwrap_or_else(|| channel.channel_id.to_string());
        ctx.bot
            .send_message(
                chat_id,
                format!(
                    "🗑️ <b>Channel Reset Confirmation</b>\n\n📺 Channel: {}\n🆔 ID: <code>{}</code>\n📊 Files to delete: {}\n\n\
                     ⚠️ This permanently deletes all indexed data of this channel.\n\
                     The channel configuration and other channels stay.\n\n\
                     <b>To confirm, type:</b> <code>CONFIRM</code>\n⏰ This prompt times out in 30 seconds.",
                    MessageFormatter::escape_html(&title),
                    channel.channel_id,
                    count
                ),
            )
            .parse_mode(ParseMode::Html)
            .await?;

        match wait_for_text(&ctx, chat_id, user_id, RESET_TIMEOUT).await {
            TextReply::Text(reply) if reply.eq_ignore_ascii_case("CONFIRM") => {}
            TextReply::TimedOut => {
                ctx.bot
                    .send_message(chat_id, "⏰ Channel reset timed out. No changes were made.")
                    .await?;
                return Ok(());
            }
            _ => {
                ctx.bot
                    .send_message(
                        chat_id,
                        format!("❌ Channel reset cancelled.\n📁 All data from {} remains safe.", title),
                    )
                    .await?;
                return Ok(());
            }
        }

        let text = match ctx.channel_monitor.reset_channel(channel.channel_id).await {
            Ok(deleted) => {
                ctx.log_action(
                    "reset_channel",
                    Some(user_id),
                    Some(channel.channel_id),
                    Some(json!({ "channel_name": title, "deleted_count": deleted })),
                )
                .await;
                format!(
                    "✅ <b>Channel Reset Complete!</b>\n\n📺 Channel: {}\n🗑️ Deleted: {} movie entries",
                    MessageFormatter::escape_html(&title),
                    deleted
                )
            }
            Err(e) => {
                error!("Channel reset failed for {}: {}", channel.channel_id, e);
                "❌ <b>Channel Reset Failed!</b>\n\nThe database was not modified.".to_string()
            }
        };
        ctx.bot
            .send_message(chat_id, text)
            .parse_mode(ParseMode::Html)
            .await?;
        Ok(())
    }

    async fn handle_indexing_stats(ctx: BotContext, msg: Message) -> ResponseResult<()> {
        let result = async {
            let stats = ctx.channel_monitor.indexing_stats().await?;
            let total = ctx.channel_monitor.total_indexed().await?;
            let auto = ctx.channel_monitor.auto_indexing().await?;
            let pending_deletions = ctx.deletions.pending_count().await?;
            Ok::<_, Box<dyn std::error::Error + Send + Sync>>((stats, total, auto, pending_deletions))
        }
        .await;

        let text = match result {
            Ok((stats, total, auto, pending_deletions)) => format!(
                "📊 <b>Indexing Statistics</b>\n\n\
                 🔄 Auto-indexing: {}\n\
                 📁 Indexed files: {}\n\n\
                 🔢 Attempts: {}\n\
                 ✅ Successful: {}\n\
                 ♻️ Duplicates: {}\n\
                 ❌ Errors: {}\n\
                 📈 Success rate: {:.1}%\n\n\
                 🗑️ Pending auto-deletions: {}\n\
                 🕒 Last reset: {}",
                if auto { "ON" } else { "OFF" },
                MessageFormatter::format_number(total),
                stats.total_attempts,
                stats.successful_inserts,
                stats.duplicate_errors,
                stats.other_errors,
                stats.success_rate(),
                pending_deletions,
                stats
                    .last_reset
                    .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
                    .unwrap_or_else(|| "never".to_string())
            ),
            Err(e) => {
                error!("Failed to load indexing stats: {}", e);
                GENERIC_ERROR_TEXT.to_string()
            }
        };
        ctx.bot
            .send_message(msg.chat.id, text)
            .parse_mode(ParseMode::Html)
            .await?;
        Ok(())
    }

    async fn handle_reset_stats(ctx: BotContext, msg: Message, user_id: i64) -> ResponseResult<()> {
        let text = match ctx.channel_monitor.reset_indexing_stats().await {
            Ok(()) => {
                ctx.log_action("reset_indexing_stats", Some(user_id), None, None)
                    .await;
                "✅ Indexing statistics have been reset.".to_string()
            }
            Err(e) => {
                error!("Failed to reset indexing stats: {}", e);
                GENERIC_ERROR_TEXT.to_string()
            }
        };
        ctx.bot.send_message(msg.chat.id, text).await?;
        Ok(())
    }

    async fn handle_stats(ctx: BotContext, msg: Message) -> ResponseResult<()> {
        let status = ctx
            .bot
            .send_message(msg.chat.id, "📊 Collecting statistics...")
            .await?;

        let text = match ctx.statistics.collect().await {
            Ok(stats) => format_dashboard(&stats),
            Err(e) => collection_failed(e.as_ref()),
        };
        ctx.bot
            .edit_message_text(msg.chat.id, status.id, text)
            .parse_mode(ParseMode::Html)
            .await?;
        Ok(())
    }

    async fn handle_quickstat(ctx: BotContext, msg: Message) -> ResponseResult<()> {
        let text = match ctx.statistics.collect_quick().await {
            Ok(stats) => format_quick_stats(&stats),
            Err(e) => collection_failed(e.as_ref()),
        };
        ctx.bot
            .send_message(msg.chat.id, text)
            .parse_mode(ParseMode::Html)
            .await?;
        Ok(())
    }

    async fn handle_export_stats(ctx: BotContext, msg: Message, format: &str) -> ResponseResult<()> {
        let Some(format) = ExportFormat::parse(format) else {
            ctx.bot
                .send_message(msg.chat.id, "Usage: /export_stats json|csv")
                .await?;
            return Ok(());
        };

        let stats = match ctx.statistics.collect().await {
            Ok(stats) => stats,
            Err(e) => {
                ctx.bot
                    .send_message(msg.chat.id, collection_failed(e.as_ref()))
                    .await?;
                return Ok(());
            }
        };

        let body = match format {
            ExportFormat::Json => match export_json(&stats) {
                Ok(body) => body,
                Err(e) => {
                    error!("Failed to serialize statistics: {}", e);
                    ctx.bot.send_message(msg.chat.id, GENERIC_ERROR_TEXT).await?;
                    return Ok(());
                }
            },
            ExportFormat::Csv => export_csv(&stats),
        };

        let file_name = format!(
            "bot_stats_{}.{}",
            stats.generated_at.format("%Y%m%d_%H%M%S"),
            format.extension()
        );
        ctx.bot
            .send_document(
                msg.chat.id,
                InputFile::memory(body.into_bytes()).file_name(file_name),
            )
            .caption(format!(
                "📊 Statistics export ({})",
                format.extension().to_uppercase()
            ))
            .await?;
        Ok(())
    }

    async fn run_broadcast_flow(
        ctx: BotContext,
        chat_id: ChatId,
        user_id: i64,
        username: Option<String>,
        text: String,
    ) -> ResponseResult<()> {
        let text = if text.trim().is_empty() {
            ctx.bot
                .send_message(
                    chat_id,
                    "📢 Send the message you want to broadcast (sent as plain text).\n\nType CANCEL to abort.",
                )
                .await?;
            match wait_for_text(&ctx, chat_id, user_id, PROMPT_TIMEOUT).await {
                TextReply::Text(text) => text,
                TextReply::Cancelled => {
                    ctx.bot.send_message(chat_id, "❌ Broadcast cancelled.").await?;
                    return Ok(());
                }
                TextReply::NotText => {
                    ctx.bot
                        .send_message(chat_id, "❌ Only text messages can be broadcast.")
                        .await?;
                    return Ok(());
                }
                TextReply::TimedOut => {
                    ctx.bot
                        .send_message(chat_id, "⏰ Broadcast cancelled: no message received.")
                        .await?;
                    return Ok(());
                }
            }
        } else {
            text.trim().to_string()
        };

        if let Err(reason) = validate_message(&text) {
            ctx.bot.send_message(chat_id, format!("❌ {}", reason)).await?;
            return Ok(());
        }

        let recipients = if ctx.config.broadcast_test_mode {
            ctx.config.broadcast_test_users.clone()
        } else {
            match ctx.user_manager.eligible_recipients().await {
                Ok(recipients) => recipients,
                Err(e) => {
                    error!("Failed to load broadcast recipients: {}", e);
                    ctx.bot.send_message(chat_id, GENERIC_ERROR_TEXT).await?;
                    return Ok(());
                }
            }
        };
        if recipients.is_empty() {
            ctx.bot
                .send_message(chat_id, "📭 No eligible recipients for a broadcast.")
                .await?;
            return Ok(());
        }

        ctx.bot
            .send_message(chat_id, format_confirmation(recipients.len(), &text))
            .parse_mode(ParseMode::Html)
            .await?;
        match wait_for_text(&ctx, chat_id, user_id, CONFIRM_TIMEOUT).await {
            TextReply::Text(reply) if reply.eq_ignore_ascii_case("YES") => {}
            TextReply::TimedOut => {
                ctx.bot
                    .send_message(chat_id, "⏰ Broadcast cancelled: no confirmation received.")
                    .await?;
                return Ok(());
            }
            _ => {
                ctx.bot.send_message(chat_id, "❌ Broadcast cancelled.").await?;
                return Ok(());
            }
        }

        info!(
            "Admin {} started a broadcast to {} users (test mode: {})",
            user_id,
            recipients.len(),
            ctx.config.broadcast_test_mode
        );
        let transport = TelegramTransport::new(ctx.bot.clone(), Some(chat_id));
        let engine = BroadcastEngine::new(
            ctx.config.broadcast_rate_limit,
            ctx.config.broadcast_progress_interval,
        );
        let summary = engine.run(&transport, &recipients, &text).await;

        let broadcast_id =
            match record_broadcast(&ctx.pool, user_id, username.as_deref(), &text, &summary).await {
                Ok(id) => Some(id),
                Err(e) => {
                    error!("Failed to record broadcast: {}", e);
                    None
                }
            };
        ctx.log_action(
            "broadcast",
            Some(user_id),
            None,
            Some(json!({
                "broadcast_id": broadcast_id,
                "total": summary.total,
                "sent": summary.sent,
                "failed": summary.failed,
            })),
        )
        .await;

        ctx.bot
            .send_message(chat_id, format_summary(&summary, Some(user_id)))
            .parse_mode(ParseMode::Html)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_format_parse() {
        assert_eq!(ExportFormat::parse(" JSON "), Some(ExportFormat::Json));
        assert_eq!(ExportFormat::parse("csv"), Some(ExportFormat::Csv));
        assert_eq!(ExportFormat::parse("xml"), None);
        assert_eq!(ExportFormat::parse(""), None);
    }

    #[test]
    fn test_parse_selection_bounds() {
        assert_eq!(parse_selection("1", 3), Some(0));
        assert_eq!(parse_selection(" 3 ", 3), Some(2));
        assert_eq!(parse_selection("0", 3), None);
        assert_eq!(parse_selection("4", 3), None);
        assert_eq!(parse_selection("two", 3), None);
    }
}
