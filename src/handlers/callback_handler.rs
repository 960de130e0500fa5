use log::{error, info, warn};
use teloxide::prelude::*;
use teloxide::types::{CallbackQuery, ChatId, MaybeInaccessibleMessage, MessageId, ParseMode};

use crate::auto_delete::{BULK_POLICY, SINGLE_FILE_POLICY};
use crate::bot::BotContext;
use crate::channel_monitor::MovieEntry;
use crate::handlers::{
    can_use_feature, check_access, get_chat_id, get_message_id, Access, CommandHandler,
    PremiumHandler, RequestHandler, UserInfo, BANNED_TEXT, GENERIC_ERROR_TEXT, PREMIUM_ONLY_TEXT,
};
use crate::search::{
    file_caption, format_results_page, results_keyboard, without_bulk_button, SessionError,
};

const EXPIRED_SESSION_TEXT: &str = "⌛ These results have expired. Please search again.";
const FOREIGN_SESSION_TEXT: &str = "🚫 These results belong to another user.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackAction {
    Terms { accept: bool },
    GetFile { channel_id: i64, message_id: i32 },
    Page { session_id: String, page: usize },
    Bulk(String),
    HistorySearch(i32),
    RequestDone(i32),
    RequestPage(usize),
    RequestAllDone,
    Premium(String),
    PremiumToggle(String),
}

impl CallbackAction {
    pub fn parse(data: &str) -> Option<Self> {
        if let Some(choice) = data.strip_prefix("terms#") {
            return match choice {
                "accept" => Some(CallbackAction::Terms { accept: true }),
                "decline" => Some(CallbackAction::Terms { accept: false }),
                _ => None,
            };
        }
        if let Some(rest) = data.strip_prefix("get_file:") {
            let (channel_id, message_id) = rest.split_once(':')?;
            return Some(CallbackAction::GetFile {
                channel_id: channel_id.parse().ok()?,
                message_id: message_id.parse().ok()?,
            });
        }
        if let Some(rest) = data.strip_prefix("page:") {
            let (session_id, page) = rest.rsplit_once(':')?;
            return Some(CallbackAction::Page {
                session_id: session_id.to_string(),
                page: page.parse().ok()?,
            });
        }
        if let Some(bulk_id) = data.strip_prefix("bulk:") {
            return Some(CallbackAction::Bulk(bulk_id.to_string()));
        }
        if let Some(history_id) = data.strip_prefix("hsearch#") {
            return history_id.parse().ok().map(CallbackAction::HistorySearch);
        }
        if let Some(id) = data.strip_prefix("req_done:") {
            return id.parse().ok().map(CallbackAction::RequestDone);
        }
        if let Some(page) = data.strip_prefix("req_page:") {
            return page.parse().ok().map(CallbackAction::RequestPage);
        }
        if data == "req_all_done" {
            return Some(CallbackAction::RequestAllDone);
        }
        if let Some(name) = data.strip_prefix("premium_toggle:") {
            return Some(CallbackAction::PremiumToggle(name.to_string()));
        }
        if let Some(action) = data.strip_prefix("premium:") {
            return Some(CallbackAction::Premium(action.to_string()));
        }
        None
    }
}

pub struct CallbackHandler;

impl CallbackHandler {
    pub async fn handle_callback_query(ctx: BotContext, query: CallbackQuery) -> ResponseResult<()> {
        let Some(action) = query.data.as_deref().and_then(CallbackAction::parse) else {
            ctx.bot.answer_callback_query(&query.id).await?;
            return Ok(());
        };
        let Some(message) = &query.message else {
            ctx.bot.answer_callback_query(&query.id).await?;
            return Ok(());
        };
        let chat_id = get_chat_id(message);
        let message_id = get_message_id(message);
        let user_id = query.from.id.0 as i64;

        if let CallbackAction::Terms { accept } = action {
            return Self::handle_terms_callback(ctx, &query, chat_id, message_id, accept).await;
        }

        match check_access(&ctx, user_id).await {
            Ok(Access::Allowed) => {}
            Ok(Access::Banned) => {
                Self::alert(&ctx, &query, BANNED_TEXT).await?;
                return Ok(());
            }
            Ok(Access::TermsRequired) => {
                Self::alert(&ctx, &query, "📜 Please accept the terms first. Send /start.").await?;
                return Ok(());
            }
            Err(e) => {
                error!("Access check failed for {}: {}", user_id, e);
                Self::alert(&ctx, &query, GENERIC_ERROR_TEXT).await?;
                return Ok(());
            }
        }

        match action {
            CallbackAction::Terms { .. } => {}
            CallbackAction::GetFile {
                channel_id,
                message_id: file_message_id,
            } => {
                Self::handle_get_file(ctx, &query, chat_id, user_id, channel_id, file_message_id).await?
            }
            CallbackAction::Page { session_id, page } => {
                Self::handle_page(ctx, &query, chat_id, message_id, user_id, &session_id, page).await?
            }
            CallbackAction::Bulk(bulk_id) => {
                Self::handle_bulk(ctx, &query, chat_id, message_id, user_id, &bulk_id).await?
            }
            CallbackAction::HistorySearch(history_id) => {
                Self::handle_history_search(ctx, &query, chat_id, user_id, history_id).await?
            }
            CallbackAction::RequestDone(request_id) => {
                RequestHandler::handle_done_callback(ctx, &query, chat_id, message_id, request_id).await?
            }
            CallbackAction::RequestPage(page) => {
                RequestHandler::handle_page_callback(ctx, &query, chat_id, message_id, page).await?
            }
            CallbackAction::RequestAllDone => {
                RequestHandler::handle_all_done_callback(ctx, &query, chat_id, message_id).await?
            }
            CallbackAction::Premium(action) => {
                PremiumHandler::handle_menu_callback(ctx, &query, chat_id, message_id, &action).await?
            }
            CallbackAction::PremiumToggle(feature) => {
                PremiumHandler::handle_toggle_callback(ctx, &query, chat_id, message_id, &feature).await?
            }
        }
        Ok(())
    }

    pub async fn alert(ctx: &BotContext, query: &CallbackQuery, text: &str) -> ResponseResult<()> {
        ctx.bot
            .answer_callback_query(&query.id)
            .text(text)
            .show_alert(true)
            .await?;
        Ok(())
    }

    async fn handle_terms_callback(
        ctx: BotContext,
        query: &CallbackQuery,
        chat_id: ChatId,
        message_id: MessageId,
        accept: bool,
    ) -> ResponseResult<()> {
        let user = UserInfo::from_user(&query.from);

        if !accept {
            ctx.bot.answer_callback_query(&query.id).await?;
            ctx.bot
                .edit_message_text(
                    chat_id,
                    message_id,
                    "❌ You declined the Terms of Use.\n\nYou can't use the bot until you accept them. Send /start to review them again.",
                )
                .await?;
            return Ok(());
        }

        let result = async {
            ctx.user_manager
                .get_or_create_user(user.telegram_user_id, user.username, user.first_name, user.last_name)
                .await?;
            ctx.user_manager.accept_terms(user.telegram_user_id).await
        }
        .await;

        if let Err(e) = result {
            error!("Failed to accept terms for {}: {}", user.telegram_user_id, e);
            Self::alert(&ctx, query, GENERIC_ERROR_TEXT).await?;
            return Ok(());
        }

        ctx.bot
            .answer_callback_query(&query.id)
            .text("✅ Terms accepted")
            .await?;
        ctx.bot
            .edit_message_text(
                chat_id,
                message_id,
                "✅ Thank you for accepting the Terms of Use!\n\nYou can now use the bot. Send /help to see available commands.",
            )
            .await?;
        ctx.log_action("accept_terms", Some(user.telegram_user_id), None, None)
            .await;
        Ok(())
    }

    /// copies the indexed post to the user with a caption built from the index row
    async fn send_file(ctx: &BotContext, chat_id: ChatId, entry: &MovieEntry) -> ResponseResult<MessageId> {
        ctx.bot
            .copy_message(chat_id, ChatId(entry.channel_id), MessageId(entry.message_id))
            .caption(file_caption(entry))
            .parse_mode(ParseMode::Html)
            .await
    }

    async fn handle_get_file(
        ctx: BotContext,
        query: &CallbackQuery,
        chat_id: ChatId,
        user_id: i64,
        channel_id: i64,
        file_message_id: i32,
    ) -> ResponseResult<()> {
        let entry = match ctx.channel_monitor.get_entry(channel_id, file_message_id).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                Self::alert(&ctx, query, "❌ This file is no longer in the index.").await?;
                return Ok(());
            }
            Err(e) => {
                error!("Failed to load index row {}/{}: {}", channel_id, file_message_id, e);
                Self::alert(&ctx, query, GENERIC_ERROR_TEXT).await?;
                return Ok(());
            }
        };

        let sent = match Self::send_file(&ctx, chat_id, &entry).await {
            Ok(sent) => sent,
            Err(e) => {
                warn!("Failed to copy {}/{} to {}: {}", channel_id, file_message_id, chat_id, e);
                Self::alert(&ctx, query, "❌ Could not send this file. It may have been removed from the channel.")
                    .await?;
                return Ok(());
            }
        };

        // a callback can only be answered once, so this is the final result
        ctx.bot
            .answer_callback_query(&query.id)
            .text("✅ File sent!")
            .await?;

        if let Err(e) = ctx
            .user_manager
            .record_download(user_id, channel_id, file_message_id)
            .await
        {
            error!("Failed to record download for {}: {}", user_id, e);
        }

        match ctx
            .deletions
            .schedule(chat_id.0, sent.0, SINGLE_FILE_POLICY)
            .await
        {
            Ok(_) => {
                ctx.bot
                    .send_message(chat_id, SINGLE_FILE_POLICY.notice())
                    .parse_mode(ParseMode::Html)
                    .await?;
            }
            Err(e) => error!("Failed to schedule deletion of {} in {}: {}", sent.0, chat_id, e),
        }
        info!("Sent '{}' to user {}", entry.title, user_id);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn handle_page(
        ctx: BotContext,
        query: &CallbackQuery,
        chat_id: ChatId,
        message_id: MessageId,
        user_id: i64,
        session_id: &str,
        page: usize,
    ) -> ResponseResult<()> {
        let session = match ctx.sessions.get(session_id, user_id) {
            Ok(session) => session,
            Err(SessionError::NotFound) => {
                Self::alert(&ctx, query, EXPIRED_SESSION_TEXT).await?;
                return Ok(());
            }
            Err(SessionError::NotOwner) => {
                Self::alert(&ctx, query, FOREIGN_SESSION_TEXT).await?;
                return Ok(());
            }
        };

        ctx.bot.answer_callback_query(&query.id).await?;
        ctx.bot
            .edit_message_text(
                chat_id,
                message_id,
                format_results_page(&session.query, &session.hits, page),
            )
            .parse_mode(ParseMode::Html)
            .reply_markup(results_keyboard(
                session_id,
                &session.hits,
                page,
                session.bulk_id.as_deref(),
            ))
            .await?;
        Ok(())
    }

    async fn handle_bulk(
        ctx: BotContext,
        query: &CallbackQuery,
        chat_id: ChatId,
        message_id: MessageId,
        user_id: i64,
        bulk_id: &str,
    ) -> ResponseResult<()> {
        if !can_use_feature(&ctx, user_id, "get_all").await {
            Self::alert(&ctx, query, PREMIUM_ONLY_TEXT).await?;
            return Ok(());
        }

        let bulk = match ctx.sessions.take_bulk(bulk_id, user_id) {
            Ok(bulk) => bulk,
            Err(SessionError::NotFound) => {
                Self::alert(&ctx, query, EXPIRED_SESSION_TEXT).await?;
                return Ok(());
            }
            Err(SessionError::NotOwner) => {
                Self::alert(&ctx, query, FOREIGN_SESSION_TEXT).await?;
                return Ok(());
            }
        };

        let total = bulk.files.len();
        ctx.bot
            .answer_callback_query(&query.id)
            .text(format!("📦 Sending {} files...", total))
            .await?;

        if let Some(MaybeInaccessibleMessage::Regular(results)) = &query.message {
            if let Some(keyboard) = results.reply_markup() {
                if let Err(e) = ctx
                    .bot
                    .edit_message_reply_markup(chat_id, message_id)
                    .reply_markup(without_bulk_button(keyboard))
                    .await
                {
                    warn!("Failed to remove Get All button in {}: {}", chat_id, e);
                }
            }
        }

        let mut sent_count = 0;
        for (channel_id, file_message_id) in bulk.files {
            let entry = match ctx.channel_monitor.get_entry(channel_id, file_message_id).await {
                Ok(Some(entry)) => entry,
                Ok(None) => continue,
                Err(e) => {
                    error!("Failed to load index row {}/{}: {}", channel_id, file_message_id, e);
                    continue;
                }
            };
            match Self::send_file(&ctx, chat_id, &entry).await {
                Ok(sent) => {
                    sent_count += 1;
                    if let Err(e) = ctx.deletions.schedule(chat_id.0, sent.0, BULK_POLICY).await {
                        error!("Failed to schedule deletion of {} in {}: {}", sent.0, chat_id, e);
                    }
                }
                Err(e) => warn!("Failed to copy {}/{} to {}: {}", channel_id, file_message_id, chat_id, e),
            }
        }

        if sent_count > 0 {
            if let Err(e) = ctx
                .user_manager
                .record_bulk_download(user_id, sent_count as i32)
                .await
            {
                error!("Failed to record bulk download for {}: {}", user_id, e);
            }
        }

        ctx.bot
            .send_message(
                chat_id,
                format!(
                    "✅ Successfully sent {}/{} files!\n\n{}",
                    sent_count,
                    total,
                    BULK_POLICY.notice()
                ),
            )
            .parse_mode(ParseMode::Html)
            .await?;
        info!("Bulk delivery to {}: {}/{} files", user_id, sent_count, total);
        Ok(())
    }

    async fn handle_history_search(
        ctx: BotContext,
        query: &CallbackQuery,
        chat_id: ChatId,
        user_id: i64,
        history_id: i32,
    ) -> ResponseResult<()> {
        let search_query = match ctx.user_manager.history_query(user_id, history_id).await {
            Ok(Some(search_query)) => search_query,
            Ok(None) => {
                Self::alert(&ctx, query, "⌛ This search is no longer in your history.").await?;
                return Ok(());
            }
            Err(e) => {
                error!("Failed to load history entry {} of {}: {}", history_id, user_id, e);
                Self::alert(&ctx, query, GENERIC_ERROR_TEXT).await?;
                return Ok(());
            }
        };

        ctx.bot.answer_callback_query(&query.id).await?;
        CommandHandler::run_search(&ctx, chat_id, user_id, &search_query, false).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_file_and_page_actions() {
        assert_eq!(
            CallbackAction::parse("get_file:-1001234567890:42"),
            Some(CallbackAction::GetFile {
                channel_id: -1001234567890,
                message_id: 42
            })
        );
        assert_eq!(
            CallbackAction::parse("page:0a1b2c3d:2"),
            Some(CallbackAction::Page {
                session_id: "0a1b2c3d".to_string(),
                page: 2
            })
        );
        assert_eq!(
            CallbackAction::parse("bulk:deadbeef"),
            Some(CallbackAction::Bulk("deadbeef".to_string()))
        );
        assert_eq!(CallbackAction::parse("get_file:abc:1"), None);
    }

    #[test]
    fn test_parse_terms_history_and_request_actions() {
        assert_eq!(
            CallbackAction::parse("terms#accept"),
            Some(CallbackAction::Terms { accept: true })
        );
        assert_eq!(
            CallbackAction::parse("terms#decline"),
            Some(CallbackAction::Terms { accept: false })
        );
        assert_eq!(CallbackAction::parse("terms#maybe"), None);
        assert_eq!(
            CallbackAction::parse("hsearch#1503"),
            Some(CallbackAction::HistorySearch(1503))
        );
        assert_eq!(
            CallbackAction::parse("req_done:17"),
            Some(CallbackAction::RequestDone(17))
        );
        assert_eq!(
            CallbackAction::parse("req_page:2"),
            Some(CallbackAction::RequestPage(2))
        );
        assert_eq!(
            CallbackAction::parse("req_all_done"),
            Some(CallbackAction::RequestAllDone)
        );
    }

    #[test]
    fn test_parse_premium_actions() {
        assert_eq!(
            CallbackAction::parse("premium:add_users"),
            Some(CallbackAction::Premium("add_users".to_string()))
        );
        assert_eq!(
            CallbackAction::parse("premium_toggle:get_all"),
            Some(CallbackAction::PremiumToggle("get_all".to_string()))
        );
        assert_eq!(CallbackAction::parse("buy_single"), None);
    }
}
