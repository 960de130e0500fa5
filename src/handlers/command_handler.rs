use chrono::Utc;
use log::{error, info};
use teloxide::prelude::*;
use teloxide::types::{ChatId, InlineKeyboardButton, InlineKeyboardMarkup, ParseMode};

use crate::bot::{BotContext, Command};
use crate::handlers::{
    can_use_feature, check_access, Access, AdminHandler, PremiumHandler, RequestHandler, UserInfo,
    BANNED_TEXT, GENERIC_ERROR_TEXT, PREMIUM_ONLY_TEXT, TERMS_REQUIRED_TEXT,
};
use crate::recent::{format_recent, group_recent, RECENT_LIMIT};
use crate::search::{format_metadata_card, format_results_page, results_keyboard};
use crate::statistics::{collection_failed, format_user_stats};
use crate::user_manager::{
    SearchHistoryEntry, UserManagerError, PREFERENCE_KEYS, SEARCH_HISTORY_LIMIT,
};
use crate::utils::message_formatter::TELEGRAM_MESSAGE_LIMIT;
use crate::utils::MessageFormatter;

pub const USER_HELP: &str = "🤖 <b>Movie Bot Commands</b>\n\
/search &lt;title&gt; - Search (exact + fuzzy)\n\
/f &lt;title&gt; - Shortcut for search\n\
/search -e &lt;title&gt; - Exact search (full title)\n\
/metadata &lt;title&gt; - Show rich metadata\n\
/recent - Recently added content\n\
/request - Request a movie or series\n\
/my_history - Your search history\n\
/my_prefs - Show or set preferences\n\
/mystat - Your usage statistics\n\
/help - Show this message\n\n\
💡 <b>Search tips</b>\n\
• Use /f for quick searches\n\
• Use -e for exact title matches\n\
• Type @botname &lt;title&gt; in any chat for inline search";

pub const ADMIN_HELP: &str = "👑 <b>Admin Commands</b>\n\
/add_channel &lt;link|id|@username&gt; - Monitor a channel\n\
/remove_channel &lt;link|id|@username&gt; - Stop monitoring\n\
/list_channels - List channels\n\
/channel_stats - Indexed files per channel\n\
/toggle_indexing - Turn auto-indexing on/off\n\
/indexing_stats - Indexing counters\n\
/reset_stats - Reset indexing counters\n\
/reset - Delete the whole index\n\
/reset_channel - Delete one channel's index\n\
/promote, /demote &lt;user&gt; - Manage admins\n\
/ban_user, /unban_user &lt;user&gt; - Manage bans\n\
/request_list - Pending requests\n\
/premium - Premium management\n\
/stats, /quickstat - Statistics\n\
/export_stats json|csv - Export statistics\n\
/broadcast [message] - Message every user";

/// splits "/search" arguments into (query, exact); None when there is nothing to search
pub fn parse_search_args(args: &str) -> Option<(String, bool)> {
    let args = args.trim();
    let (query, exact) = match args.strip_prefix("-e") {
        Some(rest) if rest.is_empty() || rest.starts_with(char::is_whitespace) => (rest.trim(), true),
        _ => (args, false),
    };
    if query.is_empty() {
        None
    } else {
        Some((query.to_string(), exact))
    }
}

pub struct CommandHandler;

impl CommandHandler {
    pub async fn handle_command(ctx: BotContext, msg: Message, cmd: Command) -> ResponseResult<()> {
        let Some(user) = UserInfo::from_message(&msg) else {
            return Ok(());
        };
        let user_id = user.telegram_user_id;

        if let Err(e) = ctx
            .user_manager
            .get_or_create_user(user_id, user.username, user.first_name, user.last_name)
            .await
        {
            error!("Failed to get/create user {}: {}", user_id, e);
            ctx.bot.send_message(msg.chat.id, GENERIC_ERROR_TEXT).await?;
            return Ok(());
        }

        let access = match check_access(&ctx, user_id).await {
            Ok(access) => access,
            Err(e) => {
                error!("Access check failed for {}: {}", user_id, e);
                ctx.bot.send_message(msg.chat.id, GENERIC_ERROR_TEXT).await?;
                return Ok(());
            }
        };
        match access {
            Access::Banned => {
                ctx.bot.send_message(msg.chat.id, BANNED_TEXT).await?;
                return Ok(());
            }
            Access::TermsRequired if cmd != Command::Start => {
                ctx.bot.send_message(msg.chat.id, TERMS_REQUIRED_TEXT).await?;
                return Ok(());
            }
            _ => {}
        }

        info!("User {} issued {:?}", user_id, cmd);

        match cmd {
            Command::Start => Self::handle_start_command(ctx, msg).await?,
            Command::Help => Self::handle_help_command(ctx, msg, user_id).await?,
            Command::Search(args) | Command::F(args) => {
                Self::handle_search_command(ctx, msg, user_id, &args).await?
            }
            Command::Metadata(query) => Self::handle_metadata_command(ctx, msg, &query).await?,
            Command::Recent => Self::handle_recent_command(ctx, msg, user_id).await?,
            Command::MyHistory => Self::handle_history_command(ctx, msg, user_id).await?,
            Command::MyPrefs(args) => Self::handle_prefs_command(ctx, msg, user_id, &args).await?,
            Command::Mystat => Self::handle_mystat_command(ctx, msg, user_id).await?,
            Command::Request => RequestHandler::handle_request_command(ctx, msg).await?,
            Command::RequestList => RequestHandler::handle_request_list_command(ctx, msg).await?,
            Command::Premium => PremiumHandler::handle_premium_command(ctx, msg).await?,
            admin_command => AdminHandler::handle_command(ctx, msg, admin_command).await?,
        }
        Ok(())
    }

    async fn handle_start_command(ctx: BotContext, msg: Message) -> ResponseResult<()> {
        let Some(user) = UserInfo::from_message(&msg) else {
            return Ok(());
        };

        let accepted = match ctx.user_manager.has_accepted_terms(user.telegram_user_id).await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!("Failed to read terms status for {}: {}", user.telegram_user_id, e);
                ctx.bot.send_message(msg.chat.id, GENERIC_ERROR_TEXT).await?;
                return Ok(());
            }
        };

        if accepted {
            let name = user.first_name.unwrap_or("there");
            ctx.bot
                .send_message(
                    msg.chat.id,
                    format!(
                        "👋 <b>Welcome back, {}!</b>\n\nYou're all set to use the bot.\n\nUse /help to see available commands.",
                        MessageFormatter::escape_html(name)
                    ),
                )
                .parse_mode(ParseMode::Html)
                .await?;
            return Ok(());
        }

        let keyboard = InlineKeyboardMarkup::new(vec![
            vec![InlineKeyboardButton::callback("✅ Yes, I Agree", "terms#accept")],
            vec![InlineKeyboardButton::callback("❌ Decline", "terms#decline")],
        ]);

        // the buttons go under the last chunk
        let chunks = MessageFormatter::split_message_into_chunks(&ctx.terms_text, TELEGRAM_MESSAGE_LIMIT);
        let last = chunks.len().saturating_sub(1);
        for (i, chunk) in chunks.into_iter().enumerate() {
            let request = ctx.bot.send_message(msg.chat.id, chunk);
            if i == last {
                request.reply_markup(keyboard.clone()).await?;
            } else {
                request.await?;
            }
        }
        Ok(())
    }

    async fn handle_help_command(ctx: BotContext, msg: Message, user_id: i64) -> ResponseResult<()> {
        let mut text = USER_HELP.to_string();
        if ctx.is_admin(user_id).await {
            text.push_str("\n\n");
            text.push_str(ADMIN_HELP);
        }
        ctx.bot
            .send_message(msg.chat.id, text)
            .parse_mode(ParseMode::Html)
            .await?;
        Ok(())
    }

    async fn handle_search_command(
        ctx: BotContext,
        msg: Message,
        user_id: i64,
        args: &str,
    ) -> ResponseResult<()> {
        match parse_search_args(args) {
            Some((query, exact)) => Self::run_search(&ctx, msg.chat.id, user_id, &query, exact).await,
            None => {
                ctx.bot
                    .send_message(msg.chat.id, "Usage: /search <title>\nExact match: /search -e <title>")
                    .await?;
                Ok(())
            }
        }
    }

    /// records the query, runs the search and sends the first result page
    pub async fn run_search(
        ctx: &BotContext,
        chat_id: ChatId,
        user_id: i64,
        query: &str,
        exact: bool,
    ) -> ResponseResult<()> {
        if let Err(e) = ctx.user_manager.record_search(user_id, query).await {
            error!("Failed to record search for {}: {}", user_id, e);
        }

        let hits = match ctx.search_engine.perform_search(query, exact).await {
            Ok(hits) => hits,
            Err(e) => {
                error!("Search '{}' failed: {}", query, e);
                ctx.bot.send_message(chat_id, GENERIC_ERROR_TEXT).await?;
                return Ok(());
            }
        };

        if hits.is_empty() {
            let text = if exact {
                format!(
                    "⚠️ No exact matches found for \"{}\"\n\n💡 Try normal search: /search {}\n🔍 Normal search finds partial and similar titles",
                    query, query
                )
            } else {
                "⚠️ No results found for your search.".to_string()
            };
            ctx.bot.send_message(chat_id, text).await?;
            return Ok(());
        }

        let allow_bulk = can_use_feature(ctx, user_id, "get_all").await;
        let session_id = ctx.sessions.create(user_id, query, hits, allow_bulk);
        let session = match ctx.sessions.get(&session_id, user_id) {
            Ok(session) => session,
            Err(e) => {
                error!("Search session {} vanished: {:?}", session_id, e);
                ctx.bot.send_message(chat_id, GENERIC_ERROR_TEXT).await?;
                return Ok(());
            }
        };

        ctx.bot
            .send_message(chat_id, format_results_page(query, &session.hits, 1))
            .parse_mode(ParseMode::Html)
            .reply_markup(results_keyboard(
                &session_id,
                &session.hits,
                1,
                session.bulk_id.as_deref(),
            ))
            .await?;
        Ok(())
    }

    async fn handle_metadata_command(ctx: BotContext, msg: Message, query: &str) -> ResponseResult<()> {
        let query = query.trim();
        if query.is_empty() {
            ctx.bot.send_message(msg.chat.id, "Usage: /metadata <title>").await?;
            return Ok(());
        }

        match ctx.search_engine.best_match(query).await {
            Ok(Some(entry)) => {
                ctx.bot
                    .send_message(msg.chat.id, format_metadata_card(&entry))
                    .parse_mode(ParseMode::Html)
                    .await?;
            }
            Ok(None) => {
                ctx.bot
                    .send_message(msg.chat.id, "No metadata found for that title.")
                    .await?;
            }
            Err(e) => {
                error!("Metadata lookup '{}' failed: {}", query, e);
                ctx.bot.send_message(msg.chat.id, GENERIC_ERROR_TEXT).await?;
            }
        }
        Ok(())
    }

    async fn handle_recent_command(ctx: BotContext, msg: Message, user_id: i64) -> ResponseResult<()> {
        if !can_use_feature(&ctx, user_id, "recent").await {
            ctx.bot.send_message(msg.chat.id, PREMIUM_ONLY_TEXT).await?;
            return Ok(());
        }

        let entries = match ctx.search_engine.recent(RECENT_LIMIT).await {
            Ok(entries) => entries,
            Err(e) => {
                error!("Failed to load recent content: {}", e);
                ctx.bot.send_message(msg.chat.id, GENERIC_ERROR_TEXT).await?;
                return Ok(());
            }
        };

        if entries.is_empty() {
            ctx.bot
                .send_message(msg.chat.id, "📭 No content has been indexed yet.")
                .await?;
            return Ok(());
        }

        let text = format_recent(&group_recent(&entries));
        for chunk in MessageFormatter::split_message_into_chunks(&text, TELEGRAM_MESSAGE_LIMIT) {
            ctx.bot
                .send_message(msg.chat.id, chunk)
                .parse_mode(ParseMode::Html)
                .await?;
        }
        Ok(())
    }

    async fn handle_history_command(ctx: BotContext, msg: Message, user_id: i64) -> ResponseResult<()> {
        let history = match ctx.user_manager.search_history(user_id, SEARCH_HISTORY_LIMIT).await {
            Ok(history) => history,
            Err(e) => {
                error!("Failed to load search history for {}: {}", user_id, e);
                ctx.bot.send_message(msg.chat.id, GENERIC_ERROR_TEXT).await?;
                return Ok(());
            }
        };

        if history.is_empty() {
            ctx.bot
                .send_message(msg.chat.id, "You have no search history.")
                .await?;
            return Ok(());
        }

        let mut text = String::from("🕘 <b>Your recent searches</b>\n\n");
        for entry in &history {
            text.push_str(&format!(
                "<code>{}</code> - {}\n",
                entry.searched_at.format("%Y-%m-%d %H:%M"),
                MessageFormatter::escape_html(&entry.query)
            ));
        }

        ctx.bot
            .send_message(msg.chat.id, text.trim_end().to_string())
            .parse_mode(ParseMode::Html)
            .reply_markup(history_keyboard(&history))
            .await?;
        Ok(())
    }

    async fn handle_prefs_command(
        ctx: BotContext,
        msg: Message,
        user_id: i64,
        args: &str,
    ) -> ResponseResult<()> {
        let args = args.trim();
        if args.is_empty() {
            let text = match ctx.user_manager.preferences(user_id).await {
                Ok(prefs) if prefs.is_empty() => format!(
                    "You have no preferences set.\n\nAvailable keys: {}\nUsage: /my_prefs <key> <value>",
                    PREFERENCE_KEYS.join(", ")
                ),
                Ok(prefs) => {
                    let mut text = String::from("⚙️ Your preferences:\n");
                    for (key, value) in &prefs {
                        let value = value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string());
                        text.push_str(&format!("• {}: {}\n", key, value));
                    }
                    text
                }
                Err(e) => {
                    error!("Failed to load preferences for {}: {}", user_id, e);
                    GENERIC_ERROR_TEXT.to_string()
                }
            };
            ctx.bot.send_message(msg.chat.id, text).await?;
            return Ok(());
        }

        let mut parts = args.splitn(2, char::is_whitespace);
        let key = parts.next().unwrap_or_default();
        let value = parts.next().map(str::trim).unwrap_or_default();
        if value.is_empty() {
            ctx.bot
                .send_message(msg.chat.id, "Usage: /my_prefs <key> <value>")
                .await?;
            return Ok(());
        }

        let text = match ctx.user_manager.set_preference(user_id, key, value).await {
            Ok(()) => format!("✅ Set preference {} = {}", key, value),
            Err(UserManagerError::InvalidPreference(_)) => format!(
                "❌ Unknown preference key. Available keys: {}",
                PREFERENCE_KEYS.join(", ")
            ),
            Err(e) => {
                error!("Failed to set preference for {}: {}", user_id, e);
                GENERIC_ERROR_TEXT.to_string()
            }
        };
        ctx.bot.send_message(msg.chat.id, text).await?;
        Ok(())
    }

    async fn handle_mystat_command(ctx: BotContext, msg: Message, user_id: i64) -> ResponseResult<()> {
        let text = match ctx.statistics.collect_user(user_id).await {
            Ok(Some(stats)) => format_user_stats(&stats, Utc::now()),
            Ok(None) => "No statistics yet. Try a /search first!".to_string(),
            Err(e) => collection_failed(e.as_ref()),
        };
        ctx.bot
            .send_message(msg.chat.id, text)
            .parse_mode(ParseMode::Html)
            .await?;
        Ok(())
    }
}

/// one re-search button per distinct query; buttons carry the history row id
pub fn history_keyboard(history: &[SearchHistoryEntry]) -> InlineKeyboardMarkup {
    let mut seen = Vec::new();
    let mut buttons = Vec::new();
    for entry in history {
        let key = entry.query.to_lowercase();
        if seen.contains(&key) {
            continue;
        }
        seen.push(key);
        buttons.push(vec![InlineKeyboardButton::callback(
            format!("🔍 {}", MessageFormatter::truncate(&entry.query, 30)),
            format!("hsearch#{}", entry.id),
        )]);
    }
    InlineKeyboardMarkup::new(buttons)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use teloxide::types::InlineKeyboardButtonKind;

    fn entry(id: i32, query: &str) -> SearchHistoryEntry {
        SearchHistoryEntry {
            id,
            query: query.to_string(),
            searched_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_history_buttons_carry_row_ids() {
        let keyboard = history_keyboard(&[
            entry(40, "Dune"),
            entry(31, "Inception"),
            entry(12, "dune"),
            entry(9, "Heat"),
        ]);
        let data: Vec<&str> = keyboard
            .inline_keyboard
            .iter()
            .map(|row| match &row[0].kind {
                InlineKeyboardButtonKind::CallbackData(data) => data.as_str(),
                other => panic!("unexpected button {:?}", other),
            })
            .collect();
        assert_eq!(data, vec!["hsearch#40", "hsearch#31", "hsearch#9"]);
    }

    #[test]
    fn test_parse_search_args() {
        assert_eq!(parse_search_args("Inception"), Some(("Inception".to_string(), false)));
        assert_eq!(
            parse_search_args("  -e  The Matrix "),
            Some(("The Matrix".to_string(), true))
        );
        assert_eq!(parse_search_args("-e"), None);
        assert_eq!(parse_search_args("   "), None);
    }

    #[test]
    fn test_dash_e_inside_a_word_is_not_a_flag() {
        assert_eq!(
            parse_search_args("-eternals"),
            Some(("-eternals".to_string(), false))
        );
    }
}
