use deadpool_postgres::Pool;
use log::{debug, info, warn};
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::types::{CallbackQuery, ChatId, InlineQuery, ParseMode};
use teloxide::utils::command::BotCommands;

use crate::auto_delete::{run_deletion_processor, DeletionScheduler};
use crate::channel_monitor::ChannelMonitor;
use crate::config::BotConfig;
use crate::conversation::InputWaiter;
use crate::handlers::{
    CallbackHandler, ChannelHandler, CommandHandler, InlineHandler, UserInfo,
};
use crate::premium::PremiumManager;
use crate::requests::RequestManager;
use crate::search::{SearchEngine, SearchSessions};
use crate::statistics::StatisticsCollector;
use crate::tmdb::TmdbClient;
use crate::user_manager::UserManager;
use crate::utils::MessageFormatter;

pub const DEFAULT_TERMS_TEXT: &str = "📜 Terms of Use and Privacy Policy\n\n\
    This bot indexes files that are already published in public Telegram channels \
    and helps you find them. It does not host any files itself.\n\n\
    We store your Telegram id, username, search history and download history \
    to run the service and to compute usage statistics. Files sent to you are \
    deleted automatically after a few minutes.\n\n\
    By tapping \"Yes, I Agree\" you accept these terms.";

#[derive(BotCommands, Clone, Debug, PartialEq)]
#[command(rename_rule = "snake_case", description = "Supported commands:")]
pub enum Command {
    #[command(description = "start the bot")]
    Start,
    #[command(description = "show available commands")]
    Help,
    #[command(description = "search the index (-e for exact titles)")]
    Search(String),
    #[command(description = "shortcut for /search")]
    F(String),
    #[command(description = "show rich metadata for a title")]
    Metadata(String),
    #[command(description = "recently added content")]
    Recent,
    #[command(description = "your search history")]
    MyHistory,
    #[command(description = "show or set preferences")]
    MyPrefs(String),
    #[command(description = "your usage statistics")]
    Mystat,
    #[command(description = "request a movie or series")]
    Request,
    #[command(description = "pending requests (admin)")]
    RequestList,
    #[command(description = "premium management (admin)")]
    Premium,
    #[command(description = "statistics dashboard (admin)")]
    Stats,
    #[command(description = "quick statistics (admin)")]
    Quickstat,
    #[command(description = "export statistics as json or csv (admin)")]
    ExportStats(String),
    #[command(description = "message every user (admin)")]
    Broadcast(String),
    #[command(description = "monitor a channel (admin)")]
    AddChannel(String),
    #[command(description = "stop monitoring a channel (admin)")]
    RemoveChannel(String),
    #[command(description = "list monitored channels (admin)")]
    ListChannels,
    #[command(description = "indexed files per channel (admin)")]
    ChannelStats,
    #[command(description = "turn auto-indexing on or off (admin)")]
    ToggleIndexing,
    #[command(description = "make a user admin (admin)")]
    Promote(String),
    #[command(description = "revoke admin rights (admin)")]
    Demote(String),
    #[command(description = "ban a user (admin)")]
    BanUser(String),
    #[command(description = "unban a user (admin)")]
    UnbanUser(String),
    #[command(description = "delete the whole index (admin)")]
    Reset,
    #[command(description = "delete the index of one channel (admin)")]
    ResetChannel,
    #[command(description = "indexing counters (admin)")]
    IndexingStats,
    #[command(description = "reset indexing counters (admin)")]
    ResetStats,
}

pub struct MovieIndexBot {
    ctx: BotContext,
}

#[derive(Clone)]
pub struct BotContext {
    pub bot: Arc<Bot>,
    pub config: Arc<BotConfig>,
    pub pool: Pool,
    pub user_manager: Arc<UserManager>,
    pub channel_monitor: Arc<ChannelMonitor>,
    pub search_engine: Arc<SearchEngine>,
    pub sessions: Arc<SearchSessions>,
    pub request_manager: Arc<RequestManager>,
    pub premium_manager: Arc<PremiumManager>,
    pub statistics: Arc<StatisticsCollector>,
    pub deletions: Arc<DeletionScheduler>,
    pub tmdb: TmdbClient,
    pub input_waiter: Arc<InputWaiter<Message>>,
    pub terms_text: Arc<String>,
}

impl BotContext {
    /// admin lookup for handlers; lookup failures count as "not admin"
    pub async fn is_admin(&self, telegram_user_id: i64) -> bool {
        match self.user_manager.is_admin(telegram_user_id).await {
            Ok(is_admin) => is_admin,
            Err(e) => {
                warn!("Admin check failed for {}: {}", telegram_user_id, e);
                false
            }
        }
    }

    /// stores the audit entry and mirrors it to the log channel when one is configured
    pub async fn log_action(
        &self,
        action: &str,
        by_user: Option<i64>,
        target: Option<i64>,
        extra: Option<serde_json::Value>,
    ) {
        let text = format_log_entry(action, by_user, target, extra.as_ref());
        self.user_manager
            .log_action(action, by_user, target, extra)
            .await;

        if let Some(channel) = self.config.log_channel {
            if let Err(e) = self
                .bot
                .send_message(ChatId(channel), text)
                .parse_mode(ParseMode::Html)
                .await
            {
                warn!("Failed to mirror action '{}' to log channel: {}", action, e);
            }
        }
    }
}

/// html line posted to the log channel for an audit entry
pub fn format_log_entry(
    action: &str,
    by_user: Option<i64>,
    target: Option<i64>,
    extra: Option<&serde_json::Value>,
) -> String {
    let mut text = format!("📝 <b>{}</b>", MessageFormatter::escape_html(action));
    if let Some(by_user) = by_user {
        text.push_str(&format!("\n👤 By: <code>{}</code>", by_user));
    }
    if let Some(target) = target {
        text.push_str(&format!("\n🎯 Target: <code>{}</code>", target));
    }
    if let Some(extra) = extra.filter(|value| !value.is_null()) {
        text.push_str(&format!(
            "\n<pre>{}</pre>",
            MessageFormatter::escape_html(&extra.to_string())
        ));
    }
    text
}

/// reads the terms from disk, falling back to the built-in text
pub fn load_terms_text(path: &str) -> String {
    match std::fs::read_to_string(path) {
        Ok(text) if !text.trim().is_empty() => text,
        Ok(_) => {
            warn!("Terms file {} is empty, using built-in terms", path);
            DEFAULT_TERMS_TEXT.to_string()
        }
        Err(e) => {
            warn!("Could not read terms file {}: {}, using built-in terms", path, e);
            DEFAULT_TERMS_TEXT.to_string()
        }
    }
}

impl MovieIndexBot {
    pub fn new(config: BotConfig, pool: Pool) -> Self {
        let bot = Arc::new(Bot::new(&config.bot_token));
        let terms_text = load_terms_text(&config.terms_file);

        let ctx = BotContext {
            bot,
            user_manager: Arc::new(UserManager::new(pool.clone(), config.admins.clone())),
            channel_monitor: Arc::new(ChannelMonitor::new(
                pool.clone(),
                config.auto_indexing_default,
            )),
            search_engine: Arc::new(SearchEngine::new(pool.clone(), config.fuzzy_threshold)),
            sessions: Arc::new(SearchSessions::new()),
            request_manager: Arc::new(RequestManager::new(pool.clone())),
            premium_manager: Arc::new(PremiumManager::new(pool.clone())),
            statistics: Arc::new(StatisticsCollector::new(pool.clone())),
            deletions: Arc::new(DeletionScheduler::new(pool.clone())),
            tmdb: TmdbClient::new(config.tmdb_api_key.clone()),
            input_waiter: Arc::new(InputWaiter::new()),
            terms_text: Arc::new(terms_text),
            config: Arc::new(config),
            pool,
        };

        Self { ctx }
    }

    pub async fn run(&self) {
        info!("Starting movie index bot...");

        let bot_clone = self.ctx.bot.clone();
        let deletions = self.ctx.deletions.clone();
        tokio::spawn(async move {
            run_deletion_processor(bot_clone, deletions).await;
        });

        let ctx = self.ctx.clone();

        let handler = dptree::entry()
            .branch(Update::filter_channel_post().endpoint({
                let ctx = ctx.clone();
                move |msg: Message| {
                    let ctx = ctx.clone();
                    async move { ChannelHandler::handle_channel_post(ctx, msg).await }
                }
            }))
            .branch(Update::filter_inline_query().endpoint({
                let ctx = ctx.clone();
                move |query: InlineQuery| {
                    let ctx = ctx.clone();
                    async move { InlineHandler::handle_inline_query(ctx, query).await }
                }
            }))
            .branch(Update::filter_callback_query().endpoint({
                let ctx = ctx.clone();
                move |query: CallbackQuery| {
                    let ctx = ctx.clone();
                    async move { CallbackHandler::handle_callback_query(ctx, query).await }
                }
            }))
            .branch(
                Update::filter_message()
                    // replies to a running conversation never reach command routing
                    .branch(
                        dptree::filter({
                            let ctx = ctx.clone();
                            move |msg: Message| Self::is_awaited(&ctx, &msg)
                        })
                        .endpoint({
                            let ctx = ctx.clone();
                            move |msg: Message| {
                                let ctx = ctx.clone();
                                async move { Self::deliver_awaited(ctx, msg).await }
                            }
                        }),
                    )
                    .branch(dptree::entry().filter_command::<Command>().endpoint({
                        let ctx = ctx.clone();
                        move |msg: Message, cmd: Command| {
                            let ctx = ctx.clone();
                            async move { CommandHandler::handle_command(ctx, msg, cmd).await }
                        }
                    }))
                    .branch(dptree::endpoint({
                        let ctx = ctx.clone();
                        move |msg: Message| {
                            let ctx = ctx.clone();
                            async move { Self::handle_message(ctx, msg).await }
                        }
                    })),
            );

        Dispatcher::builder(self.ctx.bot.clone(), handler)
            .error_handler(
                teloxide::error_handlers::LoggingErrorHandler::with_custom_text(
                    "An error from the update listener",
                ),
            )
            .enable_ctrlc_handler()
            .build()
            .dispatch()
            .await;
    }

    fn is_awaited(ctx: &BotContext, msg: &Message) -> bool {
        match UserInfo::from_message(msg) {
            Some(user) => ctx
                .input_waiter
                .is_waiting(msg.chat.id.0, user.telegram_user_id),
            None => false,
        }
    }

    async fn deliver_awaited(ctx: BotContext, msg: Message) -> ResponseResult<()> {
        let Some(user_id) = UserInfo::from_message(&msg).map(|user| user.telegram_user_id) else {
            return Ok(());
        };
        let chat_id = msg.chat.id.0;
        if ctx.input_waiter.offer(chat_id, user_id, msg).is_err() {
            debug!("Conversation for chat {} user {} ended before input arrived", chat_id, user_id);
        }
        Ok(())
    }

    async fn handle_message(ctx: BotContext, msg: Message) -> ResponseResult<()> {
        let Some(text) = msg.text() else {
            return Ok(());
        };

        if text.starts_with('/') {
            ctx.bot
                .send_message(
                    msg.chat.id,
                    "❓ Unknown command. Use /help to see available commands.",
                )
                .await?;
        } else if msg.chat.is_private() {
            ctx.bot
                .send_message(
                    msg.chat.id,
                    "🔍 To find a movie, send /search followed by its title.\nExample: /search Inception",
                )
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_commands_parse_with_snake_case_names() {
        assert_eq!(
            Command::parse("/my_history", "moviebot").ok(),
            Some(Command::MyHistory)
        );
        assert_eq!(
            Command::parse("/search -e Inception", "moviebot").ok(),
            Some(Command::Search("-e Inception".to_string()))
        );
        assert_eq!(
            Command::parse("/f dune", "moviebot").ok(),
            Some(Command::F("dune".to_string()))
        );
        assert_eq!(
            Command::parse("/export_stats csv", "moviebot").ok(),
            Some(Command::ExportStats("csv".to_string()))
        );
    }

    #[test]
    fn test_format_log_entry() {
        let text = format_log_entry("ban_user", Some(1), Some(2), Some(&json!({"reason": "<spam>"})));
        assert!(text.starts_with("📝 <b>ban_user</b>"));
        assert!(text.contains("By: <code>1</code>"));
        assert!(text.contains("Target: <code>2</code>"));
        assert!(text.contains("&lt;spam&gt;"));

        let bare = format_log_entry("toggle_indexing", None, None, None);
        assert_eq!(bare, "📝 <b>toggle_indexing</b>");
    }

    #[test]
    fn test_missing_terms_file_uses_builtin_text() {
        let text = load_terms_text("/nonexistent/terms.md");
        assert_eq!(text, DEFAULT_TERMS_TEXT);
    }

    #[test]
    fn test_terms_file_is_loaded() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"Custom terms").unwrap();
        let path = file.path().to_str().unwrap().to_string();
        assert_eq!(load_terms_text(&path), "Custom terms");

        let empty = tempfile::NamedTempFile::new().unwrap();
        let empty_path = empty.path().to_str().unwrap().to_string();
        assert_eq!(load_terms_text(&empty_path), DEFAULT_TERMS_TEXT);
    }
}
