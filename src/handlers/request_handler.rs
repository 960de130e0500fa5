use chrono::{Datelike, Utc};
use log::{error, info, warn};
use serde_json::json;
use std::time::Duration;
use teloxide::prelude::*;
use teloxide::types::{
    CallbackQuery, ChatId, InlineKeyboardButton, InlineKeyboardMarkup, MessageId, ParseMode,
};

use crate::bot::BotContext;
use crate::handlers::{
    can_use_feature, require_admin, wait_for_text, CallbackHandler, TextReply, UserInfo,
    ADMINS_ONLY_TEXT, GENERIC_ERROR_TEXT, PREMIUM_ONLY_TEXT,
};
use crate::metadata_parser::ContentType;
use crate::requests::{
    format_request_page, total_pages, validate_imdb_link, RequestError, RequestRecord,
    REQUESTS_PER_PAGE,
};
use crate::tmdb::format_suggestions;
use crate::user_manager::Role;
use crate::utils::MessageFormatter;

const REQUEST_INPUT_TIMEOUT: Duration = Duration::from_secs(120);
const START_OVER: &str = "Use /request to start over.";

/// Some(None) for "skip", Some(year) for a plausible release year, None otherwise
pub fn parse_year(input: &str, current_year: i32) -> Option<Option<i32>> {
    let input = input.trim();
    if input.eq_ignore_ascii_case("skip") {
        return Some(None);
    }
    match input.parse::<i32>() {
        Ok(year) if (1888..=current_year + 2).contains(&year) => Some(Some(year)),
        _ => None,
    }
}

/// per-request "Done" buttons, page navigation and the bulk action
pub fn request_list_keyboard(requests: &[RequestRecord], page: usize) -> InlineKeyboardMarkup {
    let pages = total_pages(requests.len());
    let page = page.clamp(1, pages);
    let start = (page - 1) * REQUESTS_PER_PAGE;

    let mut rows: Vec<Vec<InlineKeyboardButton>> = requests
        .iter()
        .enumerate()
        .skip(start)
        .take(REQUESTS_PER_PAGE)
        .map(|(i, request)| {
            vec![InlineKeyboardButton::callback(
                format!(
                    "✅ Done {}. {}",
                    i + 1,
                    MessageFormatter::truncate(&request.title, 25)
                ),
                format!("req_done:{}", request.id),
            )]
        })
        .collect();

    let mut nav_row = Vec::new();
    if page > 1 {
        nav_row.push(InlineKeyboardButton::callback(
            "← Prev",
            format!("req_page:{}", page - 1),
        ));
    }
    if page < pages {
        nav_row.push(InlineKeyboardButton::callback(
            "Next →",
            format!("req_page:{}", page + 1),
        ));
    }
    if !nav_row.is_empty() {
        rows.push(nav_row);
    }
    if !requests.is_empty() {
        rows.push(vec![InlineKeyboardButton::callback(
            "✅ Mark all done",
            "req_all_done",
        )]);
    }
    InlineKeyboardMarkup::new(rows)
}

pub fn fulfilled_text(request: &RequestRecord) -> String {
    format!(
        "✅ <b>Request Fulfilled!</b>\n\nYour request for <b>{}</b> has been fulfilled.\n\nThank you for using our service!",
        MessageFormatter::escape_html(&request.display_title())
    )
}

pub struct RequestHandler;

impl RequestHandler {
    pub async fn handle_request_command(ctx: BotContext, msg: Message) -> ResponseResult<()> {
        let Some(user) = UserInfo::from_message(&msg) else {
            return Ok(());
        };
        let user_id = user.telegram_user_id;
        let username = user.username.map(str::to_string);

        if !can_use_feature(&ctx, user_id, "request").await {
            ctx.bot.send_message(msg.chat.id, PREMIUM_ONLY_TEXT).await?;
            return Ok(());
        }

        // limits are checked up front so nobody types a whole request in vain
        match ctx.request_manager.check_limits(user_id).await {
            Ok(()) => {}
            Err(RequestError::DatabaseError(e)) => {
                error!("Request limit check failed for {}: {}", user_id, e);
                ctx.bot.send_message(msg.chat.id, GENERIC_ERROR_TEXT).await?;
                return Ok(());
            }
            Err(e) => {
                ctx.bot.send_message(msg.chat.id, format!("❌ {}", e)).await?;
                return Ok(());
            }
        }

        let chat_id = msg.chat.id;
        tokio::spawn(async move {
            if let Err(e) = Self::run_request_flow(ctx, chat_id, user_id, username).await {
                error!("Request flow failed: {}", e);
            }
        });
        Ok(())
    }

    async fn ask(ctx: &BotContext, chat_id: ChatId, user_id: i64, prompt: &str) -> ResponseResult<Option<String>> {
        ctx.bot
            .send_message(chat_id, prompt)
            .parse_mode(ParseMode::Html)
            .await?;
        let reply = match wait_for_text(ctx, chat_id, user_id, REQUEST_INPUT_TIMEOUT).await {
            TextReply::Text(text) => return Ok(Some(text)),
            TextReply::Cancelled => "❌ Request cancelled.".to_string(),
            TextReply::NotText => format!("❌ Please reply with text. {}", START_OVER),
            TextReply::TimedOut => format!("⏰ Timeout. {}", START_OVER),
        };
        ctx.bot.send_message(chat_id, reply).await?;
        Ok(None)
    }

    async fn run_request_flow(
        ctx: BotContext,
        chat_id: ChatId,
        user_id: i64,
        username: Option<String>,
    ) -> ResponseResult<()> {
        let Some(title) = Self::ask(
            &ctx,
            chat_id,
            user_id,
            "🎬 <b>Request a Movie or Series</b>\n\nSend the title you are looking for.\n\nYou can type <b>CANCEL</b> to abort.",
        )
        .await?
        else {
            return Ok(());
        };

        let Some(year_input) = Self::ask(
            &ctx,
            chat_id,
            user_id,
            "📅 Send the release year (e.g. 2010), or <b>skip</b> if you don't know it.",
        )
        .await?
        else {
            return Ok(());
        };
        let Some(year) = parse_year(&year_input, Utc::now().year()) else {
            ctx.bot
                .send_message(chat_id, format!("❌ Invalid year. {}", START_OVER))
                .await?;
            return Ok(());
        };

        let mut imdb_prompt = String::new();
        if ctx.tmdb.is_enabled() {
            let suggestions = ctx.tmdb.search(&title, year, ContentType::Movie).await;
            if !suggestions.is_empty() {
                imdb_prompt.push_str("🔎 <b>Possible matches on TMDB:</b>\n");
                imdb_prompt.push_str(&format_suggestions(&suggestions));
                imdb_prompt.push_str("\n\n");
            }
        }
        imdb_prompt.push_str(
            "🔗 Send the IMDB link (e.g. https://www.imdb.com/title/tt1375666/), or <b>skip</b>.",
        );

        let Some(imdb_input) = Self::ask(&ctx, chat_id, user_id, &imdb_prompt).await? else {
            return Ok(());
        };
        let imdb_link = if imdb_input.eq_ignore_ascii_case("skip") {
            None
        } else if validate_imdb_link(&imdb_input) {
            Some(imdb_input)
        } else {
            ctx.bot
                .send_message(chat_id, format!("❌ Invalid IMDB link. {}", START_OVER))
                .await?;
            return Ok(());
        };

        let (record, position) = match ctx
            .request_manager
            .submit(user_id, username.as_deref(), &title, year, imdb_link.as_deref())
            .await
        {
            Ok(submitted) => submitted,
            Err(RequestError::DatabaseError(e)) => {
                error!("Failed to store request of {}: {}", user_id, e);
                ctx.bot.send_message(chat_id, GENERIC_ERROR_TEXT).await?;
                return Ok(());
            }
            Err(e) => {
                ctx.bot.send_message(chat_id, format!("❌ {}", e)).await?;
                return Ok(());
            }
        };

        ctx.bot
            .send_message(
                chat_id,
                format!(
                    "✅ <b>Request submitted!</b>\n\n🎬 {}\n📊 Queue position: #{}\n\nYou will be notified when it is available.",
                    MessageFormatter::escape_html(&record.display_title()),
                    position
                ),
            )
            .parse_mode(ParseMode::Html)
            .await?;

        ctx.log_action(
            "request_submitted",
            Some(user_id),
            None,
            Some(json!({ "request_id": record.id, "title": record.display_title() })),
        )
        .await;
        Self::notify_admins(&ctx, &record).await;
        Ok(())
    }

    async fn notify_admins(ctx: &BotContext, record: &RequestRecord) {
        let mut admins = ctx.config.admins.clone();
        match ctx.user_manager.list_by_role(Role::Admin).await {
            Ok(users) => admins.extend(users.iter().map(|user| user.telegram_user_id)),
            Err(e) => error!("Failed to list admins: {}", e),
        }
        admins.sort_unstable();
        admins.dedup();

        let who = match &record.username {
            Some(username) => format!("@{}", MessageFormatter::escape_html(username)),
            None => record.telegram_user_id.to_string(),
        };
        let mut text = format!(
            "📥 <b>New request</b>\n\n🎬 {}\n👤 {}",
            MessageFormatter::escape_html(&record.display_title()),
            who
        );
        if let Some(link) = &record.imdb_link {
            text.push_str(&format!("\n🔗 {}", MessageFormatter::escape_html(link)));
        }
        text.push_str("\n\nUse /request_list to manage requests.");

        for admin in admins {
            if let Err(e) = ctx
                .bot
                .send_message(ChatId(admin), text.clone())
                .parse_mode(ParseMode::Html)
                .await
            {
                warn!("Failed to notify admin {} about request {}: {}", admin, record.id, e);
            }
        }
    }

    async fn notify_requester(ctx: &BotContext, record: &RequestRecord) {
        if let Err(e) = ctx
            .bot
            .send_message(ChatId(record.telegram_user_id), fulfilled_text(record))
            .parse_mode(ParseMode::Html)
            .await
        {
            warn!("Failed to notify {} about request {}: {}", record.telegram_user_id, record.id, e);
        }
    }

    pub async fn handle_request_list_command(ctx: BotContext, msg: Message) -> ResponseResult<()> {
        let Some(user_id) = UserInfo::from_message(&msg).map(|user| user.telegram_user_id) else {
            return Ok(());
        };
        if !require_admin(&ctx, msg.chat.id, user_id).await? {
            return Ok(());
        }

        match ctx.request_manager.list_pending().await {
            Ok(requests) if requests.is_empty() => {
                ctx.bot.send_message(msg.chat.id, "📭 No pending requests.").await?;
            }
            Ok(requests) => {
                ctx.bot
                    .send_message(msg.chat.id, format_request_page(&requests, 1))
                    .parse_mode(ParseMode::Html)
                    .reply_markup(request_list_keyboard(&requests, 1))
                    .await?;
            }
            Err(e) => {
                error!("Failed to list requests: {}", e);
                ctx.bot.send_message(msg.chat.id, GENERIC_ERROR_TEXT).await?;
            }
        }
        Ok(())
    }

    /// re-renders the pending list in place
    async fn refresh_list(
        ctx: &BotContext,
        chat_id: ChatId,
        message_id: MessageId,
        page: usize,
    ) -> ResponseResult<()> {
        let requests = match ctx.request_manager.list_pending().await {
            Ok(requests) => requests,
            Err(e) => {
                error!("Failed to list requests: {}", e);
                return Ok(());
            }
        };
        if requests.is_empty() {
            ctx.bot
                .edit_message_text(chat_id, message_id, "📭 No pending requests.")
                .await?;
            return Ok(());
        }
        ctx.bot
            .edit_message_text(chat_id, message_id, format_request_page(&requests, page))
            .parse_mode(ParseMode::Html)
            .reply_markup(request_list_keyboard(&requests, page))
            .await?;
        Ok(())
    }

    pub async fn handle_done_callback(
        ctx: BotContext,
        query: &CallbackQuery,
        chat_id: ChatId,
        message_id: MessageId,
        request_id: i32,
    ) -> ResponseResult<()> {
        let admin_id = query.from.id.0 as i64;
        if !ctx.is_admin(admin_id).await {
            CallbackHandler::alert(&ctx, query, ADMINS_ONLY_TEXT).await?;
            return Ok(());
        }

        let record = match ctx.request_manager.complete(request_id, admin_id).await {
            Ok(record) => record,
            Err(RequestError::NotFound(_)) => {
                CallbackHandler::alert(&ctx, query, "❌ Request not found.").await?;
                return Ok(());
            }
            Err(e) => {
                error!("Failed to complete request {}: {}", request_id, e);
                CallbackHandler::alert(&ctx, query, GENERIC_ERROR_TEXT).await?;
                return Ok(());
            }
        };

        ctx.bot
            .answer_callback_query(&query.id)
            .text("✅ Marked as done")
            .await?;
        Self::notify_requester(&ctx, &record).await;
        ctx.log_action(
            "request_completed",
            Some(admin_id),
            Some(record.telegram_user_id),
            Some(json!({ "request_id": record.id })),
        )
        .await;
        info!("Request {} completed by {}", record.id, admin_id);

        Self::refresh_list(&ctx, chat_id, message_id, 1).await
    }

    pub async fn handle_page_callback(
        ctx: BotContext,
        query: &CallbackQuery,
        chat_id: ChatId,
        message_id: MessageId,
        page: usize,
    ) -> ResponseResult<()> {
        if !ctx.is_admin(query.from.id.0 as i64).await {
            CallbackHandler::alert(&ctx, query, ADMINS_ONLY_TEXT).await?;
            return Ok(());
        }
        ctx.bot.answer_callback_query(&query.id).await?;
        Self::refresh_list(&ctx, chat_id, message_id, page).await
    }

    pub async fn handle_all_done_callback(
        ctx: BotContext,
        query: &CallbackQuery,
        chat_id: ChatId,
        message_id: MessageId,
    ) -> ResponseResult<()> {
        let admin_id = query.from.id.0 as i64;
        if !ctx.is_admin(admin_id).await {
            CallbackHandler::alert(&ctx, query, ADMINS_ONLY_TEXT).await?;
            return Ok(());
        }

        let completed = match ctx.request_manager.complete_all(admin_id).await {
            Ok(completed) => completed,
            Err(e) => {
                error!("Failed to complete all requests: {}", e);
                CallbackHandler::alert(&ctx, query, GENERIC_ERROR_TEXT).await?;
                return Ok(());
            }
        };

        ctx.bot
            .answer_callback_query(&query.id)
            .text(format!("✅ {} requests marked as done", completed.len()))
            .await?;
        for record in &completed {
            Self::notify_requester(&ctx, record).await;
        }
        ctx.log_action(
            "requests_all_completed",
            Some(admin_id),
            None,
            Some(json!({ "count": completed.len() })),
        )
        .await;

        ctx.bot
            .edit_message_text(
                chat_id,
                message_id,
                format!("✅ Marked {} requests as done.", completed.len()),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn request(id: i32, title: &str) -> RequestRecord {
        RequestRecord {
            id,
            telegram_user_id: 100 + id as i64,
            username: None,
            title: title.to_string(),
            year: Some(2010),
            imdb_link: None,
            status: "pending".to_string(),
            request_date: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_parse_year() {
        assert_eq!(parse_year("2010", 2024), Some(Some(2010)));
        assert_eq!(parse_year(" SKIP ", 2024), Some(None));
        assert_eq!(parse_year("1700", 2024), None);
        assert_eq!(parse_year("2030", 2024), None);
        assert_eq!(parse_year("soon", 2024), None);
    }

    #[test]
    fn test_request_list_keyboard_pages() {
        let requests: Vec<RequestRecord> = (1..=7).map(|i| request(i, "Inception")).collect();

        let first = request_list_keyboard(&requests, 1);
        // five done buttons, navigation, mark all
        assert_eq!(first.inline_keyboard.len(), 7);
        assert_eq!(first.inline_keyboard[5].len(), 1);

        let second = request_list_keyboard(&requests, 2);
        assert_eq!(second.inline_keyboard.len(), 4);
    }

    #[test]
    fn test_fulfilled_text_escapes_title() {
        let text = fulfilled_text(&request(1, "Tom & Jerry"));
        assert!(text.contains("<b>Tom &amp; Jerry (2010)</b>"));
    }
}
