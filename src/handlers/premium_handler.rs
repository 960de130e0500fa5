use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde_json::json;
use std::time::Duration;
use teloxide::prelude::*;
use teloxide::types::{CallbackQuery, ChatId, InlineKeyboardButton, InlineKeyboardMarkup, MessageId, ParseMode};

use crate::bot::BotContext;
use crate::handlers::{
    require_admin, resolve_user_id, wait_for_text, CallbackHandler, TextReply, UserInfo,
    ADMINS_ONLY_TEXT, GENERIC_ERROR_TEXT,
};
use crate::premium::{whole_days_remaining, PremiumError, PremiumFeature, PremiumUser};
use crate::utils::MessageFormatter;

const PREMIUM_INPUT_TIMEOUT: Duration = Duration::from_secs(120);
const START_OVER: &str = "Use /premium to start over.";
/// keeps "premium_toggle:{name}" under Telegram's 64 byte callback limit
const MAX_FEATURE_NAME_LEN: usize = 40;

const USER_PROMPT: &str = "Please send the User ID or Username of the user.\n\nYou can type <b>CANCEL</b> to abort.";

pub fn is_valid_feature_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_FEATURE_NAME_LEN
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// "+7", "7" and "-3" are accepted; zero is rejected by the manager
pub fn parse_days_delta(input: &str) -> Option<i64> {
    input.trim().parse::<i64>().ok()
}

fn format_date(date: DateTime<Utc>) -> String {
    date.format("%Y-%m-%d %H:%M UTC").to_string()
}

pub fn premium_menu_text() -> &'static str {
    "💎 <b>Premium Management</b>\n\nChoose an action:"
}

pub fn premium_menu_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![
            InlineKeyboardButton::callback("➕ Add Users", "premium:add_users"),
            InlineKeyboardButton::callback("✏️ Edit Users", "premium:edit_users"),
        ],
        vec![
            InlineKeyboardButton::callback("➖ Remove Users", "premium:remove_users"),
            InlineKeyboardButton::callback("📋 List Users", "premium:list_users"),
        ],
        vec![InlineKeyboardButton::callback(
            "⚙️ Manage Features",
            "premium:manage_features",
        )],
    ])
}

pub fn features_text(features: &[PremiumFeature]) -> String {
    let mut text = String::from("⚙️ <b>Manage Features</b>\n\nFeatures marked as ON are premium-only.\n");
    if features.is_empty() {
        text.push_str("\nNo features configured.");
    }
    for feature in features {
        text.push_str(&format!(
            "\n• <code>{}</code>: {}",
            MessageFormatter::escape_html(&feature.feature_name),
            MessageFormatter::escape_html(&feature.description)
        ));
    }
    text
}

pub fn features_keyboard(features: &[PremiumFeature]) -> InlineKeyboardMarkup {
    let mut rows: Vec<Vec<InlineKeyboardButton>> = features
        .iter()
        .map(|feature| {
            let state = if feature.premium_only { "ON" } else { "OFF" };
            vec![InlineKeyboardButton::callback(
                format!("[{}] {}", state, MessageFormatter::truncate(&feature.description, 40)),
                format!("premium_toggle:{}", feature.feature_name),
            )]
        })
        .collect();
    rows.push(vec![InlineKeyboardButton::callback(
        "➕ Add New Feature",
        "premium:add_feature",
    )]);
    rows.push(vec![InlineKeyboardButton::callback("← Back", "premium:back")]);
    InlineKeyboardMarkup::new(rows)
}

fn premium_user_label(user: &PremiumUser) -> String {
    match &user.username {
        Some(username) => format!(
            "@{} (<code>{}</code>)",
            MessageFormatter::escape_html(username),
            user.telegram_user_id
        ),
        None => format!("<code>{}</code>", user.telegram_user_id),
    }
}

pub fn format_premium_list(users: &[PremiumUser], now: DateTime<Utc>) -> String {
    if users.is_empty() {
        return "📋 <b>Premium Users</b>\n\nNo premium users yet.".to_string();
    }
    let mut text = format!("📋 <b>Premium Users</b> ({})\n", users.len());
    for (i, user) in users.iter().enumerate() {
        text.push_str(&format!(
            "\n{}. {} - {} days left",
            i + 1,
            premium_user_label(user),
            whole_days_remaining(user.expires_at, now)
        ));
    }
    text
}

pub fn format_premium_details(user: &PremiumUser, now: DateTime<Utc>) -> String {
    let added_by = user
        .granted_by
        .map(|id| id.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    format!(
        "💎 <b>Premium User</b> {}\n\n\
         📅 Days Left: {}\n\
         ⏳ Expiry: {}\n\
         👤 Added By: <code>{}</code>\n\
         🗓 Added Date: {}",
        premium_user_label(user),
        whole_days_remaining(user.expires_at, now),
        format_date(user.expires_at),
        added_by,
        format_date(user.granted_at)
    )
}

/// the username to store alongside a grant, when the admin typed one
fn typed_username(input: &str) -> Option<String> {
    let input = input.trim();
    if input.parse::<i64>().is_ok() {
        return None;
    }
    let name = input.trim_start_matches('@');
    (!name.is_empty()).then(|| name.to_string())
}

pub struct PremiumHandler;

impl PremiumHandler {
    pub async fn handle_premium_command(ctx: BotContext, msg: Message) -> ResponseResult<()> {
        let Some(user_id) = UserInfo::from_message(&msg).map(|user| user.telegram_user_id) else {
            return Ok(());
        };
        if !require_admin(&ctx, msg.chat.id, user_id).await? {
            return Ok(());
        }
        ctx.bot
            .send_message(msg.chat.id, premium_menu_text())
            .parse_mode(ParseMode::Html)
            .reply_markup(premium_menu_keyboard())
            .await?;
        Ok(())
    }

    pub async fn handle_menu_callback(
        ctx: BotContext,
        query: &CallbackQuery,
        chat_id: ChatId,
        message_id: MessageId,
        action: &str,
    ) -> ResponseResult<()> {
        let admin_id = query.from.id.0 as i64;
        if !ctx.is_admin(admin_id).await {
            CallbackHandler::alert(&ctx, query, ADMINS_ONLY_TEXT).await?;
            return Ok(());
        }
        ctx.bot.answer_callback_query(&query.id).await?;

        match action {
            "back" => {
                ctx.bot
                    .edit_message_text(chat_id, message_id, premium_menu_text())
                    .parse_mode(ParseMode::Html)
                    .reply_markup(premium_menu_keyboard())
                    .await?;
            }
            "manage_features" => Self::show_features(&ctx, chat_id, message_id).await?,
            "list_users" => match ctx.premium_manager.list_premium().await {
                Ok(users) => {
                    ctx.bot
                        .edit_message_text(chat_id, message_id, format_premium_list(&users, Utc::now()))
                        .parse_mode(ParseMode::Html)
                        .reply_markup(InlineKeyboardMarkup::new(vec![vec![
                            InlineKeyboardButton::callback("← Back", "premium:back"),
                        ]]))
                        .await?;
                }
                Err(e) => {
                    error!("Failed to list premium users: {}", e);
                    ctx.bot.send_message(chat_id, GENERIC_ERROR_TEXT).await?;
                }
            },
            "add_users" | "edit_users" | "remove_users" | "add_feature" => {
                let action = action.to_string();
                tokio::spawn(async move {
                    let result = match action.as_str() {
                        "add_users" => Self::run_add_flow(&ctx, chat_id, admin_id).await,
                        "edit_users" => Self::run_edit_flow(&ctx, chat_id, admin_id).await,
                        "remove_users" => Self::run_remove_flow(&ctx, chat_id, admin_id).await,
                        _ => Self::run_add_feature_flow(&ctx, chat_id, admin_id).await,
                    };
                    if let Err(e) = result {
                        error!("Premium flow '{}' failed: {}", action, e);
                    }
                });
            }
            other => warn!("Unknown premium action '{}'", other),
        }
        Ok(())
    }

    pub async fn handle_toggle_callback(
        ctx: BotContext,
        query: &CallbackQuery,
        chat_id: ChatId,
        message_id: MessageId,
        feature: &str,
    ) -> ResponseResult<()> {
        let admin_id = query.from.id.0 as i64;
        if !ctx.is_admin(admin_id).await {
            CallbackHandler::alert(&ctx, query, ADMINS_ONLY_TEXT).await?;
            return Ok(());
        }

        let premium_only = match ctx.premium_manager.toggle_feature(feature).await {
            Ok(premium_only) => premium_only,
            Err(PremiumError::FeatureNotFound(_)) => {
                CallbackHandler::alert(&ctx, query, "❌ Feature not found.").await?;
                return Ok(());
            }
            Err(e) => {
                error!("Failed to toggle feature '{}': {}", feature, e);
                CallbackHandler::alert(&ctx, query, GENERIC_ERROR_TEXT).await?;
                return Ok(());
            }
        };

        let state = if premium_only { "ON" } else { "OFF" };
        ctx.bot
            .answer_callback_query(&query.id)
            .text(format!("{} is now {}", feature, state))
            .await?;
        ctx.log_action(
            "premium_feature_toggled",
            Some(admin_id),
            None,
            Some(json!({ "feature": feature, "premium_only": premium_only })),
        )
        .await;

        Self::show_features(&ctx, chat_id, message_id).await
    }

    async fn show_features(ctx: &BotContext, chat_id: ChatId, message_id: MessageId) -> ResponseResult<()> {
        match ctx.premium_manager.list_features().await {
            Ok(features) => {
                ctx.bot
                    .edit_message_text(chat_id, message_id, features_text(&features))
                    .parse_mode(ParseMode::Html)
                    .reply_markup(features_keyboard(&features))
                    .await?;
            }
            Err(e) => {
                error!("Failed to list premium features: {}", e);
                ctx.bot.send_message(chat_id, GENERIC_ERROR_TEXT).await?;
            }
        }
        Ok(())
    }

    async fn ask(ctx: &BotContext, chat_id: ChatId, admin_id: i64, prompt: &str) -> ResponseResult<Option<String>> {
        ctx.bot
            .send_message(chat_id, prompt)
            .parse_mode(ParseMode::Html)
            .await?;
        let reply = match wait_for_text(ctx, chat_id, admin_id, PREMIUM_INPUT_TIMEOUT).await {
            TextReply::Text(text) => return Ok(Some(text)),
            TextReply::Cancelled => "❌ Cancelled.".to_string(),
            TextReply::NotText => format!("❌ Please reply with text. {}", START_OVER),
            TextReply::TimedOut => format!("⏰ Timeout. {}", START_OVER),
        };
        ctx.bot.send_message(chat_id, reply).await?;
        Ok(None)
    }

    /// asks for a user and resolves it; None once the flow should stop
    async fn ask_user(
        ctx: &BotContext,
        chat_id: ChatId,
        admin_id: i64,
        title: &str,
    ) -> ResponseResult<Option<(i64, String)>> {
        let prompt = format!("<b>{}</b>\n\n{}", title, USER_PROMPT);
        let Some(input) = Self::ask(ctx, chat_id, admin_id, &prompt).await? else {
            return Ok(None);
        };
        match resolve_user_id(ctx, &input).await {
            Ok(Some(user_id)) => Ok(Some((user_id, input))),
            Ok(None) => {
                ctx.bot
                    .send_message(
                        chat_id,
                        format!("❌ Invalid User ID or unknown username. {}", START_OVER),
                    )
                    .await?;
                Ok(None)
            }
            Err(e) => {
                error!("Failed to resolve user '{}': {}", input, e);
                ctx.bot.send_message(chat_id, GENERIC_ERROR_TEXT).await?;
                Ok(None)
            }
        }
    }

    /// looks up an existing premium record, replying when there is none
    async fn existing_premium(
        ctx: &BotContext,
        chat_id: ChatId,
        user_id: i64,
    ) -> ResponseResult<Option<PremiumUser>> {
        match ctx.premium_manager.get_premium(user_id).await {
            Ok(Some(premium)) => Ok(Some(premium)),
            Ok(None) => {
                ctx.bot
                    .send_message(chat_id, format!("❌ User {} is not a premium user.", user_id))
                    .await?;
                Ok(None)
            }
            Err(e) => {
                error!("Failed to load premium record of {}: {}", user_id, e);
                ctx.bot.send_message(chat_id, GENERIC_ERROR_TEXT).await?;
                Ok(None)
            }
        }
    }

    async fn run_add_flow(ctx: &BotContext, chat_id: ChatId, admin_id: i64) -> ResponseResult<()> {
        let Some((user_id, input)) = Self::ask_user(ctx, chat_id, admin_id, "Add Premium User").await? else {
            return Ok(());
        };
        let Some(days_input) = Self::ask(
            ctx,
            chat_id,
            admin_id,
            &format!("How many days of premium should <code>{}</code> get?", user_id),
        )
        .await?
        else {
            return Ok(());
        };
        let days = match days_input.parse::<i64>() {
            Ok(days) if days > 0 => days,
            _ => {
                ctx.bot
                    .send_message(chat_id, "❌ Days must be a positive number.")
                    .await?;
                return Ok(());
            }
        };

        let username = typed_username(&input);
        let expiry = match ctx
            .premium_manager
            .add_premium(user_id, days, admin_id, username.as_deref())
            .await
        {
            Ok(expiry) => expiry,
            Err(PremiumError::DatabaseError(e)) => {
                error!("Failed to add premium for {}: {}", user_id, e);
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
                    "✅ Premium granted to <code>{}</code> for {} days.\n⏳ Expiry: {}",
                    user_id,
                    days,
                    format_date(expiry)
                ),
            )
            .parse_mode(ParseMode::Html)
            .await?;
        ctx.log_action(
            "premium_added",
            Some(admin_id),
            Some(user_id),
            Some(json!({ "days": days, "expires_at": expiry.to_rfc3339() })),
        )
        .await;

        if let Err(e) = ctx
            .bot
            .send_message(
                ChatId(user_id),
                format!(
                    "💎 You have been granted premium access for {} days!\n⏳ Expiry: {}",
                    days,
                    format_date(expiry)
                ),
            )
            .await
        {
            warn!("Failed to notify {} about premium: {}", user_id, e);
        }
        Ok(())
    }

    async fn run_edit_flow(ctx: &BotContext, chat_id: ChatId, admin_id: i64) -> ResponseResult<()> {
        let Some((user_id, _)) = Self::ask_user(ctx, chat_id, admin_id, "Edit Premium User").await? else {
            return Ok(());
        };
        let Some(premium) = Self::existing_premium(ctx, chat_id, user_id).await? else {
            return Ok(());
        };

        let prompt = format!(
            "{}\n\nSend the number of days to add or remove (e.g. <code>+7</code> or <code>-3</code>).",
            format_premium_details(&premium, Utc::now())
        );
        let Some(delta_input) = Self::ask(ctx, chat_id, admin_id, &prompt).await? else {
            return Ok(());
        };
        let Some(delta) = parse_days_delta(&delta_input) else {
            ctx.bot
                .send_message(chat_id, format!("❌ Invalid number of days. {}", START_OVER))
                .await?;
            return Ok(());
        };

        match ctx.premium_manager.edit_premium(user_id, delta, admin_id).await {
            Ok(expiry) => {
                ctx.bot
                    .send_message(
                        chat_id,
                        format!(
                            "✅ Premium of <code>{}</code> updated ({:+} days).\n⏳ New expiry: {}",
                            user_id,
                            delta,
                            format_date(expiry)
                        ),
                    )
                    .parse_mode(ParseMode::Html)
                    .await?;
                ctx.log_action(
                    "premium_edited",
                    Some(admin_id),
                    Some(user_id),
                    Some(json!({ "delta_days": delta, "expires_at": expiry.to_rfc3339() })),
                )
                .await;
            }
            Err(PremiumError::ZeroDelta) => {
                ctx.bot
                    .send_message(chat_id, "❌ Days delta cannot be zero.")
                    .await?;
            }
            Err(PremiumError::DatabaseError(e)) => {
                error!("Failed to edit premium for {}: {}", user_id, e);
                ctx.bot.send_message(chat_id, GENERIC_ERROR_TEXT).await?;
            }
            Err(e) => {
                ctx.bot.send_message(chat_id, format!("❌ {}", e)).await?;
            }
        }
        Ok(())
    }

    async fn run_remove_flow(ctx: &BotContext, chat_id: ChatId, admin_id: i64) -> ResponseResult<()> {
        let Some((user_id, _)) = Self::ask_user(ctx, chat_id, admin_id, "Remove Premium User").await? else {
            return Ok(());
        };
        let Some(premium) = Self::existing_premium(ctx, chat_id, user_id).await? else {
            return Ok(());
        };

        let prompt = format!(
            "{}\n\n⚠️ Type <b>YES</b> to remove premium access.",
            format_premium_details(&premium, Utc::now())
        );
        let Some(confirmation) = Self::ask(ctx, chat_id, admin_id, &prompt).await? else {
            return Ok(());
        };
        if confirmation != "YES" {
            ctx.bot.send_message(chat_id, "❌ Removal cancelled.").await?;
            return Ok(());
        }

        match ctx.premium_manager.remove_premium(user_id).await {
            Ok(()) => {
                ctx.bot
                    .send_message(
                        chat_id,
                        format!("✅ Premium removed from <code>{}</code>.", user_id),
                    )
                    .parse_mode(ParseMode::Html)
                    .await?;
                ctx.log_action("premium_removed", Some(admin_id), Some(user_id), None)
                    .await;
                info!("Premium of {} removed by {}", user_id, admin_id);
            }
            Err(PremiumError::NotPremium(_)) => {
                ctx.bot
                    .send_message(chat_id, format!("❌ User {} is not a premium user.", user_id))
                    .await?;
            }
            Err(e) => {
                error!("Failed to remove premium for {}: {}", user_id, e);
                ctx.bot.send_message(chat_id, GENERIC_ERROR_TEXT).await?;
            }
        }
        Ok(())
    }

    async fn run_add_feature_flow(ctx: &BotContext, chat_id: ChatId, admin_id: i64) -> ResponseResult<()> {
        let Some(name) = Self::ask(
            ctx,
            chat_id,
            admin_id,
            "<b>Add New Feature</b>\n\nSend the feature name (letters, digits and underscores).\n\nYou can type <b>CANCEL</b> to abort.",
        )
        .await?
        else {
            return Ok(());
        };
        if !is_valid_feature_name(&name) {
            ctx.bot
                .send_message(
                    chat_id,
                    format!(
                        "❌ Feature names may only contain letters, digits and underscores (max {} characters). {}",
                        MAX_FEATURE_NAME_LEN, START_OVER
                    ),
                )
                .await?;
            return Ok(());
        }

        let Some(description) =
            Self::ask(ctx, chat_id, admin_id, "📝 Send a short description for the feature.").await?
        else {
            return Ok(());
        };

        match ctx.premium_manager.add_feature(&name, &description, admin_id).await {
            Ok(()) => {
                ctx.bot
                    .send_message(
                        chat_id,
                        format!(
                            "✅ Feature <code>{}</code> added as premium-only.",
                            MessageFormatter::escape_html(&name)
                        ),
                    )
                    .parse_mode(ParseMode::Html)
                    .await?;
                ctx.log_action(
                    "premium_feature_added",
                    Some(admin_id),
                    None,
                    Some(json!({ "feature": name, "description": description })),
                )
                .await;
            }
            Err(PremiumError::DatabaseError(e)) => {
                error!("Failed to add feature '{}': {}", name, e);
                ctx.bot.send_message(chat_id, GENERIC_ERROR_TEXT).await?;
            }
            Err(e) => {
                ctx.bot.send_message(chat_id, format!("❌ {}", e)).await?;
            }
        }
        Ok(())
    }
}
