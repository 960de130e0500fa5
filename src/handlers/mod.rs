pub mod admin_handler;
pub mod callback_handler;
pub mod channel_handler;
pub mod command_handler;
pub mod inline_handler;
pub mod premium_handler;
pub mod request_handler;

pub use admin_handler::AdminHandler;
pub use callback_handler::CallbackHandler;
pub use channel_handler::ChannelHandler;
pub use command_handler::CommandHandler;
pub use inline_handler::InlineHandler;
pub use premium_handler::PremiumHandler;
pub use request_handler::RequestHandler;

use log::error;
use std::time::Duration;
use teloxide::prelude::*;
use teloxide::types::{ChatId, MaybeInaccessibleMessage, MessageId};

use crate::bot::BotContext;
use crate::conversation::WaitError;
use crate::user_manager::UserManagerError;

pub const ADMINS_ONLY_TEXT: &str = "🚫 Admins only.";
pub const BANNED_TEXT: &str = "🚫 You are banned from using this bot.";
pub const TERMS_REQUIRED_TEXT: &str =
    "📜 Please accept the Terms of Use first. Send /start to review them.";
pub const PREMIUM_ONLY_TEXT: &str = "💎 This feature is available to premium users only.\n\n\
     Contact an administrator to get premium access.";
pub const GENERIC_ERROR_TEXT: &str = "❌ Something went wrong. Please try again later.";

#[derive(Debug, Clone, Copy)]
pub struct UserInfo<'a> {
    pub telegram_user_id: i64,
    pub username: Option<&'a str>,
    pub first_name: Option<&'a str>,
    pub last_name: Option<&'a str>,
}

impl<'a> UserInfo<'a> {
    pub fn from_user(user: &'a teloxide::types::User) -> Self {
        Self {
            telegram_user_id: user.id.0 as i64,
            username: user.username.as_deref(),
            first_name: Some(user.first_name.as_str()),
            last_name: user.last_name.as_deref(),
        }
    }

    pub fn from_message(msg: &'a Message) -> Option<Self> {
        msg.from.as_ref().map(Self::from_user)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Allowed,
    Banned,
    TermsRequired,
}

/// ban check first, then the terms gate; admins skip the terms gate
pub async fn check_access(ctx: &BotContext, telegram_user_id: i64) -> Result<Access, UserManagerError> {
    if ctx.user_manager.is_banned(telegram_user_id).await? {
        return Ok(Access::Banned);
    }
    if ctx.user_manager.is_admin(telegram_user_id).await? {
        return Ok(Access::Allowed);
    }
    if ctx.user_manager.has_accepted_terms(telegram_user_id).await? {
        Ok(Access::Allowed)
    } else {
        Ok(Access::TermsRequired)
    }
}

/// replies "Admins only" and returns false for non-admins
pub async fn require_admin(ctx: &BotContext, chat_id: ChatId, telegram_user_id: i64) -> ResponseResult<bool> {
    if ctx.is_admin(telegram_user_id).await {
        return Ok(true);
    }
    ctx.bot.send_message(chat_id, ADMINS_ONLY_TEXT).await?;
    Ok(false)
}

/// premium-only features are open to premium users and admins
pub async fn can_use_feature(ctx: &BotContext, telegram_user_id: i64, feature: &str) -> bool {
    let is_admin = ctx.is_admin(telegram_user_id).await;
    match ctx
        .premium_manager
        .can_use_feature(telegram_user_id, feature, is_admin)
        .await
    {
        Ok(allowed) => allowed,
        Err(e) => {
            error!("Feature check '{}' failed for {}: {}", feature, telegram_user_id, e);
            false
        }
    }
}

pub fn get_chat_id(message: &MaybeInaccessibleMessage) -> ChatId {
    match message {
        MaybeInaccessibleMessage::Regular(msg) => msg.chat.id,
        MaybeInaccessibleMessage::Inaccessible(msg) => msg.chat.id,
    }
}

pub fn get_message_id(message: &MaybeInaccessibleMessage) -> MessageId {
    match message {
        MaybeInaccessibleMessage::Regular(msg) => msg.id,
        MaybeInaccessibleMessage::Inaccessible(msg) => msg.message_id,
    }
}

/// outcome of asking the user for a line of text
#[derive(Debug, PartialEq, Eq)]
pub enum TextReply {
    Text(String),
    Cancelled,
    NotText,
    TimedOut,
}

pub fn is_cancel(text: &str) -> bool {
    text.trim().eq_ignore_ascii_case("cancel")
}

/// waits for the next message of the user in this chat and classifies it
pub async fn wait_for_text(
    ctx: &BotContext,
    chat_id: ChatId,
    telegram_user_id: i64,
    timeout: Duration,
) -> TextReply {
    match ctx
        .input_waiter
        .wait_for_input(chat_id.0, telegram_user_id, timeout)
        .await
    {
        Ok(reply) => match reply.text() {
            Some(text) if is_cancel(text) => TextReply::Cancelled,
            Some(text) => TextReply::Text(text.trim().to_string()),
            None => TextReply::NotText,
        },
        Err(WaitError::TimedOut) | Err(WaitError::Replaced) => TextReply::TimedOut,
    }
}

/// numeric ids are taken as-is, "@name" is looked up among known users
pub async fn resolve_user_id(ctx: &BotContext, input: &str) -> Result<Option<i64>, UserManagerError> {
    let input = input.trim();
    if let Ok(id) = input.parse::<i64>() {
        return Ok(Some(id));
    }
    if input.is_empty() {
        return Ok(None);
    }
    Ok(ctx
        .user_manager
        .find_by_username(input)
        .await?
        .map(|user| user.telegram_user_id))
}
