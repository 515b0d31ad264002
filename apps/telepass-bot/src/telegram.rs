//! Seam between the moderation core and the Telegram Bot API.
//!
//! All provider-error inspection lives in `classify_request_error`; the rest
//! of the crate only ever sees the `ApiFailure` taxonomy.

use async_trait::async_trait;
use std::fmt;
use teloxide::prelude::*;
use teloxide::types::{ChatId, ChatMemberKind, Recipient, UserId};
use teloxide::{ApiError, RequestError};

/// Provider errors, collapsed to the four categories moderation cares about
/// (Telegram's 400 / 403 / 429 / everything else).
#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiFailure {
    #[error("invalid user/chat or target not applicable: {0}")]
    BadRequest(String),
    #[error("bot not admin or no permission: {0}")]
    Forbidden(String),
    #[error("rate limit hit: {0}")]
    RateLimited(String),
    #[error("{0}")]
    Other(String),
}

impl ApiFailure {
    /// 400/403 are definitive: the channel is unreachable for us and its
    /// persisted active flag should drop. 429/unknown say nothing about the
    /// channel itself.
    pub fn marks_channel_inactive(&self) -> bool {
        matches!(self, ApiFailure::BadRequest(_) | ApiFailure::Forbidden(_))
    }
}

/// The bot's own membership status in a channel, as reported by
/// `getChatMember`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotStanding {
    Administrator,
    Owner,
    Member,
    Restricted,
    Left,
    Kicked,
}

impl BotStanding {
    pub fn is_admin(&self) -> bool {
        matches!(self, BotStanding::Administrator | BotStanding::Owner)
    }
}

impl fmt::Display for BotStanding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BotStanding::Administrator => "administrator",
            BotStanding::Owner => "creator",
            BotStanding::Member => "member",
            BotStanding::Restricted => "restricted",
            BotStanding::Left => "left",
            BotStanding::Kicked => "kicked",
        };
        f.write_str(s)
    }
}

/// Channel-management calls the moderation core issues. Implemented over
/// teloxide in production and by a recording fake in tests.
#[async_trait]
pub trait ChannelApi: Send + Sync {
    async fn ban_chat_member(&self, chat_id: &str, user_id: i64) -> Result<(), ApiFailure>;

    /// With `only_if_banned`, lifting a non-existent ban is a no-op success.
    async fn unban_chat_member(
        &self,
        chat_id: &str,
        user_id: i64,
        only_if_banned: bool,
    ) -> Result<(), ApiFailure>;

    /// The bot's own standing in the chat.
    async fn bot_standing(&self, chat_id: &str) -> Result<BotStanding, ApiFailure>;
}

/// Production implementation over a teloxide `Bot`.
#[derive(Clone)]
pub struct BotChannelApi {
    bot: Bot,
    bot_id: UserId,
}

impl BotChannelApi {
    pub fn new(bot: Bot, bot_id: UserId) -> Self {
        Self { bot, bot_id }
    }
}

/// Stored chat ids are either numeric ("-1001234…") or public "@name" refs.
fn recipient(chat_id: &str) -> Result<Recipient, ApiFailure> {
    if chat_id.starts_with('@') {
        return Ok(Recipient::ChannelUsername(chat_id.to_string()));
    }
    chat_id
        .parse::<i64>()
        .map(|n| Recipient::Id(ChatId(n)))
        .map_err(|_| ApiFailure::BadRequest(format!("malformed chat id `{}`", chat_id)))
}

#[async_trait]
impl ChannelApi for BotChannelApi {
    async fn ban_chat_member(&self, chat_id: &str, user_id: i64) -> Result<(), ApiFailure> {
        let chat = recipient(chat_id)?;
        self.bot
            .ban_chat_member(chat, UserId(user_id as u64))
            .await
            .map(|_| ())
            .map_err(classify_request_error)
    }

    async fn unban_chat_member(
        &self,
        chat_id: &str,
        user_id: i64,
        only_if_banned: bool,
    ) -> Result<(), ApiFailure> {
        let chat = recipient(chat_id)?;
        self.bot
            .unban_chat_member(chat, UserId(user_id as u64))
            .only_if_banned(only_if_banned)
            .await
            .map(|_| ())
            .map_err(classify_request_error)
    }

    async fn bot_standing(&self, chat_id: &str) -> Result<BotStanding, ApiFailure> {
        let chat = recipient(chat_id)?;
        let member = self
            .bot
            .get_chat_member(chat, self.bot_id)
            .await
            .map_err(classify_request_error)?;
        Ok(match member.kind {
            ChatMemberKind::Administrator(_) => BotStanding::Administrator,
            ChatMemberKind::Owner(_) => BotStanding::Owner,
            ChatMemberKind::Member(_) => BotStanding::Member,
            ChatMemberKind::Restricted(_) => BotStanding::Restricted,
            ChatMemberKind::Left => BotStanding::Left,
            ChatMemberKind::Banned(_) => BotStanding::Kicked,
        })
    }
}

/// Map teloxide's error surface onto the `ApiFailure` taxonomy. This is the
/// only place that inspects provider errors.
pub fn classify_request_error(err: RequestError) -> ApiFailure {
    match err {
        RequestError::RetryAfter(secs) => {
            ApiFailure::RateLimited(format!("retry after {}s", secs.seconds()))
        }
        RequestError::Api(api) => classify_api_error(api),
        other => ApiFailure::Other(other.to_string()),
    }
}

fn classify_api_error(err: ApiError) -> ApiFailure {
    match err {
        ApiError::ChatNotFound | ApiError::UserNotFound | ApiError::UserDeactivated => {
            ApiFailure::BadRequest(err.to_string())
        }
        ApiError::BotKicked
        | ApiError::BotKickedFromSupergroup
        | ApiError::BotBlocked
        | ApiError::NotEnoughRightsToRestrict
        | ApiError::CantRestrictSelf => ApiFailure::Forbidden(err.to_string()),
        ApiError::Unknown(text) => classify_unknown(text),
        other => ApiFailure::Other(other.to_string()),
    }
}

// Telegram reports plenty of conditions only as free text; sort the
// recognizable ones into the right bucket and keep the raw message.
fn classify_unknown(text: String) -> ApiFailure {
    let lower = text.to_lowercase();
    if lower.contains("too many requests") {
        ApiFailure::RateLimited(text)
    } else if lower.contains("rights") || lower.contains("admin") || lower.contains("kicked") {
        ApiFailure::Forbidden(text)
    } else if lower.contains("not found")
        || lower.contains("invalid")
        || lower.contains("participant")
        || lower.contains("not banned")
    {
        ApiFailure::BadRequest(text)
    } else {
        ApiFailure::Other(text)
    }
}
