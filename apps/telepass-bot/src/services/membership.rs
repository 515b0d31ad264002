//! Per-channel membership mutations. Both helpers are total: every call
//! produces a `ChannelOutcome`, never a bare error, so a fan-out over N
//! channels always yields N tallied results.

use crate::telegram::{ApiFailure, ChannelApi};

/// Result of one membership action against one chat.
#[derive(Debug, Clone)]
pub enum ChannelOutcome {
    Success {
        chat_id: String,
        detail: String,
    },
    Error {
        chat_id: String,
        detail: String,
        failure: Option<ApiFailure>,
    },
}

impl ChannelOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ChannelOutcome::Success { .. })
    }

    pub fn chat_id(&self) -> &str {
        match self {
            ChannelOutcome::Success { chat_id, .. } | ChannelOutcome::Error { chat_id, .. } => {
                chat_id
            }
        }
    }

    pub fn report_line(&self) -> String {
        match self {
            ChannelOutcome::Success { detail, .. } => format!("👍 {detail}"),
            ChannelOutcome::Error { detail, .. } => format!("👎 {detail}"),
        }
    }
}

pub async fn ban_member(api: &dyn ChannelApi, chat_id: &str, user_id: i64) -> ChannelOutcome {
    match api.ban_chat_member(chat_id, user_id).await {
        Ok(()) => ChannelOutcome::Success {
            chat_id: chat_id.to_string(),
            detail: format!("Banned from {chat_id}."),
        },
        Err(failure) => ChannelOutcome::Error {
            chat_id: chat_id.to_string(),
            detail: ban_failure_detail(chat_id, &failure),
            failure: Some(failure),
        },
    }
}

/// Unban always passes `only_if_banned`, so lifting a ban that does not
/// exist reports success instead of a 400.
pub async fn unban_member(api: &dyn ChannelApi, chat_id: &str, user_id: i64) -> ChannelOutcome {
    match api.unban_chat_member(chat_id, user_id, true).await {
        Ok(()) => ChannelOutcome::Success {
            chat_id: chat_id.to_string(),
            detail: format!("Unbanned in {chat_id}. The user can now rejoin via invite link."),
        },
        Err(failure) => ChannelOutcome::Error {
            chat_id: chat_id.to_string(),
            detail: unban_failure_detail(chat_id, &failure),
            failure: Some(failure),
        },
    }
}

fn ban_failure_detail(chat_id: &str, failure: &ApiFailure) -> String {
    match failure {
        ApiFailure::BadRequest(_) => {
            format!("Failed for {chat_id}: Invalid user/chat or user not a member.")
        }
        _ => common_failure_detail(chat_id, failure),
    }
}

fn unban_failure_detail(chat_id: &str, failure: &ApiFailure) -> String {
    match failure {
        ApiFailure::BadRequest(_) => {
            format!("Failed for {chat_id}: Invalid user/chat or user not banned.")
        }
        _ => common_failure_detail(chat_id, failure),
    }
}

fn common_failure_detail(chat_id: &str, failure: &ApiFailure) -> String {
    match failure {
        ApiFailure::Forbidden(_) => {
            format!("Failed for {chat_id}: Bot is not an admin or lacks permission.")
        }
        ApiFailure::RateLimited(_) => {
            format!("Failed for {chat_id}: Rate limit hit, try again later.")
        }
        other => format!("Failed for {chat_id}: {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockChannelApi;

    #[tokio::test]
    async fn successful_ban_is_recorded_and_phrased() {
        let api = MockChannelApi::new();
        let outcome = ban_member(api.as_ref(), "-100123", 42).await;
        assert!(outcome.is_success());
        assert_eq!(api.ban_calls(), vec![("-100123".to_string(), 42)]);
        assert!(outcome.report_line().starts_with("👍"));
    }

    #[tokio::test]
    async fn unban_always_sends_only_if_banned() {
        let api = MockChannelApi::new();
        let outcome = unban_member(api.as_ref(), "-100123", 42).await;
        assert!(outcome.is_success());
        assert_eq!(api.unban_calls(), vec![("-100123".to_string(), 42, true)]);
    }

    #[tokio::test]
    async fn bad_request_gets_action_specific_phrasing() {
        let api = MockChannelApi::new();
        api.fail_chat("-100123", ApiFailure::BadRequest("PARTICIPANT_ID_INVALID".into()));

        let ban = ban_member(api.as_ref(), "-100123", 42).await;
        assert!(!ban.is_success());
        assert_eq!(ban.chat_id(), "-100123");
        assert!(ban.report_line().contains("not a member"));
        let ChannelOutcome::Error { failure, .. } = &ban else {
            panic!("expected an error outcome");
        };
        assert!(matches!(failure, Some(ApiFailure::BadRequest(_))));

        let unban = unban_member(api.as_ref(), "-100123", 42).await;
        assert!(unban.report_line().contains("not banned"));
    }

    #[tokio::test]
    async fn forbidden_and_rate_limit_phrasing() {
        let api = MockChannelApi::new();
        api.fail_chat("-1", ApiFailure::Forbidden("CHAT_ADMIN_REQUIRED".into()));
        api.fail_chat("-2", ApiFailure::RateLimited("retry after 5s".into()));

        let forbidden = ban_member(api.as_ref(), "-1", 42).await;
        assert!(forbidden.report_line().contains("not an admin"));

        let limited = ban_member(api.as_ref(), "-2", 42).await;
        assert!(limited.report_line().contains("Rate limit"));
    }
}
