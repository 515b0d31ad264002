use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

/// A platform member. `is_active` is the moderation flag; it is independent
/// of subscription expiry, so a user can be banned while still paid up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub telegram_id: String,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub bundle_id: Option<i64>,
    pub solo_channels: Vec<i64>,
    pub expiry_date: Option<DateTime<Utc>>,
    pub auto_renew: bool,
    pub is_active: bool,
    pub referral_code: Option<String>,
    pub referred_by: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn has_active_subscription(&self) -> bool {
        self.expiry_date.map(|d| d > Utc::now()).unwrap_or(false)
    }

    /// "@username" when known, otherwise the raw telegram id.
    pub fn display_handle(&self) -> String {
        match &self.username {
            Some(u) => format!("@{}", u),
            None => self.telegram_id.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Bundle {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub channel_count: i32,
    pub folder_link: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// A managed Telegram channel. `chat_id` is the external Telegram identifier;
/// channels without one cannot be moderated. `is_active` reflects the
/// last-known bot-admin standing, refreshed by the sync operation.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Channel {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub invite_link: Option<String>,
    pub chat_id: Option<String>,
    pub bundle_id: Option<i64>,
    pub is_solo: bool,
    pub member_count: i32,
    pub is_active: bool,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubscriptionStatus {
    Active,
    Expired,
    Cancelled,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Expired => "expired",
            SubscriptionStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown subscription status: {0}")]
pub struct UnknownStatus(String);

impl FromStr for SubscriptionStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SubscriptionStatus::Active),
            "expired" => Ok(SubscriptionStatus::Expired),
            "cancelled" => Ok(SubscriptionStatus::Cancelled),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// One entitlement period. Historical rows keep status `expired` or
/// `cancelled`; the schema does not enforce a single `active` row per user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: i64,
    pub user_id: i64,
    pub bundle_id: Option<i64>,
    pub solo_channels: Vec<i64>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub status: SubscriptionStatus,
    pub payment_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Headline numbers for the /stats command.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SystemStats {
    pub active_users: i64,
    pub expiring_soon: i64,
    pub total_channels: i64,
}
