//! Persistence seam. The moderation core only talks to this trait; the
//! production implementation delegates to the `telepass-db` repositories.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use telepass_db::sqlx::PgPool;

use telepass_db::models::store::{Bundle, Channel, Subscription, SystemStats, User};
use telepass_db::repositories::{
    BundleRepository, ChannelRepository, SubscriptionRepository, UserRepository,
};

/// Days-ahead horizon the /stats "expiring soon" figure uses.
const EXPIRING_SOON_DAYS: i64 = 3;

#[async_trait]
pub trait Storage: Send + Sync {
    async fn user_by_telegram_id(&self, telegram_id: &str) -> Result<Option<User>>;
    async fn user_by_username(&self, username: &str) -> Result<Option<User>>;
    async fn set_user_active(&self, user_id: i64, is_active: bool) -> Result<()>;
    /// Deactivate and set `expiry_date` to `expiry` in one step.
    async fn terminate_user(&self, user_id: i64, expiry: DateTime<Utc>) -> Result<()>;

    async fn channels(&self) -> Result<Vec<Channel>>;
    async fn channels_by_bundle(&self, bundle_id: i64) -> Result<Vec<Channel>>;
    async fn channels_by_ids(&self, ids: &[i64]) -> Result<Vec<Channel>>;
    /// `is_active = None` refreshes only `last_checked_at`.
    async fn set_channel_status(
        &self,
        channel_id: i64,
        is_active: Option<bool>,
        checked_at: DateTime<Utc>,
    ) -> Result<()>;

    async fn active_subscription(&self, user_id: i64) -> Result<Option<Subscription>>;
    async fn cancel_subscription(&self, subscription_id: i64, end_date: DateTime<Utc>)
        -> Result<()>;
    async fn expire_overdue_subscriptions(&self) -> Result<u64>;

    async fn bundle_by_id(&self, bundle_id: i64) -> Result<Option<Bundle>>;
    async fn expired_active_users(&self) -> Result<Vec<User>>;
    async fn stats(&self) -> Result<SystemStats>;
}

#[derive(Clone)]
pub struct PgStorage {
    users: UserRepository,
    channels: ChannelRepository,
    bundles: BundleRepository,
    subscriptions: SubscriptionRepository,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self {
            users: UserRepository::new(pool.clone()),
            channels: ChannelRepository::new(pool.clone()),
            bundles: BundleRepository::new(pool.clone()),
            subscriptions: SubscriptionRepository::new(pool),
        }
    }
}

#[async_trait]
impl Storage for PgStorage {
    async fn user_by_telegram_id(&self, telegram_id: &str) -> Result<Option<User>> {
        self.users.get_by_telegram_id(telegram_id).await
    }

    async fn user_by_username(&self, username: &str) -> Result<Option<User>> {
        self.users.get_by_username(username).await
    }

    async fn set_user_active(&self, user_id: i64, is_active: bool) -> Result<()> {
        self.users.set_active(user_id, is_active).await
    }

    async fn terminate_user(&self, user_id: i64, expiry: DateTime<Utc>) -> Result<()> {
        self.users.terminate(user_id, expiry).await
    }

    async fn channels(&self) -> Result<Vec<Channel>> {
        self.channels.get_all().await
    }

    async fn channels_by_bundle(&self, bundle_id: i64) -> Result<Vec<Channel>> {
        self.channels.get_by_bundle(bundle_id).await
    }

    async fn channels_by_ids(&self, ids: &[i64]) -> Result<Vec<Channel>> {
        self.channels.get_by_ids(ids).await
    }

    async fn set_channel_status(
        &self,
        channel_id: i64,
        is_active: Option<bool>,
        checked_at: DateTime<Utc>,
    ) -> Result<()> {
        match is_active {
            Some(active) => self.channels.set_status(channel_id, active, checked_at).await,
            None => self.channels.touch_checked(channel_id, checked_at).await,
        }
    }

    async fn active_subscription(&self, user_id: i64) -> Result<Option<Subscription>> {
        self.subscriptions.get_active_by_user(user_id).await
    }

    async fn cancel_subscription(
        &self,
        subscription_id: i64,
        end_date: DateTime<Utc>,
    ) -> Result<()> {
        self.subscriptions.cancel(subscription_id, end_date).await
    }

    async fn expire_overdue_subscriptions(&self) -> Result<u64> {
        self.subscriptions.expire_overdue().await
    }

    async fn bundle_by_id(&self, bundle_id: i64) -> Result<Option<Bundle>> {
        self.bundles.get_by_id(bundle_id).await
    }

    async fn expired_active_users(&self) -> Result<Vec<User>> {
        self.users.get_expired_active().await
    }

    async fn stats(&self) -> Result<SystemStats> {
        Ok(SystemStats {
            active_users: self.users.count_active().await?,
            expiring_soon: self
                .users
                .count_expiring_within_days(EXPIRING_SOON_DAYS)
                .await?,
            total_channels: self.channels.count().await?,
        })
    }
}
