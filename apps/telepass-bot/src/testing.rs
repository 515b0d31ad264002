//! In-memory doubles for the storage and channel-API seams, shared by the
//! service unit tests.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use telepass_db::models::store::{
    Bundle, Channel, Subscription, SubscriptionStatus, SystemStats, User,
};

use crate::dispatch::ApiQueue;
use crate::services::audit::AuditLogger;
use crate::services::moderation::ModerationService;
use crate::services::sync::SyncService;
use crate::storage::Storage;
use crate::telegram::{ApiFailure, BotStanding, ChannelApi};

#[derive(Default)]
struct MemInner {
    users: Vec<User>,
    channels: Vec<Channel>,
    subscriptions: Vec<Subscription>,
    bundles: Vec<Bundle>,
    fail_channel_list: bool,
}

#[derive(Default)]
pub struct MemStorage {
    inner: Mutex<MemInner>,
}

impl MemStorage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_user(&self, user: User) {
        self.inner.lock().unwrap().users.push(user);
    }

    pub fn add_channel(&self, channel: Channel) {
        self.inner.lock().unwrap().channels.push(channel);
    }

    pub fn add_subscription(&self, sub: Subscription) {
        self.inner.lock().unwrap().subscriptions.push(sub);
    }

    pub fn add_bundle(&self, bundle: Bundle) {
        self.inner.lock().unwrap().bundles.push(bundle);
    }

    pub fn set_fail_channel_list(&self, fail: bool) {
        self.inner.lock().unwrap().fail_channel_list = fail;
    }

    pub fn user(&self, id: i64) -> User {
        self.inner
            .lock()
            .unwrap()
            .users
            .iter()
            .find(|u| u.id == id)
            .cloned()
            .unwrap_or_else(|| panic!("no user {id} in fixture"))
    }

    pub fn channel(&self, id: i64) -> Channel {
        self.inner
            .lock()
            .unwrap()
            .channels
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .unwrap_or_else(|| panic!("no channel {id} in fixture"))
    }

    pub fn subscription(&self, id: i64) -> Subscription {
        self.inner
            .lock()
            .unwrap()
            .subscriptions
            .iter()
            .find(|s| s.id == id)
            .cloned()
            .unwrap_or_else(|| panic!("no subscription {id} in fixture"))
    }
}

#[async_trait]
impl Storage for MemStorage {
    async fn user_by_telegram_id(&self, telegram_id: &str) -> Result<Option<User>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .users
            .iter()
            .find(|u| u.telegram_id == telegram_id)
            .cloned())
    }

    async fn user_by_username(&self, username: &str) -> Result<Option<User>> {
        let wanted = username.to_lowercase();
        Ok(self
            .inner
            .lock()
            .unwrap()
            .users
            .iter()
            .find(|u| {
                u.username
                    .as_deref()
                    .is_some_and(|n| n.to_lowercase() == wanted)
            })
            .cloned())
    }

    async fn set_user_active(&self, user_id: i64, is_active: bool) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let user = inner
            .users
            .iter_mut()
            .find(|u| u.id == user_id)
            .ok_or_else(|| anyhow!("no user {user_id}"))?;
        user.is_active = is_active;
        Ok(())
    }

    async fn terminate_user(&self, user_id: i64, expiry: DateTime<Utc>) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let user = inner
            .users
            .iter_mut()
            .find(|u| u.id == user_id)
            .ok_or_else(|| anyhow!("no user {user_id}"))?;
        user.is_active = false;
        user.expiry_date = Some(expiry);
        Ok(())
    }

    async fn channels(&self) -> Result<Vec<Channel>> {
        let inner = self.inner.lock().unwrap();
        if inner.fail_channel_list {
            return Err(anyhow!("simulated storage outage"));
        }
        Ok(inner.channels.clone())
    }

    async fn channels_by_bundle(&self, bundle_id: i64) -> Result<Vec<Channel>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .channels
            .iter()
            .filter(|c| c.bundle_id == Some(bundle_id))
            .cloned()
            .collect())
    }

    async fn channels_by_ids(&self, ids: &[i64]) -> Result<Vec<Channel>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .channels
            .iter()
            .filter(|c| ids.contains(&c.id))
            .cloned()
            .collect())
    }

    async fn set_channel_status(
        &self,
        channel_id: i64,
        is_active: Option<bool>,
        checked_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let channel = inner
            .channels
            .iter_mut()
            .find(|c| c.id == channel_id)
            .ok_or_else(|| anyhow!("no channel {channel_id}"))?;
        if let Some(active) = is_active {
            channel.is_active = active;
        }
        channel.last_checked_at = Some(checked_at);
        Ok(())
    }

    async fn active_subscription(&self, user_id: i64) -> Result<Option<Subscription>> {
        let now = Utc::now();
        Ok(self
            .inner
            .lock()
            .unwrap()
            .subscriptions
            .iter()
            .filter(|s| {
                s.user_id == user_id
                    && s.status == SubscriptionStatus::Active
                    && s.end_date > now
            })
            .max_by_key(|s| s.end_date)
            .cloned())
    }

    async fn cancel_subscription(
        &self,
        subscription_id: i64,
        end_date: DateTime<Utc>,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let sub = inner
            .subscriptions
            .iter_mut()
            .find(|s| s.id == subscription_id)
            .ok_or_else(|| anyhow!("no subscription {subscription_id}"))?;
        sub.status = SubscriptionStatus::Cancelled;
        sub.end_date = end_date;
        Ok(())
    }

    async fn expire_overdue_subscriptions(&self) -> Result<u64> {
        let now = Utc::now();
        let mut inner = self.inner.lock().unwrap();
        let mut flipped = 0;
        for sub in &mut inner.subscriptions {
            if sub.status == SubscriptionStatus::Active && sub.end_date <= now {
                sub.status = SubscriptionStatus::Expired;
                flipped += 1;
            }
        }
        Ok(flipped)
    }

    async fn bundle_by_id(&self, bundle_id: i64) -> Result<Option<Bundle>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .bundles
            .iter()
            .find(|b| b.id == bundle_id)
            .cloned())
    }

    async fn expired_active_users(&self) -> Result<Vec<User>> {
        let now = Utc::now();
        Ok(self
            .inner
            .lock()
            .unwrap()
            .users
            .iter()
            .filter(|u| u.is_active && u.expiry_date.is_some_and(|d| d <= now))
            .cloned()
            .collect())
    }

    async fn stats(&self) -> Result<SystemStats> {
        let inner = self.inner.lock().unwrap();
        Ok(SystemStats {
            active_users: inner.users.iter().filter(|u| u.is_active).count() as i64,
            expiring_soon: 0,
            total_channels: inner.channels.len() as i64,
        })
    }
}

#[derive(Default)]
struct MockInner {
    ban_calls: Vec<(String, i64)>,
    unban_calls: Vec<(String, i64, bool)>,
    probes: Vec<String>,
    failures: HashMap<String, ApiFailure>,
    standings: HashMap<String, BotStanding>,
}

/// Recording fake for the provider seam. Per-chat failures are injected with
/// `fail_chat`; unconfigured probes report the bot as having left the chat.
#[derive(Default)]
pub struct MockChannelApi {
    inner: Mutex<MockInner>,
}

impl MockChannelApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_chat(&self, chat_id: &str, failure: ApiFailure) {
        self.inner
            .lock()
            .unwrap()
            .failures
            .insert(chat_id.to_string(), failure);
    }

    pub fn set_standing(&self, chat_id: &str, standing: BotStanding) {
        self.inner
            .lock()
            .unwrap()
            .standings
            .insert(chat_id.to_string(), standing);
    }

    pub fn ban_calls(&self) -> Vec<(String, i64)> {
        self.inner.lock().unwrap().ban_calls.clone()
    }

    pub fn unban_calls(&self) -> Vec<(String, i64, bool)> {
        self.inner.lock().unwrap().unban_calls.clone()
    }

    pub fn probes(&self) -> Vec<String> {
        self.inner.lock().unwrap().probes.clone()
    }

    fn failure_for(&self, chat_id: &str) -> Option<ApiFailure> {
        self.inner.lock().unwrap().failures.get(chat_id).cloned()
    }
}

#[async_trait]
impl ChannelApi for MockChannelApi {
    async fn ban_chat_member(&self, chat_id: &str, user_id: i64) -> Result<(), ApiFailure> {
        self.inner
            .lock()
            .unwrap()
            .ban_calls
            .push((chat_id.to_string(), user_id));
        match self.failure_for(chat_id) {
            Some(failure) => Err(failure),
            None => Ok(()),
        }
    }

    async fn unban_chat_member(
        &self,
        chat_id: &str,
        user_id: i64,
        only_if_banned: bool,
    ) -> Result<(), ApiFailure> {
        self.inner
            .lock()
            .unwrap()
            .unban_calls
            .push((chat_id.to_string(), user_id, only_if_banned));
        match self.failure_for(chat_id) {
            Some(failure) => Err(failure),
            None => Ok(()),
        }
    }

    async fn bot_standing(&self, chat_id: &str) -> Result<BotStanding, ApiFailure> {
        self.inner.lock().unwrap().probes.push(chat_id.to_string());
        if let Some(failure) = self.failure_for(chat_id) {
            return Err(failure);
        }
        Ok(self
            .inner
            .lock()
            .unwrap()
            .standings
            .get(chat_id)
            .copied()
            .unwrap_or(BotStanding::Left))
    }
}

pub fn user(
    id: i64,
    telegram_id: &str,
    bundle_id: Option<i64>,
    solo_channels: Vec<i64>,
    is_active: bool,
    expiry_date: Option<DateTime<Utc>>,
) -> User {
    User {
        id,
        telegram_id: telegram_id.to_string(),
        username: None,
        first_name: None,
        last_name: None,
        bundle_id,
        solo_channels,
        expiry_date,
        auto_renew: false,
        is_active,
        referral_code: None,
        referred_by: None,
        created_at: Utc::now(),
    }
}

pub fn channel(id: i64, title: &str, chat_id: Option<&str>, bundle_id: Option<i64>) -> Channel {
    Channel {
        id,
        title: title.to_string(),
        description: None,
        invite_link: None,
        chat_id: chat_id.map(str::to_string),
        bundle_id,
        is_solo: bundle_id.is_none(),
        member_count: 0,
        is_active: false,
        last_checked_at: None,
        created_at: Utc::now(),
    }
}

pub fn subscription(
    id: i64,
    user_id: i64,
    status: SubscriptionStatus,
    end_date: DateTime<Utc>,
) -> Subscription {
    Subscription {
        id,
        user_id,
        bundle_id: None,
        solo_channels: vec![],
        start_date: Utc::now(),
        end_date,
        status,
        payment_id: None,
        created_at: Utc::now(),
    }
}

fn test_audit() -> Arc<AuditLogger> {
    let path = std::env::temp_dir()
        .join("telepass-tests")
        .join(format!("audit-{}.log", std::process::id()));
    Arc::new(AuditLogger::new(path, None))
}

fn fast_queue() -> Arc<ApiQueue> {
    Arc::new(ApiQueue::new(10, Duration::from_millis(1), 1000))
}

pub fn moderation_harness() -> (Arc<MemStorage>, Arc<MockChannelApi>, ModerationService) {
    let store = MemStorage::new();
    let api = MockChannelApi::new();
    let svc = ModerationService::new(
        store.clone() as Arc<dyn Storage>,
        api.clone() as Arc<dyn ChannelApi>,
        fast_queue(),
        test_audit(),
    );
    (store, api, svc)
}

pub fn app_state_harness() -> (Arc<MemStorage>, Arc<MockChannelApi>, crate::AppState) {
    let store = MemStorage::new();
    let api = MockChannelApi::new();
    let queue = fast_queue();
    let audit = test_audit();
    let state = crate::AppState {
        store: store.clone() as Arc<dyn Storage>,
        moderation: Arc::new(ModerationService::new(
            store.clone() as Arc<dyn Storage>,
            api.clone() as Arc<dyn ChannelApi>,
            Arc::clone(&queue),
            Arc::clone(&audit),
        )),
        sync: Arc::new(SyncService::new(
            store.clone() as Arc<dyn Storage>,
            api.clone() as Arc<dyn ChannelApi>,
            queue,
            Arc::clone(&audit),
        )),
        audit,
        cooldown: Arc::new(crate::bot::utils::cooldown::CommandCooldown::per_second()),
        admins: Arc::new(std::collections::HashSet::from([7])),
        bot_username: Arc::new("telepass_test_bot".to_string()),
    };
    (store, api, state)
}

pub fn sync_harness() -> (Arc<MemStorage>, Arc<MockChannelApi>, SyncService) {
    let store = MemStorage::new();
    let api = MockChannelApi::new();
    let svc = SyncService::new(
        store.clone() as Arc<dyn Storage>,
        api.clone() as Arc<dyn ChannelApi>,
        fast_queue(),
        test_audit(),
    );
    (store, api, svc)
}
