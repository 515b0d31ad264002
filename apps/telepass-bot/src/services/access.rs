//! Maps a user to the channels their entitlement covers: the union of the
//! assigned bundle's channels and any individually purchased solo channels.

use anyhow::Result;
use std::sync::Arc;

use telepass_db::models::store::{Channel, User};

use crate::storage::Storage;

/// Resolver output, split so callers can report unmoderatable channels
/// instead of silently dropping them.
#[derive(Debug, Default)]
pub struct ResolvedAccess {
    /// Channels with a chat id; these can actually be acted on.
    pub actionable: Vec<Channel>,
    /// Entitled channels with no chat id on record.
    pub missing_chat_id: Vec<Channel>,
}

impl ResolvedAccess {
    pub fn is_empty(&self) -> bool {
        self.actionable.is_empty() && self.missing_chat_id.is_empty()
    }

    /// Distinct chat ids in resolution order. Two channel rows can point at
    /// the same chat; each chat is acted on once.
    pub fn unique_chat_ids(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::with_capacity(self.actionable.len());
        for channel in &self.actionable {
            if let Some(chat_id) = &channel.chat_id {
                if !out.iter().any(|c| c == chat_id) {
                    out.push(chat_id.clone());
                }
            }
        }
        out
    }
}

#[derive(Clone)]
pub struct AccessService {
    store: Arc<dyn Storage>,
}

impl AccessService {
    pub fn new(store: Arc<dyn Storage>) -> Self {
        Self { store }
    }

    /// Union of bundle and solo channels, deduplicated by channel id with
    /// bundle entries taking precedence. A user may legitimately carry both
    /// sources at once.
    pub async fn entitled_channels(&self, user: &User) -> Result<ResolvedAccess> {
        let mut merged: Vec<Channel> = Vec::new();

        if let Some(bundle_id) = user.bundle_id {
            merged.extend(self.store.channels_by_bundle(bundle_id).await?);
        }

        if !user.solo_channels.is_empty() {
            for channel in self.store.channels_by_ids(&user.solo_channels).await? {
                if !merged.iter().any(|c| c.id == channel.id) {
                    merged.push(channel);
                }
            }
        }

        let mut resolved = ResolvedAccess::default();
        for channel in merged {
            if channel.chat_id.is_some() {
                resolved.actionable.push(channel);
            } else {
                resolved.missing_chat_id.push(channel);
            }
        }
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{channel, user, MemStorage};

    #[tokio::test]
    async fn bundle_only_user_gets_bundle_channels() {
        let store = MemStorage::new();
        store.add_channel(channel(1, "alpha", Some("c1"), Some(7)));
        store.add_channel(channel(2, "beta", Some("c2"), Some(7)));
        store.add_channel(channel(3, "other", Some("c3"), Some(8)));

        let access = AccessService::new(store.clone());
        let u = user(1, "555", Some(7), vec![], true, None);
        let resolved = access.entitled_channels(&u).await.unwrap();

        let ids: Vec<i64> = resolved.actionable.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert!(resolved.missing_chat_id.is_empty());
    }

    #[tokio::test]
    async fn overlapping_bundle_and_solo_dedupes_by_channel_id() {
        let store = MemStorage::new();
        store.add_channel(channel(1, "alpha", Some("c1"), Some(7)));
        store.add_channel(channel(2, "solo", Some("c2"), None));

        let access = AccessService::new(store.clone());
        // Channel 1 arrives via the bundle *and* the solo list.
        let u = user(1, "555", Some(7), vec![1, 2], true, None);
        let resolved = access.entitled_channels(&u).await.unwrap();

        let ids: Vec<i64> = resolved.actionable.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[tokio::test]
    async fn channels_without_chat_id_are_surfaced_not_dropped() {
        let store = MemStorage::new();
        store.add_channel(channel(1, "reachable", Some("c1"), Some(7)));
        store.add_channel(channel(2, "orphan", None, Some(7)));

        let access = AccessService::new(store.clone());
        let u = user(1, "555", Some(7), vec![], true, None);
        let resolved = access.entitled_channels(&u).await.unwrap();

        assert_eq!(resolved.actionable.len(), 1);
        assert_eq!(resolved.missing_chat_id.len(), 1);
        assert_eq!(resolved.missing_chat_id[0].id, 2);
        assert_eq!(resolved.unique_chat_ids(), vec!["c1".to_string()]);
    }

    #[tokio::test]
    async fn no_entitlement_resolves_to_empty() {
        let store = MemStorage::new();
        store.add_channel(channel(1, "alpha", Some("c1"), Some(7)));

        let access = AccessService::new(store.clone());
        let u = user(1, "555", None, vec![], true, None);
        let resolved = access.entitled_channels(&u).await.unwrap();
        assert!(resolved.is_empty());
    }

    #[tokio::test]
    async fn duplicate_chat_ids_collapse() {
        let store = MemStorage::new();
        store.add_channel(channel(1, "mirror-a", Some("same"), Some(7)));
        store.add_channel(channel(2, "mirror-b", Some("same"), Some(7)));

        let access = AccessService::new(store.clone());
        let u = user(1, "555", Some(7), vec![], true, None);
        let resolved = access.entitled_channels(&u).await.unwrap();
        assert_eq!(resolved.unique_chat_ids(), vec!["same".to_string()]);
    }
}
