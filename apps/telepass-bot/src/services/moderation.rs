//! Moderation state machine: resolves a target user, flips their stored
//! moderation flag first, then fans the corresponding membership action out
//! across every entitled channel through the shared dispatch queue.
//!
//! The store transition always precedes provider calls, so a crash mid
//! fan-out leaves the database strict (user marked, some channels lagging)
//! rather than lenient.

use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{info, warn};

use telepass_db::models::store::User;

use crate::dispatch::ApiQueue;
use crate::services::access::AccessService;
use crate::services::audit::{Actor, AuditLogger};
use crate::services::membership::{self, ChannelOutcome};
use crate::storage::Storage;
use crate::telegram::ChannelApi;

/// Operator-facing result: messages in the order they should be delivered.
/// Multi-message so the "starting..." interim report precedes the final
/// per-channel tally, as each may be chunked independently.
#[derive(Debug, Default)]
pub struct OpReport {
    pub messages: Vec<String>,
}

impl OpReport {
    fn one(message: impl Into<String>) -> Self {
        Self {
            messages: vec![message.into()],
        }
    }

    fn push(&mut self, message: impl Into<String>) {
        self.messages.push(message.into());
    }

    pub fn joined(&self) -> String {
        self.messages.join("\n")
    }
}

#[derive(Debug, Clone, Copy)]
enum MemberAction {
    Ban,
    Unban,
}

struct Tally {
    succeeded: usize,
    failed: usize,
    failure_lines: Vec<String>,
}

fn tally(outcomes: &[ChannelOutcome]) -> Tally {
    let mut t = Tally {
        succeeded: 0,
        failed: 0,
        failure_lines: Vec::new(),
    };
    for outcome in outcomes {
        if outcome.is_success() {
            t.succeeded += 1;
        } else {
            t.failed += 1;
            t.failure_lines.push(outcome.report_line());
        }
    }
    t
}

pub struct ModerationService {
    store: Arc<dyn Storage>,
    api: Arc<dyn ChannelApi>,
    queue: Arc<ApiQueue>,
    access: AccessService,
    audit: Arc<AuditLogger>,
}

impl ModerationService {
    pub fn new(
        store: Arc<dyn Storage>,
        api: Arc<dyn ChannelApi>,
        queue: Arc<ApiQueue>,
        audit: Arc<AuditLogger>,
    ) -> Self {
        let access = AccessService::new(Arc::clone(&store));
        Self {
            store,
            api,
            queue,
            access,
            audit,
        }
    }

    /// Resolve "@username" or a numeric Telegram id to a stored user plus
    /// the parsed numeric id the provider calls need. Errors are already
    /// phrased for the operator.
    async fn lookup_target(&self, raw: &str) -> Result<(User, i64), String> {
        let found = if let Some(name) = raw.strip_prefix('@') {
            self.store
                .user_by_username(name)
                .await
                .map_err(|e| format!("❌ Storage error while looking up {raw}: {e:#}"))?
        } else {
            let id: i64 = raw.parse().map_err(|_| {
                "❌ Invalid format. Use a numeric Telegram ID or @username.".to_string()
            })?;
            self.store
                .user_by_telegram_id(&id.to_string())
                .await
                .map_err(|e| format!("❌ Storage error while looking up {raw}: {e:#}"))?
        };
        let user = found.ok_or_else(|| format!("❌ User not found: {raw}"))?;
        // Catch a corrupt stored id before any state transition happens.
        let numeric_id = user.telegram_id.parse::<i64>().map_err(|_| {
            format!(
                "❌ User {} has a malformed Telegram ID on record ({}); fix the row first.",
                user.display_handle(),
                user.telegram_id
            )
        })?;
        Ok((user, numeric_id))
    }

    async fn fan_out(
        &self,
        action: MemberAction,
        chat_ids: Vec<String>,
        user_id: i64,
    ) -> Vec<ChannelOutcome> {
        let tasks = chat_ids.into_iter().map(|chat_id| async move {
            self.queue
                .run(async {
                    match action {
                        MemberAction::Ban => {
                            membership::ban_member(self.api.as_ref(), &chat_id, user_id).await
                        }
                        MemberAction::Unban => {
                            membership::unban_member(self.api.as_ref(), &chat_id, user_id).await
                        }
                    }
                })
                .await
        });
        join_all(tasks).await
    }

    /// Resolve entitled channels and run `action` against each distinct chat.
    /// Appends skip notes for unmoderatable channels to `intro` and returns
    /// the final tally message, or `None` when there was nothing to act on.
    async fn act_on_channels(
        &self,
        action: MemberAction,
        verb: &str,
        user: &User,
        numeric_id: i64,
        intro: &mut String,
    ) -> Option<Tally> {
        let resolved = match self.access.entitled_channels(user).await {
            Ok(r) => r,
            Err(e) => {
                intro.push_str(&format!("\n❌ Could not resolve channels: {e:#}"));
                return None;
            }
        };
        for channel in &resolved.missing_chat_id {
            intro.push_str(&format!(
                "\n⚠️ Skipped '{}' (ID {}): no chat id on record.",
                channel.title, channel.id
            ));
        }
        let chat_ids = resolved.unique_chat_ids();
        if chat_ids.is_empty() {
            intro.push_str(&format!(
                "\nℹ️ No Telegram channels found to {verb} the user in."
            ));
            return None;
        }
        intro.push_str(&format!(
            "\nAttempting to {verb} in {} channel(s)...",
            chat_ids.len()
        ));
        let outcomes = self.fan_out(action, chat_ids, numeric_id).await;
        Some(tally(&outcomes))
    }

    fn final_message(verb: &str, target: &str, t: &Tally) -> String {
        let mut msg = format!(
            "{} {} complete for {}. Succeeded: {}, Failed: {}.",
            if t.failed == 0 { "✅" } else { "⚠️" },
            verb,
            target,
            t.succeeded,
            t.failed
        );
        for line in &t.failure_lines {
            msg.push('\n');
            msg.push_str(line);
        }
        msg
    }

    /// /ban — deactivate the user and remove them from every entitled channel.
    pub async fn ban(&self, actor: &Actor, raw_target: &str) -> OpReport {
        let (user, numeric_id) = match self.lookup_target(raw_target).await {
            Ok(v) => v,
            Err(msg) => {
                self.audit.log(actor, "ban", raw_target, &msg, None).await;
                return OpReport::one(msg);
            }
        };

        if !user.is_active {
            let msg = format!("ℹ️ User {raw_target} is already inactive/banned.");
            self.audit.log(actor, "ban", raw_target, &msg, None).await;
            return OpReport::one(msg);
        }

        if let Err(e) = self.store.set_user_active(user.id, false).await {
            let msg = format!("❌ Failed to update user record: {e:#}");
            self.audit
                .log(actor, "ban", raw_target, "store transition failed", Some(&msg))
                .await;
            return OpReport::one(msg);
        }
        info!("marked user {} inactive", user.id);

        let mut report = OpReport::default();
        let mut intro = format!(
            "✅ User {} (ID: {}) marked as inactive in the database.",
            user.display_handle(),
            user.telegram_id
        );
        let outcome = self
            .act_on_channels(MemberAction::Ban, "ban", &user, numeric_id, &mut intro)
            .await;
        report.push(intro);

        match outcome {
            Some(t) => {
                let msg = Self::final_message("Ban", raw_target, &t);
                let error = (t.failed > 0).then(|| format!("{} channel action(s) failed", t.failed));
                self.audit
                    .log(actor, "ban", raw_target, &msg, error.as_deref())
                    .await;
                report.push(msg);
            }
            None => {
                self.audit
                    .log(actor, "ban", raw_target, &report.joined(), None)
                    .await;
            }
        }
        report
    }

    /// /unban and /forceunban — reactivate the user and lift channel bans.
    /// Without `force`, a target with no paid-up subscription is refused so
    /// access cannot be restored past its expiry by accident.
    pub async fn unban(&self, actor: &Actor, raw_target: &str, force: bool) -> OpReport {
        let command = if force { "forceunban" } else { "unban" };
        let (user, numeric_id) = match self.lookup_target(raw_target).await {
            Ok(v) => v,
            Err(msg) => {
                self.audit.log(actor, command, raw_target, &msg, None).await;
                return OpReport::one(msg);
            }
        };

        if user.is_active {
            let msg = format!("ℹ️ User {raw_target} is already active.");
            self.audit.log(actor, command, raw_target, &msg, None).await;
            return OpReport::one(msg);
        }

        if !force && !user.has_active_subscription() {
            let msg = format!(
                "⚠️ User {raw_target} has no active subscription; unbanning would grant unpaid access.\nUse /forceunban {raw_target} to restore access anyway."
            );
            self.audit.log(actor, command, raw_target, &msg, None).await;
            return OpReport::one(msg);
        }

        if let Err(e) = self.store.set_user_active(user.id, true).await {
            let msg = format!("❌ Failed to update user record: {e:#}");
            self.audit
                .log(actor, command, raw_target, "store transition failed", Some(&msg))
                .await;
            return OpReport::one(msg);
        }
        info!("marked user {} active", user.id);

        let mut report = OpReport::default();
        let mut intro = format!(
            "✅ User {} (ID: {}) marked as active in the database.",
            user.display_handle(),
            user.telegram_id
        );
        let outcome = self
            .act_on_channels(MemberAction::Unban, "unban", &user, numeric_id, &mut intro)
            .await;
        report.push(intro);

        match outcome {
            Some(t) => {
                let msg = Self::final_message("Unban", raw_target, &t);
                let error = (t.failed > 0).then(|| format!("{} channel action(s) failed", t.failed));
                self.audit
                    .log(actor, command, raw_target, &msg, error.as_deref())
                    .await;
                report.push(msg);
            }
            None => {
                self.audit
                    .log(actor, command, raw_target, &report.joined(), None)
                    .await;
            }
        }
        report
    }

    /// /terminate — end the subscription immediately and ban everywhere.
    /// Unlike /ban this also zeroes the entitlement itself, so a later
    /// /unban will hit the no-subscription guard.
    pub async fn terminate(&self, actor: &Actor, raw_target: &str) -> OpReport {
        let (user, numeric_id) = match self.lookup_target(raw_target).await {
            Ok(v) => v,
            Err(msg) => {
                self.audit
                    .log(actor, "terminate", raw_target, &msg, None)
                    .await;
                return OpReport::one(msg);
            }
        };

        let now = Utc::now();
        if let Err(e) = self.store.terminate_user(user.id, now).await {
            let msg = format!("❌ Failed to terminate user record: {e:#}");
            self.audit
                .log(actor, "terminate", raw_target, "store transition failed", Some(&msg))
                .await;
            return OpReport::one(msg);
        }

        let mut intro = format!(
            "✅ User {} (ID: {}) terminated: marked inactive, expiry set to now.",
            user.display_handle(),
            user.telegram_id
        );

        match self.store.active_subscription(user.id).await {
            Ok(Some(sub)) => match self.store.cancel_subscription(sub.id, now).await {
                Ok(()) => intro.push_str("\n✅ Active subscription record cancelled."),
                Err(e) => intro.push_str(&format!("\n⚠️ Could not cancel subscription record: {e:#}")),
            },
            Ok(None) => intro.push_str("\nℹ️ No active subscription record found."),
            Err(e) => intro.push_str(&format!("\n⚠️ Could not look up subscription record: {e:#}")),
        }

        let mut report = OpReport::default();
        let outcome = self
            .act_on_channels(MemberAction::Ban, "ban", &user, numeric_id, &mut intro)
            .await;
        report.push(intro);

        match outcome {
            Some(t) => {
                let msg = Self::final_message("Termination", raw_target, &t);
                let error = (t.failed > 0).then(|| format!("{} channel action(s) failed", t.failed));
                self.audit
                    .log(actor, "terminate", raw_target, &msg, error.as_deref())
                    .await;
                report.push(msg);
            }
            None => {
                self.audit
                    .log(actor, "terminate", raw_target, &report.joined(), None)
                    .await;
            }
        }
        report
    }

    /// Scheduled-expiry path: same transition as /ban, driven by the sweep
    /// instead of an operator, attributed to the system actor.
    pub async fn expire(&self, user: &User) -> OpReport {
        let actor = Actor::system();
        let target = user.telegram_id.clone();

        if !user.is_active {
            return OpReport::default();
        }

        let numeric_id = match user.telegram_id.parse::<i64>() {
            Ok(id) => id,
            Err(_) => {
                let msg = format!(
                    "❌ Cannot expire user {}: malformed Telegram ID on record ({}).",
                    user.id, user.telegram_id
                );
                warn!("{msg}");
                self.audit.log(&actor, "expire", &target, &msg, None).await;
                return OpReport::one(msg);
            }
        };

        if let Err(e) = self.store.set_user_active(user.id, false).await {
            let msg = format!("❌ Failed to deactivate expired user {}: {e:#}", user.id);
            self.audit
                .log(&actor, "expire", &target, "store transition failed", Some(&msg))
                .await;
            return OpReport::one(msg);
        }

        let mut report = OpReport::default();
        let mut intro = format!(
            "Subscription expired for {} (ID: {}); access revoked.",
            user.display_handle(),
            user.telegram_id
        );
        let outcome = self
            .act_on_channels(MemberAction::Ban, "ban", user, numeric_id, &mut intro)
            .await;
        report.push(intro);

        match outcome {
            Some(t) => {
                let msg = Self::final_message("Expiry ban", &target, &t);
                let error = (t.failed > 0).then(|| format!("{} channel action(s) failed", t.failed));
                self.audit
                    .log(&actor, "expire", &target, &msg, error.as_deref())
                    .await;
                report.push(msg);
            }
            None => {
                self.audit
                    .log(&actor, "expire", &target, &report.joined(), None)
                    .await;
            }
        }
        report
    }
}
