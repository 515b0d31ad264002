//! Channel-access reconciliation: probe the bot's own standing in every
//! managed channel and persist the result, so the panel's channel list
//! reflects which chats the bot can actually moderate.

use chrono::Utc;
use futures::future::join_all;
use std::fmt;
use std::sync::Arc;
use tracing::{error, info};

use telepass_db::models::store::Channel;

use crate::dispatch::ApiQueue;
use crate::services::audit::AuditLogger;
use crate::storage::Storage;
use crate::telegram::ChannelApi;

/// Where a sync run came from. Startup runs stay quiet; operator- and
/// panel-triggered runs push their summary to the audit sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncInitiator {
    Startup,
    Admin(i64),
    Panel,
}

impl fmt::Display for SyncInitiator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncInitiator::Startup => f.write_str("system-startup"),
            SyncInitiator::Admin(id) => write!(f, "admin:{id}"),
            SyncInitiator::Panel => f.write_str("panel"),
        }
    }
}

#[derive(Debug, Default)]
pub struct SyncReport {
    pub success_count: usize,
    pub error_count: usize,
    pub no_chat_id_count: usize,
    /// Summary line first, then one line per channel in probe order.
    pub details: Vec<String>,
}

impl SyncReport {
    pub fn summary(&self) -> &str {
        self.details.first().map(String::as_str).unwrap_or("")
    }

    fn zero(detail: String) -> Self {
        Self {
            details: vec![detail],
            ..Self::default()
        }
    }
}

enum ProbeOutcome {
    Skipped { title: String, id: i64 },
    Ok { title: String, id: i64, detail: String },
    Failed { title: String, id: i64, detail: String },
}

pub struct SyncService {
    store: Arc<dyn Storage>,
    api: Arc<dyn ChannelApi>,
    queue: Arc<ApiQueue>,
    audit: Arc<AuditLogger>,
}

impl SyncService {
    pub fn new(
        store: Arc<dyn Storage>,
        api: Arc<dyn ChannelApi>,
        queue: Arc<ApiQueue>,
        audit: Arc<AuditLogger>,
    ) -> Self {
        Self {
            store,
            api,
            queue,
            audit,
        }
    }

    pub async fn sync(&self, initiator: SyncInitiator) -> SyncReport {
        info!("channel sync started by {initiator}");

        let channels = match self.store.channels().await {
            Ok(c) => c,
            Err(e) => {
                error!("channel sync aborted, could not list channels: {e:#}");
                let report =
                    SyncReport::zero(format!("Channel sync failed: could not list channels: {e:#}"));
                self.deliver(initiator, &report).await;
                return report;
            }
        };
        if channels.is_empty() {
            let report = SyncReport::zero("Channel sync: no channels on record.".to_string());
            self.deliver(initiator, &report).await;
            return report;
        }

        let total = channels.len();
        let probes = channels
            .into_iter()
            .map(|channel| self.queue.run(self.probe_channel(channel)));
        let outcomes = join_all(probes).await;

        let mut report = SyncReport::default();
        let mut lines = Vec::with_capacity(total + 1);
        for outcome in outcomes {
            match outcome {
                ProbeOutcome::Skipped { title, id } => {
                    report.no_chat_id_count += 1;
                    lines.push(format!("⚪ {title} (ID {id}): skipped, no chat id set."));
                }
                ProbeOutcome::Ok { title, id, detail } => {
                    report.success_count += 1;
                    lines.push(format!("🟢 {title} (ID {id}): {detail}"));
                }
                ProbeOutcome::Failed { title, id, detail } => {
                    report.error_count += 1;
                    lines.push(format!("🔴 {title} (ID {id}): {detail}"));
                }
            }
        }

        report.details.push(format!(
            "Channel sync complete. Checked: {total}. OK: {}, Errors: {}, No chat id: {}.",
            report.success_count, report.error_count, report.no_chat_id_count
        ));
        report.details.extend(lines);

        info!("{}", report.summary());
        self.deliver(initiator, &report).await;
        report
    }

    /// Check one channel and persist what the probe found. A definitive
    /// provider refusal (400/403) marks the channel inactive; transient or
    /// unclassified errors only refresh the checked timestamp.
    async fn probe_channel(&self, channel: Channel) -> ProbeOutcome {
        let Some(chat_id) = channel.chat_id.clone() else {
            return ProbeOutcome::Skipped {
                title: channel.title,
                id: channel.id,
            };
        };

        let now = Utc::now();
        match self.api.bot_standing(&chat_id).await {
            Ok(standing) => {
                let is_admin = standing.is_admin();
                let detail = if is_admin {
                    "bot is admin, marked active.".to_string()
                } else {
                    format!("bot is '{standing}', marked inactive (needs admin rights).")
                };
                match self
                    .store
                    .set_channel_status(channel.id, Some(is_admin), now)
                    .await
                {
                    Ok(()) => ProbeOutcome::Ok {
                        title: channel.title,
                        id: channel.id,
                        detail,
                    },
                    Err(e) => ProbeOutcome::Failed {
                        title: channel.title,
                        id: channel.id,
                        detail: format!("{detail} But the status update failed: {e:#}"),
                    },
                }
            }
            Err(failure) => {
                let new_status = failure.marks_channel_inactive().then_some(false);
                let mut detail = format!("probe failed: {failure}");
                if let Err(e) = self.store.set_channel_status(channel.id, new_status, now).await {
                    detail.push_str(&format!(" Status update also failed: {e:#}"));
                }
                ProbeOutcome::Failed {
                    title: channel.title,
                    id: channel.id,
                    detail,
                }
            }
        }
    }

    async fn deliver(&self, initiator: SyncInitiator, report: &SyncReport) {
        if initiator == SyncInitiator::Startup {
            return;
        }
        self.audit
            .notify(&format!("⚙️ Channel sync ({initiator}):\n{}", report.summary()))
            .await;
    }
}
