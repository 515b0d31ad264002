//! Background jobs: the hourly subscription-expiry sweep and the one-shot
//! startup channel sync.

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::services::sync::SyncInitiator;
use crate::AppState;

const EXPIRY_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

pub fn spawn_expiry_sweep(state: AppState) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(EXPIRY_SWEEP_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            run_expiry_sweep(&state).await;
        }
    })
}

/// Flip overdue subscription rows to `expired`, then revoke access for
/// every still-active user whose expiry has passed. Each user is processed
/// independently; one failure never stops the sweep.
pub async fn run_expiry_sweep(state: &AppState) {
    match state.store.expire_overdue_subscriptions().await {
        Ok(0) => {}
        Ok(n) => info!("expiry sweep: marked {n} subscription(s) expired"),
        Err(e) => error!("expiry sweep: could not expire subscription rows: {e:#}"),
    }

    let users = match state.store.expired_active_users().await {
        Ok(u) => u,
        Err(e) => {
            error!("expiry sweep: could not list expired users: {e:#}");
            return;
        }
    };
    if users.is_empty() {
        return;
    }
    info!("expiry sweep: revoking access for {} user(s)", users.len());
    for user in users {
        let report = state.moderation.expire(&user).await;
        for message in &report.messages {
            info!("expiry sweep: {}", message.replace('\n', " | "));
        }
    }
}

/// Reconcile channel status once at boot so the stored picture is fresh
/// before the first operator command arrives.
pub fn spawn_startup_sync(state: AppState) -> JoinHandle<()> {
    tokio::spawn(async move {
        let report = state.sync.sync(SyncInitiator::Startup).await;
        info!("startup sync: {}", report.summary());
    })
}
