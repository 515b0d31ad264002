use dotenvy::dotenv;
use std::collections::HashSet;
use std::env;
use std::sync::Arc;
use teloxide::prelude::*;

mod bot;
mod dispatch;
mod jobs;
mod services;
mod state;
mod storage;
mod telegram;
#[cfg(test)]
mod testing;

use crate::dispatch::ApiQueue;
use crate::services::audit::{AuditLogger, AuditSink, TelegramAuditSink, DEFAULT_AUDIT_LOG_PATH};
use crate::services::moderation::ModerationService;
use crate::services::sync::SyncService;
use crate::state::AppState;
use crate::storage::{PgStorage, Storage};
use crate::telegram::{BotChannelApi, ChannelApi};

#[tokio::main]
async fn main() {
    dotenv().ok();
    env_logger::init();

    log::info!("Starting Telepass moderation bot...");

    let token = env::var("BOT_TOKEN").expect("BOT_TOKEN is not set");
    let database_url = env::var("DATABASE_URL").expect("DATABASE_URL is not set");
    let admins = parse_admin_ids(&env::var("TELEGRAM_ADMIN_IDS").unwrap_or_default());
    if admins.is_empty() {
        log::warn!("TELEGRAM_ADMIN_IDS is empty; every command will be rejected");
    }
    let audit_log_path =
        env::var("AUDIT_LOG_PATH").unwrap_or_else(|_| DEFAULT_AUDIT_LOG_PATH.to_string());

    let pool = telepass_db::connect(&database_url)
        .await
        .expect("database connection failed");

    let bot = Bot::new(token);
    let me = bot.get_me().await.expect("bot identity check failed");
    let bot_username = me.username.clone().unwrap_or_else(|| "unknown".to_string());
    log::info!("Bot connected as @{bot_username}");

    let audit_sink: Option<Arc<dyn AuditSink>> = match env::var("ADMIN_LOG_CHANNEL_ID") {
        Ok(chat_id) if !chat_id.is_empty() => match TelegramAuditSink::new(bot.clone(), &chat_id) {
            Ok(sink) => Some(Arc::new(sink)),
            Err(e) => {
                log::warn!("audit channel disabled: {e:#}");
                None
            }
        },
        _ => None,
    };
    let audit = Arc::new(AuditLogger::new(audit_log_path, audit_sink));

    let store: Arc<dyn Storage> = Arc::new(PgStorage::new(pool));
    let api: Arc<dyn ChannelApi> = Arc::new(BotChannelApi::new(bot.clone(), me.id));
    let queue = Arc::new(ApiQueue::telegram_default());

    let state = AppState {
        store: Arc::clone(&store),
        moderation: Arc::new(ModerationService::new(
            Arc::clone(&store),
            Arc::clone(&api),
            Arc::clone(&queue),
            Arc::clone(&audit),
        )),
        sync: Arc::new(SyncService::new(store, api, queue, Arc::clone(&audit))),
        audit,
        cooldown: Arc::new(bot::utils::cooldown::CommandCooldown::per_second()),
        admins: Arc::new(admins),
        bot_username: Arc::new(bot_username),
    };

    jobs::spawn_startup_sync(state.clone());
    jobs::spawn_expiry_sweep(state.clone());

    let (_tx, rx) = tokio::sync::broadcast::channel(1);
    bot::run_bot(bot, rx, state).await;
}

fn parse_admin_ids(raw: &str) -> HashSet<i64> {
    raw.split(',')
        .filter_map(|part| {
            let part = part.trim();
            if part.is_empty() {
                return None;
            }
            match part.parse::<i64>() {
                Ok(id) => Some(id),
                Err(_) => {
                    log::warn!("ignoring malformed admin id '{part}'");
                    None
                }
            }
        })
        .collect()
}
