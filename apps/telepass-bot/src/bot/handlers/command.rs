use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;
use tracing::{error, info};

use crate::bot::utils::{chunk_report, MAX_MESSAGE_LEN};
use crate::services::audit::Actor;
use crate::services::moderation::OpReport;
use crate::services::sync::SyncInitiator;
use crate::AppState;

#[derive(BotCommands, Clone, Debug)]
#[command(
    rename_rule = "lowercase",
    description = "Moderation commands (admins only):"
)]
pub enum AdminCommand {
    #[command(description = "show available commands")]
    Start,
    #[command(description = "show available commands")]
    Help,
    #[command(description = "ban a user everywhere: /ban <id|@username>")]
    Ban(String),
    #[command(description = "restore access for a paid-up user: /unban <id|@username>")]
    Unban(String),
    #[command(description = "restore access regardless of subscription: /forceunban <id|@username>")]
    Forceunban(String),
    #[command(description = "end subscription now and ban: /terminate <id|@username>")]
    Terminate(String),
    #[command(description = "re-check the bot's admin status in every channel")]
    Sync,
    #[command(description = "show a user's record: /userinfo <id|@username>")]
    Userinfo(String),
    #[command(description = "list managed channels")]
    Channels,
    #[command(description = "headline system numbers")]
    Stats,
}

pub async fn message_handler(
    bot: Bot,
    msg: Message,
    state: AppState,
) -> Result<(), teloxide::RequestError> {
    let Some(text) = msg.text().map(str::to_string) else {
        return Ok(());
    };
    let Some(from) = msg.from.clone() else {
        return Ok(());
    };
    let admin_id = from.id.0 as i64;

    if !state.admins.contains(&admin_id) {
        if text.starts_with('/') {
            info!("rejected command from non-admin {admin_id}");
            send_text(&bot, msg.chat.id, "❌ You are not authorized to use this bot.").await;
        }
        return Ok(());
    }

    let command = match AdminCommand::parse(&text, state.bot_username.as_str()) {
        Ok(c) => c,
        Err(_) => {
            if text.starts_with('/') {
                send_text(&bot, msg.chat.id, "Unknown command. Try /help.").await;
            }
            return Ok(());
        }
    };

    if !state.cooldown.try_acquire(admin_id).await {
        send_text(&bot, msg.chat.id, "⏳ One command per second, please.").await;
        return Ok(());
    }

    let actor = Actor::admin(admin_id, from.username.clone());
    info!("admin {admin_id} issued {command:?}");

    match command {
        AdminCommand::Start | AdminCommand::Help => {
            send_text(&bot, msg.chat.id, &AdminCommand::descriptions().to_string()).await;
        }
        AdminCommand::Ban(arg) => {
            let Some(target) = require_target(&bot, &msg, &state, &actor, "ban", &arg).await else {
                return Ok(());
            };
            let report = state.moderation.ban(&actor, &target).await;
            send_report(&bot, msg.chat.id, report).await;
        }
        AdminCommand::Unban(arg) => {
            let Some(target) = require_target(&bot, &msg, &state, &actor, "unban", &arg).await
            else {
                return Ok(());
            };
            let report = state.moderation.unban(&actor, &target, false).await;
            send_report(&bot, msg.chat.id, report).await;
        }
        AdminCommand::Forceunban(arg) => {
            let Some(target) =
                require_target(&bot, &msg, &state, &actor, "forceunban", &arg).await
            else {
                return Ok(());
            };
            let report = state.moderation.unban(&actor, &target, true).await;
            send_report(&bot, msg.chat.id, report).await;
        }
        AdminCommand::Terminate(arg) => {
            let Some(target) =
                require_target(&bot, &msg, &state, &actor, "terminate", &arg).await
            else {
                return Ok(());
            };
            let report = state.moderation.terminate(&actor, &target).await;
            send_report(&bot, msg.chat.id, report).await;
        }
        AdminCommand::Sync => {
            send_text(&bot, msg.chat.id, "🔄 Starting channel synchronization...").await;
            let report = state.sync.sync(SyncInitiator::Admin(admin_id)).await;
            send_text(&bot, msg.chat.id, &report.details.join("\n")).await;
        }
        AdminCommand::Userinfo(arg) => {
            let Some(target) =
                require_target(&bot, &msg, &state, &actor, "userinfo", &arg).await
            else {
                return Ok(());
            };
            let text = user_info_text(&state, &target).await;
            send_text(&bot, msg.chat.id, &text).await;
        }
        AdminCommand::Channels => {
            let text = channels_text(&state).await;
            send_text(&bot, msg.chat.id, &text).await;
        }
        AdminCommand::Stats => {
            let text = match state.store.stats().await {
                Ok(stats) => format!(
                    "📊 System stats\nActive users: {}\nExpiring within 3 days: {}\nManaged channels: {}",
                    stats.active_users, stats.expiring_soon, stats.total_channels
                ),
                Err(e) => {
                    error!("stats query failed: {e:#}");
                    format!("❌ Could not load stats: {e:#}")
                }
            };
            send_text(&bot, msg.chat.id, &text).await;
        }
    }

    Ok(())
}

/// Empty-argument commands get a usage hint, and the attempt is still
/// audited so a half-typed /ban shows up in the trail.
async fn require_target(
    bot: &Bot,
    msg: &Message,
    state: &AppState,
    actor: &Actor,
    command: &str,
    arg: &str,
) -> Option<String> {
    let target = arg.trim();
    if target.is_empty() {
        let usage = format!("Usage: /{command} <telegram_id|@username>");
        state
            .audit
            .log(actor, command, "", "missing target argument", None)
            .await;
        send_text(bot, msg.chat.id, &usage).await;
        return None;
    }
    Some(target.to_string())
}

async fn send_report(bot: &Bot, chat: ChatId, report: OpReport) {
    for message in report.messages {
        send_text(bot, chat, &message).await;
    }
}

async fn send_text(bot: &Bot, chat: ChatId, text: &str) {
    for chunk in chunk_report(text, MAX_MESSAGE_LEN) {
        if let Err(e) = bot.send_message(chat, chunk).await {
            error!("failed to send reply: {e}");
        }
    }
}

async fn user_info_text(state: &AppState, target: &str) -> String {
    let found = match target.strip_prefix('@') {
        Some(name) => state.store.user_by_username(name).await,
        None => {
            if target.parse::<i64>().is_err() {
                return "❌ Invalid format. Use a numeric Telegram ID or @username.".to_string();
            }
            state.store.user_by_telegram_id(target).await
        }
    };
    let user = match found {
        Ok(Some(u)) => u,
        Ok(None) => return format!("❌ User not found: {target}"),
        Err(e) => return format!("❌ Lookup failed: {e:#}"),
    };

    let mut out = format!(
        "👤 {}\nTelegram ID: {}\nName: {} {}\nStatus: {}\nAuto-renew: {}\n",
        user.display_handle(),
        user.telegram_id,
        user.first_name.as_deref().unwrap_or("-"),
        user.last_name.as_deref().unwrap_or(""),
        if user.is_active { "active" } else { "inactive/banned" },
        if user.auto_renew { "on" } else { "off" },
    );
    match user.expiry_date {
        Some(d) => out.push_str(&format!("Expiry: {}\n", d.format("%Y-%m-%d %H:%M UTC"))),
        None => out.push_str("Expiry: none\n"),
    }
    match user.bundle_id {
        Some(id) => match state.store.bundle_by_id(id).await {
            Ok(Some(bundle)) => out.push_str(&format!("Bundle: {} (ID {})\n", bundle.name, id)),
            Ok(None) => out.push_str(&format!("Bundle: unknown (ID {})\n", id)),
            Err(e) => out.push_str(&format!("Bundle: lookup failed: {e:#}\n")),
        },
        None => out.push_str("Bundle: none\n"),
    }
    out.push_str(&format!("Solo channels: {}\n", user.solo_channels.len()));
    match state.store.active_subscription(user.id).await {
        Ok(Some(sub)) => out.push_str(&format!(
            "Active subscription: until {}",
            sub.end_date.format("%Y-%m-%d %H:%M UTC")
        )),
        Ok(None) => out.push_str("Active subscription: none"),
        Err(e) => out.push_str(&format!("Active subscription: lookup failed: {e:#}")),
    }
    out
}

const CHANNEL_LIST_LIMIT: usize = 20;

async fn channels_text(state: &AppState) -> String {
    let channels = match state.store.channels().await {
        Ok(c) => c,
        Err(e) => return format!("❌ Could not list channels: {e:#}"),
    };
    if channels.is_empty() {
        return "No channels on record.".to_string();
    }
    let mut out = format!("📡 Channels ({} total):\n", channels.len());
    for channel in channels.iter().take(CHANNEL_LIST_LIMIT) {
        let checked = channel
            .last_checked_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "never".to_string());
        out.push_str(&format!(
            "• {} (ID {}) — chat: {} — {} — checked: {}\n",
            channel.title,
            channel.id,
            channel.chat_id.as_deref().unwrap_or("unset"),
            if channel.is_active { "active" } else { "inactive" },
            checked,
        ));
    }
    if channels.len() > CHANNEL_LIST_LIMIT {
        out.push_str(&format!(
            "…and {} more.",
            channels.len() - CHANNEL_LIST_LIMIT
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{app_state_harness, user};

    #[tokio::test]
    async fn userinfo_rejects_non_numeric_ids_without_a_lookup() {
        let (store, _api, state) = app_state_harness();
        store.add_user(user(1, "555", None, vec![], true, None));

        let text = user_info_text(&state, "12x34").await;
        assert!(text.contains("Invalid format"));
        assert!(!text.contains("not found"));
    }

    #[tokio::test]
    async fn userinfo_resolves_numeric_and_username_targets() {
        let (store, _api, state) = app_state_harness();
        let mut u = user(1, "555", None, vec![1, 2], true, None);
        u.username = Some("someone".into());
        store.add_user(u);

        let by_id = user_info_text(&state, "555").await;
        assert!(by_id.contains("@someone"));
        assert!(by_id.contains("Solo channels: 2"));

        let by_name = user_info_text(&state, "@someone").await;
        assert!(by_name.contains("Telegram ID: 555"));

        let missing = user_info_text(&state, "556").await;
        assert!(missing.contains("User not found"));
    }
}
