//! Durable trail of every moderation action: an append-only log file plus an
//! optional Telegram audit channel. Both writes are best effort; a broken
//! trail never fails the action it records.

use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::types::Recipient;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::warn;

pub const DEFAULT_AUDIT_LOG_PATH: &str = "logs/actions.log";

/// Who triggered a moderation action.
#[derive(Debug, Clone)]
pub struct Actor {
    pub id: i64,
    pub username: Option<String>,
}

impl Actor {
    pub fn admin(id: i64, username: Option<String>) -> Self {
        Self { id, username }
    }

    /// Scheduled jobs act as this pseudo-admin.
    pub fn system() -> Self {
        Self {
            id: 0,
            username: Some("system".to_string()),
        }
    }

    pub fn display(&self) -> String {
        match &self.username {
            Some(name) => format!("@{name}"),
            None => "N/A".to_string(),
        }
    }
}

/// Out-of-band delivery for audit lines and operational notices.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn send(&self, text: &str) -> anyhow::Result<()>;
}

/// Sends audit traffic to a dedicated Telegram channel.
pub struct TelegramAuditSink {
    bot: Bot,
    chat: Recipient,
}

impl TelegramAuditSink {
    pub fn new(bot: Bot, chat_id: &str) -> anyhow::Result<Self> {
        let chat = if chat_id.starts_with('@') {
            Recipient::ChannelUsername(chat_id.to_string())
        } else {
            Recipient::Id(ChatId(chat_id.parse::<i64>().map_err(|_| {
                anyhow::anyhow!("malformed audit channel id `{chat_id}`")
            })?))
        };
        Ok(Self { bot, chat })
    }
}

#[async_trait]
impl AuditSink for TelegramAuditSink {
    async fn send(&self, text: &str) -> anyhow::Result<()> {
        self.bot.send_message(self.chat.clone(), text).await?;
        Ok(())
    }
}

pub struct AuditLogger {
    path: PathBuf,
    sink: Option<Arc<dyn AuditSink>>,
}

impl AuditLogger {
    pub fn new(path: impl Into<PathBuf>, sink: Option<Arc<dyn AuditSink>>) -> Self {
        Self {
            path: path.into(),
            sink,
        }
    }

    /// Record one action. `error` carries a short failure note when the
    /// action did not fully succeed.
    pub async fn log(
        &self,
        actor: &Actor,
        command: &str,
        args: &str,
        details: &str,
        error: Option<&str>,
    ) {
        let flat_details = details.replace('\n', " | ");
        let mut line = format!(
            "[{}] Admin: {} ({}) | Command: /{} {} | Details: {}",
            Utc::now().to_rfc3339(),
            actor.display(),
            actor.id,
            command,
            args,
            flat_details,
        );
        if let Some(err) = error {
            line.push_str(" | Error: ");
            line.push_str(err);
        }
        line.push('\n');

        if let Err(e) = append_line(&self.path, &line).await {
            warn!("failed to append audit log {}: {e:#}", self.path.display());
        }

        if let Some(sink) = &self.sink {
            let text = format!(
                "🛡️ Moderation action\nAdmin: {} ({})\nCommand: /{} {}\nResult: {}{}",
                actor.display(),
                actor.id,
                command,
                args,
                truncate(&flat_details, 500),
                match error {
                    Some(err) => format!("\nError: {}", truncate(err, 200)),
                    None => String::new(),
                },
            );
            if let Err(e) = sink.send(&text).await {
                warn!("failed to deliver audit notice: {e:#}");
            }
        }
    }

    /// Push a free-form notice to the sink only (sync reports and the like).
    pub async fn notify(&self, text: &str) {
        if let Some(sink) = &self.sink {
            if let Err(e) = sink.send(text).await {
                warn!("failed to deliver notice: {e:#}");
            }
        }
    }
}

async fn append_line(path: &Path, line: &str) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path).await?;
    file.write_all(line.as_bytes()).await?;
    Ok(())
}

fn truncate(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
