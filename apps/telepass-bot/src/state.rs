use std::collections::HashSet;
use std::sync::Arc;

use crate::bot::utils::cooldown::CommandCooldown;
use crate::services::audit::AuditLogger;
use crate::services::moderation::ModerationService;
use crate::services::sync::SyncService;
use crate::storage::Storage;

/// Everything the handlers need, cheap to clone into dptree.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Storage>,
    pub moderation: Arc<ModerationService>,
    pub sync: Arc<SyncService>,
    pub audit: Arc<AuditLogger>,
    pub cooldown: Arc<CommandCooldown>,
    /// Telegram ids allowed to issue moderation commands.
    pub admins: Arc<HashSet<i64>>,
    pub bot_username: Arc<String>,
}
