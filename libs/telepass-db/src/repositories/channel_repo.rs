use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::models::store::Channel;

#[derive(Debug, Clone)]
pub struct ChannelRepository {
    pool: PgPool,
}

impl ChannelRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get_all(&self) -> Result<Vec<Channel>> {
        sqlx::query_as::<_, Channel>("SELECT * FROM channels ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch channels")
    }

    pub async fn get_by_bundle(&self, bundle_id: i64) -> Result<Vec<Channel>> {
        sqlx::query_as::<_, Channel>("SELECT * FROM channels WHERE bundle_id = $1 ORDER BY id ASC")
            .bind(bundle_id)
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch channels by bundle")
    }

    pub async fn get_by_ids(&self, ids: &[i64]) -> Result<Vec<Channel>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        sqlx::query_as::<_, Channel>("SELECT * FROM channels WHERE id = ANY($1) ORDER BY id ASC")
            .bind(ids)
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch channels by IDs")
    }

    /// Record the outcome of a sync probe: new active flag plus check time.
    pub async fn set_status(
        &self,
        id: i64,
        is_active: bool,
        checked_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query("UPDATE channels SET is_active = $1, last_checked_at = $2 WHERE id = $3")
            .bind(is_active)
            .bind(checked_at)
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to update channel status")?;
        Ok(())
    }

    /// Refresh only the check timestamp; used when a probe failed for an
    /// unclassified reason and the prior active flag should stand.
    pub async fn touch_checked(&self, id: i64, checked_at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE channels SET last_checked_at = $1 WHERE id = $2")
            .bind(checked_at)
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to touch channel check timestamp")?;
        Ok(())
    }

    pub async fn count(&self) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM channels")
            .fetch_one(&self.pool)
            .await
            .context("Failed to count channels")
    }
}
