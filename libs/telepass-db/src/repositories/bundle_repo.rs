use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::store::Bundle;

#[derive(Debug, Clone)]
pub struct BundleRepository {
    pool: PgPool,
}

impl BundleRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<Bundle>> {
        sqlx::query_as::<_, Bundle>("SELECT * FROM bundles WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch bundle by ID")
    }
}
