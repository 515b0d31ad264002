use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use tracing::warn;

use crate::models::store::{Subscription, SubscriptionStatus};

#[derive(Debug, Clone)]
pub struct SubscriptionRepository {
    pool: PgPool,
}

impl SubscriptionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_subscription(row: &PgRow) -> Result<Subscription> {
        let status_raw: String = row.try_get("status").context("subscription missing status")?;
        let status: SubscriptionStatus = status_raw
            .parse()
            .context("subscription row carries an unknown status")?;
        let solo_channels = row
            .try_get::<serde_json::Value, _>("solo_channels")
            .ok()
            .and_then(|v| {
                v.as_array()
                    .map(|a| a.iter().filter_map(|x| x.as_i64()).collect())
            })
            .unwrap_or_default();
        Ok(Subscription {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            bundle_id: row.try_get::<Option<i64>, _>("bundle_id").ok().flatten(),
            solo_channels,
            start_date: row.try_get("start_date")?,
            end_date: row.try_get("end_date")?,
            status,
            payment_id: row.try_get::<Option<i64>, _>("payment_id").ok().flatten(),
            created_at: row.try_get("created_at")?,
        })
    }

    /// The user's current entitlement period, if any. The schema does not
    /// enforce uniqueness; when several rows qualify the latest-ending one is
    /// returned and the anomaly is logged.
    pub async fn get_active_by_user(&self, user_id: i64) -> Result<Option<Subscription>> {
        let rows = sqlx::query(
            "SELECT * FROM subscriptions
             WHERE user_id = $1 AND status = 'active' AND end_date > CURRENT_TIMESTAMP
             ORDER BY end_date DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch active subscription for user")?;

        if rows.len() > 1 {
            warn!(
                user_id,
                count = rows.len(),
                "multiple active subscription rows; using latest end_date"
            );
        }

        rows.first().map(Self::row_to_subscription).transpose()
    }

    /// Mark one subscription cancelled, ending its period at `end_date`.
    pub async fn cancel(&self, id: i64, end_date: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE subscriptions SET status = 'cancelled', end_date = $1 WHERE id = $2")
            .bind(end_date)
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to cancel subscription")?;
        Ok(())
    }

    /// Flip every overdue `active` row to `expired`; returns how many changed.
    pub async fn expire_overdue(&self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE subscriptions SET status = 'expired'
             WHERE status = 'active' AND end_date < CURRENT_TIMESTAMP",
        )
        .execute(&self.pool)
        .await
        .context("Failed to expire overdue subscriptions")?;
        Ok(result.rows_affected())
    }
}
