use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::models::store::User;

#[derive(Debug, Clone)]
pub struct UserRepository {
    pool: PgPool,
}

impl UserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_user(row: &PgRow) -> User {
        User {
            id: row.try_get::<i64, _>("id").unwrap_or_default(),
            telegram_id: row.try_get::<String, _>("telegram_id").unwrap_or_default(),
            username: row.try_get::<Option<String>, _>("username").ok().flatten(),
            first_name: row.try_get::<Option<String>, _>("first_name").ok().flatten(),
            last_name: row.try_get::<Option<String>, _>("last_name").ok().flatten(),
            bundle_id: row.try_get::<Option<i64>, _>("bundle_id").ok().flatten(),
            solo_channels: Self::decode_channel_ids(row, "solo_channels"),
            expiry_date: row
                .try_get::<Option<DateTime<Utc>>, _>("expiry_date")
                .ok()
                .flatten(),
            auto_renew: row.try_get::<bool, _>("auto_renew").unwrap_or(false),
            is_active: row.try_get::<bool, _>("is_active").unwrap_or(true),
            referral_code: row
                .try_get::<Option<String>, _>("referral_code")
                .ok()
                .flatten(),
            referred_by: row.try_get::<Option<i64>, _>("referred_by").ok().flatten(),
            created_at: row
                .try_get::<DateTime<Utc>, _>("created_at")
                .unwrap_or_else(|_| Utc::now()),
        }
    }

    // solo_channels is a jsonb array of channel ids; anything non-numeric in
    // it is dropped rather than failing the whole row.
    fn decode_channel_ids(row: &PgRow, column: &str) -> Vec<i64> {
        row.try_get::<serde_json::Value, _>(column)
            .ok()
            .and_then(|v| {
                v.as_array()
                    .map(|a| a.iter().filter_map(|x| x.as_i64()).collect())
            })
            .unwrap_or_default()
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch user by ID")?;
        Ok(row.map(|r| Self::row_to_user(&r)))
    }

    pub async fn get_by_telegram_id(&self, telegram_id: &str) -> Result<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE telegram_id = $1")
            .bind(telegram_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch user by Telegram ID")?;
        Ok(row.map(|r| Self::row_to_user(&r)))
    }

    pub async fn get_by_username(&self, username: &str) -> Result<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE LOWER(username) = LOWER($1)")
            .bind(username)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch user by username")?;
        Ok(row.map(|r| Self::row_to_user(&r)))
    }

    pub async fn set_active(&self, id: i64, is_active: bool) -> Result<()> {
        sqlx::query("UPDATE users SET is_active = $1 WHERE id = $2")
            .bind(is_active)
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to update user moderation flag")?;
        Ok(())
    }

    /// Terminate: deactivate and pull the expiry date back to `expiry`.
    pub async fn terminate(&self, id: i64, expiry: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE users SET is_active = FALSE, expiry_date = $1 WHERE id = $2")
            .bind(expiry)
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to terminate user")?;
        Ok(())
    }

    /// Users whose subscription has lapsed but who are still flagged active.
    pub async fn get_expired_active(&self) -> Result<Vec<User>> {
        let rows = sqlx::query(
            "SELECT * FROM users
             WHERE is_active = TRUE
               AND expiry_date IS NOT NULL
               AND expiry_date < CURRENT_TIMESTAMP
             ORDER BY expiry_date ASC",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch lapsed active users")?;
        Ok(rows.iter().map(Self::row_to_user).collect())
    }

    pub async fn count_active(&self) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE is_active = TRUE")
            .fetch_one(&self.pool)
            .await
            .context("Failed to count active users")
    }

    pub async fn count_expiring_within_days(&self, days: i64) -> Result<i64> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM users
             WHERE is_active = TRUE
               AND expiry_date IS NOT NULL
               AND expiry_date BETWEEN CURRENT_TIMESTAMP
                   AND CURRENT_TIMESTAMP + ($1 * interval '1 day')",
        )
        .bind(days)
        .fetch_one(&self.pool)
        .await
        .context("Failed to count expiring users")
    }
}
