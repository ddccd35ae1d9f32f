use async_trait::async_trait;
use sqlx::{Pool, Postgres};
use tracing::debug;

use crate::db::models::UserRecord;

/// Persistence contract for user lookups and quota mutations.
///
/// Nothing outside this trait touches `quota_used`; the admin
/// surface mutates `quota_bonus` / `quota_limit` through its own path.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, user_id: &str) -> Result<Option<UserRecord>, sqlx::Error>;

    /// Atomically consume one unit of quota if the user exists and has
    /// room left (or is on an unlimited tier). Returns the updated
    /// record, or `None` when no row matched; the caller must follow
    /// up with `find_by_id` to tell a missing user from an exhausted
    /// quota.
    ///
    /// This is a single conditional UPDATE so that concurrent
    /// submissions racing for the last quota slot serialize at the
    /// database: exactly one of them wins.
    async fn try_charge(&self, user_id: &str) -> Result<Option<UserRecord>, sqlx::Error>;

    /// Return one unit of quota, floored at zero.
    async fn refund(&self, user_id: &str) -> Result<(), sqlx::Error>;

    /// Insert a new user with the given quota settings.
    async fn create(
        &self,
        user_id: &str,
        email: &str,
        tier: &str,
        quota_limit: i32,
        quota_bonus: i32,
    ) -> Result<UserRecord, sqlx::Error>;
}

/// PostgreSQL-backed user store.
pub struct PgUserStore {
    pool: Pool<Postgres>,
}

impl PgUserStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_id(&self, user_id: &str) -> Result<Option<UserRecord>, sqlx::Error> {
        sqlx::query_as::<_, UserRecord>("SELECT * FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
    }

    async fn try_charge(&self, user_id: &str) -> Result<Option<UserRecord>, sqlx::Error> {
        let updated = sqlx::query_as::<_, UserRecord>(
            r#"
            UPDATE users
            SET quota_used = quota_used + 1, updated_at = NOW()
            WHERE id = $1
              AND (quota_limit = -1 OR quota_used < quota_limit + quota_bonus)
            RETURNING *
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(user) = &updated {
            debug!(
                "Charged quota for user {}: used={} limit={} bonus={}",
                user.id, user.quota_used, user.quota_limit, user.quota_bonus
            );
        }

        Ok(updated)
    }

    async fn refund(&self, user_id: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE users
            SET quota_used = GREATEST(quota_used - 1, 0), updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn create(
        &self,
        user_id: &str,
        email: &str,
        tier: &str,
        quota_limit: i32,
        quota_bonus: i32,
    ) -> Result<UserRecord, sqlx::Error> {
        sqlx::query_as::<_, UserRecord>(
            r#"
            INSERT INTO users (id, email, tier, quota_limit, quota_bonus, quota_used)
            VALUES ($1, $2, $3, $4, $5, 0)
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(email)
        .bind(tier)
        .bind(quota_limit)
        .bind(quota_bonus)
        .fetch_one(&self.pool)
        .await
    }
}
