use async_trait::async_trait;
use sqlx::{Pool, Postgres};
use tracing::debug;

use crate::db::models::{JobRecord, JobStatus, NewJob};

/// Persistence contract for analysis job records.
///
/// A job row is written by the submitting flow (insert), then exactly
/// once more by either its own background task or the startup recovery
/// sweep, so no per-job locking is layered on top of these operations.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert(&self, job: &NewJob) -> Result<(), sqlx::Error>;

    /// Whether any job already uses this public code.
    async fn code_exists(&self, code: &str) -> Result<bool, sqlx::Error>;

    async fn find_by_id(&self, id: &str) -> Result<Option<JobRecord>, sqlx::Error>;

    /// Owner-scoped lookup: a code belonging to another user is
    /// indistinguishable from a nonexistent one.
    async fn find_by_code_for_user(
        &self,
        code: &str,
        user_id: &str,
    ) -> Result<Option<JobRecord>, sqlx::Error>;

    /// All jobs owned by the user, newest upload first.
    async fn find_by_user(&self, user_id: &str) -> Result<Vec<JobRecord>, sqlx::Error>;

    /// Terminal transition to `success`, recording the result payload.
    async fn mark_success(
        &self,
        id: &str,
        analysis_result: serde_json::Value,
        metadata: Option<serde_json::Value>,
    ) -> Result<(), sqlx::Error>;

    /// Terminal transition to `failed` with a human-readable reason.
    async fn mark_failed(&self, id: &str, error_message: &str) -> Result<(), sqlx::Error>;

    /// Force every `pending` job to `failed` with the given reason.
    /// Returns the number of rows touched. Used by the startup sweep.
    async fn fail_all_pending(&self, error_message: &str) -> Result<u64, sqlx::Error>;
}

/// PostgreSQL-backed job store.
pub struct PgJobStore {
    pool: Pool<Postgres>,
}

impl PgJobStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn insert(&self, job: &NewJob) -> Result<(), sqlx::Error> {
        debug!(
            "Creating analysis job: id={} code={} user={}",
            job.id, job.code, job.user_id
        );

        sqlx::query(
            r#"
            INSERT INTO analysis_jobs
                (id, code, user_id, file_name, file_size, file_type, status, uploaded_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&job.id)
        .bind(&job.code)
        .bind(&job.user_id)
        .bind(&job.file_name)
        .bind(job.file_size)
        .bind(job.file_type)
        .bind(JobStatus::Pending)
        .bind(job.uploaded_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn code_exists(&self, code: &str) -> Result<bool, sqlx::Error> {
        let exists: (bool,) =
            sqlx::query_as("SELECT EXISTS(SELECT 1 FROM analysis_jobs WHERE code = $1)")
                .bind(code)
                .fetch_one(&self.pool)
                .await?;

        Ok(exists.0)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<JobRecord>, sqlx::Error> {
        sqlx::query_as::<_, JobRecord>("SELECT * FROM analysis_jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    async fn find_by_code_for_user(
        &self,
        code: &str,
        user_id: &str,
    ) -> Result<Option<JobRecord>, sqlx::Error> {
        sqlx::query_as::<_, JobRecord>(
            "SELECT * FROM analysis_jobs WHERE code = $1 AND user_id = $2",
        )
        .bind(code)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn find_by_user(&self, user_id: &str) -> Result<Vec<JobRecord>, sqlx::Error> {
        sqlx::query_as::<_, JobRecord>(
            "SELECT * FROM analysis_jobs WHERE user_id = $1 ORDER BY uploaded_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
    }

    async fn mark_success(
        &self,
        id: &str,
        analysis_result: serde_json::Value,
        metadata: Option<serde_json::Value>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE analysis_jobs
            SET status = $2,
                analysis_result = $3,
                metadata = $4,
                completed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(JobStatus::Success)
        .bind(analysis_result)
        .bind(metadata)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_failed(&self, id: &str, error_message: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE analysis_jobs
            SET status = $2,
                error_message = $3,
                completed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(JobStatus::Failed)
        .bind(error_message)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn fail_all_pending(&self, error_message: &str) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE analysis_jobs
            SET status = $1,
                error_message = $2,
                completed_at = NOW(),
                updated_at = NOW()
            WHERE status = $3
            "#,
        )
        .bind(JobStatus::Failed)
        .bind(error_message)
        .bind(JobStatus::Pending)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
