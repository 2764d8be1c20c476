//! # PostgreSQL Store
//!
//! Production [`JobStore`] and [`BatchItemStore`] over sqlx. All mutation is
//! single-row writes; status transitions are conditional
//! (`WHERE status = ANY(expected)`) so duplicate invocations cannot regress a
//! settled job. Engine context is a JSONB column; batch children are found
//! through the `batch_job_id` key inside it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};

use super::{BatchItemStore, JobFilter, JobStore, StorageError, StorageResult};
use crate::constants::context_keys;
use crate::models::{Job, JobSource, NewJob};
use crate::state_machine::JobState;

/// Schema applied by [`PgJobStore::ensure_schema`].
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS flowline_jobs (
    job_id BIGSERIAL PRIMARY KEY,
    status TEXT NOT NULL DEFAULT 'pending',
    source TEXT NOT NULL,
    owner_ref TEXT NOT NULL,
    engine_context JSONB NOT NULL DEFAULT '{}'::jsonb,
    reason TEXT,
    identity_hash VARCHAR(64) NOT NULL UNIQUE,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    completed_at TIMESTAMPTZ
);
CREATE INDEX IF NOT EXISTS idx_flowline_jobs_status ON flowline_jobs (status);
CREATE INDEX IF NOT EXISTS idx_flowline_jobs_batch
    ON flowline_jobs (((engine_context->>'batch_job_id')::bigint))
    WHERE engine_context ? 'batch_job_id';

CREATE TABLE IF NOT EXISTS flowline_processed_items (
    owner_ref TEXT NOT NULL,
    step_id TEXT NOT NULL,
    item_key TEXT NOT NULL,
    processed_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    PRIMARY KEY (owner_ref, step_id, item_key)
);

CREATE TABLE IF NOT EXISTS flowline_batch_items (
    batch_job_id BIGINT NOT NULL,
    position BIGINT NOT NULL,
    payload JSONB NOT NULL,
    PRIMARY KEY (batch_job_id, position)
);
"#;

const JOB_COLUMNS: &str =
    "job_id, status, source, owner_ref, engine_context, reason, identity_hash, created_at, completed_at";

/// PostgreSQL-backed store.
#[derive(Debug, Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the ledger tables if they do not exist.
    pub async fn ensure_schema(&self) -> StorageResult<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    fn job_from_row(row: &sqlx::postgres::PgRow) -> StorageResult<Job> {
        let status: String = row.try_get("status")?;
        let source: String = row.try_get("source")?;
        Ok(Job {
            job_id: row.try_get("job_id")?,
            status: status
                .parse::<JobState>()
                .map_err(StorageError::InvalidRow)?,
            source: source
                .parse::<JobSource>()
                .map_err(StorageError::InvalidRow)?,
            owner_ref: row.try_get("owner_ref")?,
            engine_context: row.try_get("engine_context")?,
            reason: row.try_get("reason")?,
            identity_hash: row.try_get("identity_hash")?,
            created_at: row.try_get("created_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn insert_job(&self, new_job: &NewJob, identity_hash: &str) -> StorageResult<Job> {
        let query = format!(
            "INSERT INTO flowline_jobs (status, source, owner_ref, engine_context, identity_hash) \
             VALUES ('pending', $1, $2, $3, $4) RETURNING {JOB_COLUMNS}"
        );

        let row = sqlx::query(&query)
            .bind(new_job.source.to_string())
            .bind(&new_job.owner_ref)
            .bind(&new_job.engine_context)
            .bind(identity_hash)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                if e.as_database_error()
                    .is_some_and(|db_err| db_err.is_unique_violation())
                {
                    StorageError::DuplicateIdentity(identity_hash.to_string())
                } else {
                    StorageError::Database(e)
                }
            })?;

        Self::job_from_row(&row)
    }

    async fn find_job(&self, job_id: i64) -> StorageResult<Option<Job>> {
        let query = format!("SELECT {JOB_COLUMNS} FROM flowline_jobs WHERE job_id = $1");
        let row = sqlx::query(&query)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| Self::job_from_row(&r)).transpose()
    }

    async fn find_by_identity(&self, identity_hash: &str) -> StorageResult<Option<Job>> {
        let query = format!("SELECT {JOB_COLUMNS} FROM flowline_jobs WHERE identity_hash = $1");
        let row = sqlx::query(&query)
            .bind(identity_hash)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| Self::job_from_row(&r)).transpose()
    }

    async fn update_status(
        &self,
        job_id: i64,
        expected: &[JobState],
        to: JobState,
        reason: Option<&str>,
        completed_at: Option<DateTime<Utc>>,
    ) -> StorageResult<bool> {
        let expected: Vec<String> = expected.iter().map(ToString::to_string).collect();

        let result = sqlx::query(
            "UPDATE flowline_jobs \
             SET status = $2, \
                 reason = COALESCE($3, reason), \
                 completed_at = COALESCE($4, completed_at) \
             WHERE job_id = $1 AND status = ANY($5)",
        )
        .bind(job_id)
        .bind(to.to_string())
        .bind(reason)
        .bind(completed_at)
        .bind(&expected)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_context(&self, job_id: i64) -> StorageResult<Value> {
        let row = sqlx::query("SELECT engine_context FROM flowline_jobs WHERE job_id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StorageError::JobNotFound(job_id))?;
        Ok(row.try_get("engine_context")?)
    }

    async fn put_context(&self, job_id: i64, context: &Value) -> StorageResult<()> {
        let result = sqlx::query("UPDATE flowline_jobs SET engine_context = $2 WHERE job_id = $1")
            .bind(job_id)
            .bind(context)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::JobNotFound(job_id));
        }
        Ok(())
    }

    async fn list_jobs(&self, filter: &JobFilter) -> StorageResult<Vec<Job>> {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {JOB_COLUMNS} FROM flowline_jobs WHERE 1=1"));

        if let Some(statuses) = &filter.statuses {
            let statuses: Vec<String> = statuses.iter().map(ToString::to_string).collect();
            builder.push(" AND status = ANY(").push_bind(statuses).push(")");
        }
        if let Some(sources) = &filter.sources {
            let sources: Vec<String> = sources.iter().map(ToString::to_string).collect();
            builder.push(" AND source = ANY(").push_bind(sources).push(")");
        }
        if let Some(owner_ref) = &filter.owner_ref {
            builder
                .push(" AND owner_ref = ")
                .push_bind(owner_ref.clone());
        }
        if let Some(batch_job_id) = filter.batch_job_id {
            builder
                .push(format!(
                    " AND (engine_context->>'{}')::bigint = ",
                    context_keys::BATCH_JOB_ID
                ))
                .push_bind(batch_job_id);
        }

        builder.push(" ORDER BY job_id");
        if let Some(limit) = filter.limit {
            builder.push(" LIMIT ").push_bind(limit as i64);
        }

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(Self::job_from_row).collect()
    }

    async fn has_processed_items(&self, owner_ref: &str, step_id: &str) -> StorageResult<bool> {
        let row = sqlx::query(
            "SELECT EXISTS(SELECT 1 FROM flowline_processed_items \
             WHERE owner_ref = $1 AND step_id = $2) AS present",
        )
        .bind(owner_ref)
        .bind(step_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("present")?)
    }

    async fn record_processed_item(
        &self,
        owner_ref: &str,
        step_id: &str,
        item_key: &str,
    ) -> StorageResult<()> {
        sqlx::query(
            "INSERT INTO flowline_processed_items (owner_ref, step_id, item_key) \
             VALUES ($1, $2, $3) ON CONFLICT DO NOTHING",
        )
        .bind(owner_ref)
        .bind(step_id)
        .bind(item_key)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl BatchItemStore for PgJobStore {
    async fn put_items(&self, batch_job_id: i64, items: Vec<Value>) -> StorageResult<()> {
        // One row per item; positions give stable offset-addressed chunks.
        for (position, payload) in items.iter().enumerate() {
            sqlx::query(
                "INSERT INTO flowline_batch_items (batch_job_id, position, payload) \
                 VALUES ($1, $2, $3) ON CONFLICT DO NOTHING",
            )
            .bind(batch_job_id)
            .bind(position as i64)
            .bind(payload)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    async fn read_chunk(
        &self,
        batch_job_id: i64,
        offset: usize,
        limit: usize,
    ) -> StorageResult<Vec<Value>> {
        let rows = sqlx::query(
            "SELECT payload FROM flowline_batch_items \
             WHERE batch_job_id = $1 AND position >= $2 \
             ORDER BY position LIMIT $3",
        )
        .bind(batch_job_id)
        .bind(offset as i64)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| row.try_get("payload").map_err(StorageError::from))
            .collect()
    }

    async fn release(&self, batch_job_id: i64) -> StorageResult<()> {
        sqlx::query("DELETE FROM flowline_batch_items WHERE batch_job_id = $1")
            .bind(batch_job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
