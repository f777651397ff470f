//! PostgreSQL backend for the `jobs` table.
//!
//! Updates are read-modify-write inside a transaction holding the row lock
//! (`SELECT ... FOR UPDATE`), so concurrent patches to one job serialize and
//! the merge rules in [`Job::apply`] see the latest state.

use async_trait::async_trait;
use chrono::Utc;
use longrun_core::job::{Job, JobPatch, NewJob};
use longrun_core::types::new_job_id;
use sqlx::types::Json;

use crate::models::job::JobRow;
use crate::retry::{with_retry, RetryPolicy};
use crate::store::{JobStore, StoreError};
use crate::DbPool;

/// Column list for `jobs` queries.
const COLUMNS: &str = "\
    id, user_id, job_type, status, progress, input, result, \
    error_message, error_details, streaming_logs, \
    created_at, updated_at, completed_at";

/// [`JobStore`] backed by PostgreSQL.
#[derive(Clone)]
pub struct PgJobStore {
    pool: DbPool,
    retry: RetryPolicy,
}

impl PgJobStore {
    pub fn new(pool: DbPool) -> Self {
        Self {
            pool,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// One `create` attempt. A conflict on `id` means an earlier attempt
    /// committed but its reply was lost; the stored row is the result.
    async fn insert(&self, job: &Job) -> Result<Job, StoreError> {
        let query = format!(
            "INSERT INTO jobs (id, user_id, job_type, status, progress, input, streaming_logs, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8) \
             ON CONFLICT (id) DO NOTHING \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query_as::<_, JobRow>(&query)
            .bind(&job.id)
            .bind(&job.user_id)
            .bind(job.kind.as_str())
            .bind(job.status.as_str())
            .bind(job.progress)
            .bind(Json(&job.input))
            .bind(Json(&job.streaming_logs))
            .bind(job.created_at)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Job::try_from(row),
            None => {
                tracing::warn!(job_id = %job.id, "Job already inserted by an earlier attempt");
                already_inserted(&job.id, self.find_by_id(&job.id).await?)
            }
        }
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Job>, StoreError> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = $1");
        let row = sqlx::query_as::<_, JobRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Job::try_from).transpose()
    }

    async fn merge(&self, id: &str, patch: JobPatch) -> Result<Option<Job>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = $1 FOR UPDATE");
        let Some(row) = sqlx::query_as::<_, JobRow>(&query)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
        else {
            return Ok(None);
        };

        let mut job = Job::try_from(row)?;
        if !job.apply(patch, Utc::now()) {
            tracing::debug!(job_id = %id, status = %job.status, "Ignoring update to terminal job");
            return Ok(Some(job));
        }

        sqlx::query(
            "UPDATE jobs SET status = $2, progress = $3, result = $4, error_message = $5, \
             error_details = $6, streaming_logs = $7, updated_at = $8, completed_at = $9 \
             WHERE id = $1",
        )
        .bind(&job.id)
        .bind(job.status.as_str())
        .bind(job.progress)
        .bind(&job.result)
        .bind(&job.error_message)
        .bind(&job.error_details)
        .bind(Json(&job.streaming_logs))
        .bind(job.updated_at)
        .bind(job.completed_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(job))
    }

    async fn list_all(&self) -> Result<Vec<Job>, StoreError> {
        let query = format!("SELECT {COLUMNS} FROM jobs ORDER BY created_at DESC, id DESC");
        let rows = sqlx::query_as::<_, JobRow>(&query)
            .fetch_all(&self.pool)
            .await?;
        Ok(collect_valid(rows))
    }
}

/// Resolve an insert that conflicted on `id`. The row is re-read; if it is
/// not visible yet the attempt counts as transient.
fn already_inserted(id: &str, existing: Option<Job>) -> Result<Job, StoreError> {
    existing.ok_or_else(|| {
        StoreError::Unavailable(format!("job {id} conflicted on insert but could not be read"))
    })
}

/// Convert rows to jobs, logging and skipping any that fail to decode.
pub(crate) fn collect_valid(rows: Vec<JobRow>) -> Vec<Job> {
    rows.into_iter()
        .filter_map(|row| match Job::try_from(row) {
            Ok(job) => Some(job),
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed job record");
                None
            }
        })
        .collect()
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(&self, new_job: NewJob) -> Result<Job, StoreError> {
        let job = new_job.into_job(new_job_id(), Utc::now());
        with_retry(&self.retry, "create", || self.insert(&job)).await
    }

    async fn get(&self, id: &str) -> Result<Option<Job>, StoreError> {
        with_retry(&self.retry, "get", || self.find_by_id(id)).await
    }

    async fn update(&self, id: &str, patch: JobPatch) -> Result<Option<Job>, StoreError> {
        with_retry(&self.retry, "update", || self.merge(id, patch.clone())).await
    }

    async fn list(&self) -> Result<Vec<Job>, StoreError> {
        with_retry(&self.retry, "list", || self.list_all()).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        crate::health_check(&self.pool).await?;
        Ok(())
    }
}
