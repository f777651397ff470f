//! PostgreSQL backend for the `engine_logs` table.

use async_trait::async_trait;
use chrono::Utc;

use crate::models::engine_log::{EngineLog, LogPage, NewEngineLog, Pagination};
use crate::retry::{with_retry, RetryPolicy};
use crate::store::{EngineLogStore, StoreError};
use crate::DbPool;

/// Column list for `engine_logs` queries.
const COLUMNS: &str = "\
    id, engine_log_id, log_type, content, user_id, status, created_at, fetched_at";

/// [`EngineLogStore`] backed by PostgreSQL.
#[derive(Clone)]
pub struct PgEngineLogStore {
    pool: DbPool,
    retry: RetryPolicy,
}

impl PgEngineLogStore {
    pub fn new(pool: DbPool) -> Self {
        Self {
            pool,
            retry: RetryPolicy::default(),
        }
    }

    async fn upsert_once(&self, log: &NewEngineLog) -> Result<EngineLog, StoreError> {
        let query = format!(
            "INSERT INTO engine_logs (engine_log_id, log_type, content, user_id, status, created_at, fetched_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT ON CONSTRAINT uq_engine_logs_engine_log_id DO UPDATE SET \
                 content = EXCLUDED.content, \
                 status = EXCLUDED.status, \
                 fetched_at = EXCLUDED.fetched_at \
             RETURNING {COLUMNS}"
        );
        Ok(sqlx::query_as::<_, EngineLog>(&query)
            .bind(&log.engine_log_id)
            .bind(&log.log_type)
            .bind(&log.content)
            .bind(&log.user_id)
            .bind(&log.status)
            .bind(log.created_at)
            .bind(Utc::now())
            .fetch_one(&self.pool)
            .await?)
    }

    async fn page_once(&self, page: i64, limit: i64) -> Result<LogPage, StoreError> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM engine_logs")
            .fetch_one(&self.pool)
            .await?;
        let pagination = Pagination::new(page, limit, total);

        let query = format!(
            "SELECT {COLUMNS} FROM engine_logs ORDER BY created_at DESC, id DESC LIMIT $1 OFFSET $2"
        );
        let logs = sqlx::query_as::<_, EngineLog>(&query)
            .bind(pagination.limit)
            .bind(pagination.offset())
            .fetch_all(&self.pool)
            .await?;

        Ok(LogPage { logs, pagination })
    }
}

#[async_trait]
impl EngineLogStore for PgEngineLogStore {
    async fn upsert(&self, log: NewEngineLog) -> Result<EngineLog, StoreError> {
        with_retry(&self.retry, "upsert_engine_log", || self.upsert_once(&log)).await
    }

    async fn page(&self, page: i64, limit: i64) -> Result<LogPage, StoreError> {
        let (page, limit) = Pagination::normalize(page, limit);
        with_retry(&self.retry, "page_engine_logs", || self.page_once(page, limit)).await
    }
}
