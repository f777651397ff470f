//! Capability traits the orchestrator and HTTP layer depend on.

use std::time::Duration;

use async_trait::async_trait;
use longrun_core::job::{Job, JobPatch, NewJob};

use crate::models::engine_log::{EngineLog, LogPage, NewEngineLog};

/// Attempts made by [`JobStore::get_fresh`] before reporting a job missing.
pub const FRESH_READ_ATTEMPTS: u32 = 2;
/// Pause between [`JobStore::get_fresh`] attempts.
pub const FRESH_READ_DELAY: Duration = Duration::from_millis(100);

/// Errors surfaced by store backends after their internal retries.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Malformed job record {id}: {reason}")]
    Malformed { id: String, reason: String },

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Database(err) => match err {
                sqlx::Error::Io(_)
                | sqlx::Error::Tls(_)
                | sqlx::Error::Protocol(_)
                | sqlx::Error::PoolTimedOut
                | sqlx::Error::WorkerCrashed => true,
                // serialization_failure, deadlock_detected
                sqlx::Error::Database(db) => {
                    matches!(db.code().as_deref(), Some("40001") | Some("40P01"))
                }
                _ => false,
            },
            StoreError::Unavailable(_) => true,
            StoreError::Malformed { .. } => false,
        }
    }
}

/// Durable job records.
///
/// Implementations retry transient failures internally. `get` may be
/// weakly consistent with a just-completed write; use [`get_fresh`] when
/// that matters.
///
/// [`get_fresh`]: JobStore::get_fresh
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Allocate an id and persist a `pending` record atomically.
    async fn create(&self, new_job: NewJob) -> Result<Job, StoreError>;

    async fn get(&self, id: &str) -> Result<Option<Job>, StoreError>;

    /// Merge `patch` into the stored record. Updates to the same id are
    /// serialized. A terminal record is returned unchanged.
    async fn update(&self, id: &str, patch: JobPatch) -> Result<Option<Job>, StoreError>;

    /// All jobs, newest first. Malformed records are skipped.
    async fn list(&self) -> Result<Vec<Job>, StoreError>;

    /// Connectivity probe.
    async fn ping(&self) -> Result<(), StoreError>;

    /// `get`, retried while the record is not yet visible.
    async fn get_fresh(&self, id: &str) -> Result<Option<Job>, StoreError> {
        for attempt in 1..=FRESH_READ_ATTEMPTS {
            if let Some(job) = self.get(id).await? {
                return Ok(Some(job));
            }
            if attempt < FRESH_READ_ATTEMPTS {
                tokio::time::sleep(FRESH_READ_DELAY).await;
            }
        }
        Ok(None)
    }
}

/// Engine conversation messages mirrored by the log sync task.
#[async_trait]
pub trait EngineLogStore: Send + Sync {
    /// Insert, or refresh the row with the same `engine_log_id`.
    async fn upsert(&self, log: NewEngineLog) -> Result<EngineLog, StoreError>;

    /// One page of logs, newest first. `page` is 1-based.
    async fn page(&self, page: i64, limit: i64) -> Result<LogPage, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_is_transient() {
        assert!(StoreError::Unavailable("x".into()).is_transient());
    }

    #[test]
    fn pool_timeout_is_transient_but_row_not_found_is_not() {
        assert!(StoreError::Database(sqlx::Error::PoolTimedOut).is_transient());
        assert!(!StoreError::Database(sqlx::Error::RowNotFound).is_transient());
    }

    #[test]
    fn dropped_connection_is_transient() {
        let io = std::io::Error::from(std::io::ErrorKind::ConnectionReset);
        assert!(StoreError::Database(sqlx::Error::Io(io)).is_transient());
    }

    #[test]
    fn malformed_is_permanent() {
        let err = StoreError::Malformed {
            id: "job-1".into(),
            reason: "bad".into(),
        };
        assert!(!err.is_transient());
    }
}
