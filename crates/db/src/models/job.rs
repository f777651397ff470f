//! Row mapping for the `jobs` table.

use longrun_core::job::{Job, JobInput, JobKind, JobStatus, StreamLogEntry};
use longrun_core::types::Timestamp;
use sqlx::FromRow;

use crate::store::StoreError;

/// A raw row from the `jobs` table.
///
/// JSONB columns are decoded as plain values so that one bad row can be
/// reported and skipped instead of failing the whole query.
#[derive(Debug, Clone, FromRow)]
pub struct JobRow {
    pub id: String,
    pub user_id: String,
    pub job_type: String,
    pub status: String,
    pub progress: i16,
    pub input: serde_json::Value,
    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub error_details: Option<serde_json::Value>,
    pub streaming_logs: serde_json::Value,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub completed_at: Option<Timestamp>,
}

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let malformed = |reason: String| StoreError::Malformed {
            id: row.id.clone(),
            reason,
        };

        let kind: JobKind = row
            .job_type
            .parse()
            .map_err(|e: longrun_core::error::CoreError| malformed(e.to_string()))?;
        let status: JobStatus = row
            .status
            .parse()
            .map_err(|e: longrun_core::error::CoreError| malformed(e.to_string()))?;
        let input: JobInput = serde_json::from_value(row.input.clone())
            .map_err(|e| malformed(format!("input: {e}")))?;
        let streaming_logs: Vec<StreamLogEntry> =
            serde_json::from_value(row.streaming_logs.clone())
                .map_err(|e| malformed(format!("streaming_logs: {e}")))?;

        Ok(Job {
            id: row.id,
            user_id: row.user_id,
            kind,
            status,
            progress: row.progress,
            input,
            result: row.result,
            error_message: row.error_message,
            error_details: row.error_details,
            streaming_logs,
            created_at: row.created_at,
            updated_at: row.updated_at,
            completed_at: row.completed_at,
        })
    }
}
