/// Job identifiers are opaque strings (`job-<uuid v7>`).
pub type JobId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Allocate a new job identifier.
///
/// UUID v7 keeps identifiers roughly time-ordered, which makes them easy to
/// eyeball in logs next to `created_at`.
pub fn new_job_id() -> JobId {
    format!("job-{}", uuid::Uuid::now_v7())
}
