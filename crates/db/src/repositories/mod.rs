//! PostgreSQL store backends.

pub mod engine_log_repo;
pub mod job_repo;

pub use engine_log_repo::PgEngineLogStore;
pub use job_repo::PgJobStore;
