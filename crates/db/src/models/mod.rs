pub mod engine_log;
pub mod job;
