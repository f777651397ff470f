//! Domain types and pure logic for long-running engine jobs.
//!
//! Nothing in this crate performs I/O: the job record and its merge rules,
//! request validation, progress estimation and failure classification are
//! shared by the store backends, the orchestrator and the HTTP layer.

pub mod error;
pub mod failure;
pub mod job;
pub mod progress;
pub mod types;
