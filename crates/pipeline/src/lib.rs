//! Background execution of engine jobs.
//!
//! [`orchestrator::JobOrchestrator`] owns the job state machine: it creates
//! records, runs each job as its own task against the engine, turns stream
//! events into throttled progress writes and records the terminal outcome.

pub mod active;
pub mod error;
pub mod orchestrator;
