//! HTTP front end for the job orchestrator.
//!
//! Exposes config, state, error handling, routes and background tasks so
//! the binary entrypoint and the integration tests share them.

pub mod background;
pub mod config;
pub mod error;
pub mod handlers;
pub mod router;
pub mod routes;
pub mod state;
