//! Client library for the external generative-workflow engine.
//!
//! Provides the HTTP API wrapper, typed parsing of the engine's streamed
//! event records, the stream adapter that turns a chunked byte feed into
//! ordered events plus a terminal summary, and the capability traits the
//! orchestrator depends on.

pub mod api;
pub mod engine;
pub mod messages;
pub mod scripted;
pub mod stream;
