use std::sync::Arc;

use longrun_db::store::{EngineLogStore, JobStore};
use longrun_pipeline::orchestrator::JobOrchestrator;

use crate::background::log_sync::LogSync;
use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable; everything sits behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    /// Job records, read directly by status and progress endpoints.
    pub jobs: Arc<dyn JobStore>,
    /// Mirrored engine conversation logs.
    pub logs: Arc<dyn EngineLogStore>,
    pub orchestrator: Arc<JobOrchestrator>,
    pub log_sync: Arc<LogSync>,
}
