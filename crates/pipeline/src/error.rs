use longrun_core::error::CoreError;
use longrun_db::store::StoreError;

/// Errors returned by orchestrator operations invoked from request
/// handlers. Failures inside a running job never surface here; they are
/// recorded on the job instead.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
