//! Job orchestrator.
//!
//! Each submitted job runs as its own Tokio task:
//!
//! 1. `processing` is written before the engine is called, so a crash
//!    mid-run still leaves an inspectable record.
//! 2. Chat and completion jobs make one blocking call; workflow jobs
//!    consume the engine's event feed, persisting log snapshots and
//!    progress on a throttle.
//! 3. The terminal outcome is written with an aggressive retry.
//!
//! Failures inside a job never propagate to the caller. They are
//! classified and recorded on the job.

use std::sync::Arc;

use chrono::Utc;
use longrun_core::failure::FailureClass;
use longrun_core::job::{Job, JobPatch, JobStatus, StartJobRequest, StreamLogEntry};
use longrun_core::progress::{self, Phase, PersistPolicy, ProgressTracker};
use longrun_db::retry::{with_retry, RetryPolicy};
use longrun_db::store::{JobStore, StoreError};
use longrun_engine::api::EngineError;
use longrun_engine::engine::WorkflowEngine;
use longrun_engine::stream::{EventReader, StreamItem};
use serde_json::{json, Value};

use crate::active::ActiveJobs;
use crate::error::PipelineError;

/// `errorMessage` written by [`JobOrchestrator::cancel`].
pub const CANCELLED_MESSAGE: &str = "Cancelled by user";

/// Added to the result of a workflow whose feed was cut short.
pub const STREAM_INTERRUPTED_WARNING: &str = "The streaming connection was interrupted due to \
    network timeout. The workflow likely completed on the engine, but the final result could \
    not be received.";

/// Companion to [`STREAM_INTERRUPTED_WARNING`].
pub const STREAM_INTERRUPTED_SUGGESTION: &str =
    "Check the engine dashboard to verify the workflow status.";

/// Tunables for the orchestrator.
#[derive(Debug, Clone, Copy)]
pub struct OrchestratorConfig {
    /// When intermediate stream snapshots are written.
    pub persist: PersistPolicy,
    /// Retry applied on top of the store's own retries for terminal writes.
    pub terminal_retry: RetryPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            persist: PersistPolicy::default(),
            terminal_retry: RetryPolicy::terminal(),
        }
    }
}

/// Runs jobs against the engine and records their lifecycle.
pub struct JobOrchestrator {
    store: Arc<dyn JobStore>,
    engine: Arc<dyn WorkflowEngine>,
    active: Arc<ActiveJobs>,
    config: OrchestratorConfig,
}

impl JobOrchestrator {
    pub fn new(
        store: Arc<dyn JobStore>,
        engine: Arc<dyn WorkflowEngine>,
        config: OrchestratorConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            engine,
            active: ActiveJobs::new(),
            config,
        })
    }

    // ---------------------------------------------------------------------
    // Request-facing operations
    // ---------------------------------------------------------------------

    /// Validate, persist a `pending` record and schedule the job. Returns
    /// as soon as the record exists.
    pub async fn submit(self: &Arc<Self>, request: StartJobRequest) -> Result<Job, PipelineError> {
        let new_job = request.into_new_job()?;
        let job = self.store.create(new_job).await?;

        tracing::info!(
            job_id = %job.id,
            job_type = %job.kind,
            user_id = %job.user_id,
            "Job submitted",
        );

        self.spawn(&job);
        Ok(job)
    }

    /// Start the unit of work for `job` unless one is already running.
    ///
    /// Returns `false` when the id is already active; the call is then a
    /// no-op.
    pub fn spawn(self: &Arc<Self>, job: &Job) -> bool {
        let Some(guard) = self.active.claim(&job.id) else {
            tracing::debug!(job_id = %job.id, "Job already being processed, ignoring start");
            return false;
        };

        let this = Arc::clone(self);
        let job = job.clone();
        tokio::spawn(async move {
            let _guard = guard;
            this.process(job).await;
        });
        true
    }

    /// Current state of a job, tolerating a just-created record that is
    /// not yet visible.
    pub async fn status(&self, id: &str) -> Result<Option<Job>, PipelineError> {
        Ok(self.store.get_fresh(id).await?)
    }

    pub async fn list(&self) -> Result<Vec<Job>, PipelineError> {
        Ok(self.store.list().await?)
    }

    /// Force a non-terminal job to `failed`.
    ///
    /// Returns `None` when the job does not exist or has already finished.
    /// The running task is not interrupted; its eventual terminal write is
    /// ignored because the record is already terminal.
    pub async fn cancel(&self, id: &str) -> Result<Option<Job>, PipelineError> {
        let Some(job) = self.store.get_fresh(id).await? else {
            return Ok(None);
        };
        if job.status.is_terminal() {
            tracing::info!(job_id = %id, status = %job.status, "Cancel ignored, job already finished");
            return Ok(None);
        }

        let patch = JobPatch {
            status: Some(JobStatus::Failed),
            error_message: Some(CANCELLED_MESSAGE.to_string()),
            ..Default::default()
        };
        let updated = self.store.update(id, patch).await?;

        // The job may have reached a terminal state between the read and
        // the write, in which case the update was a no-op.
        match updated {
            Some(job)
                if job.status == JobStatus::Failed
                    && job.error_message.as_deref() == Some(CANCELLED_MESSAGE) =>
            {
                tracing::info!(job_id = %id, "Job cancelled");
                Ok(Some(job))
            }
            _ => Ok(None),
        }
    }

    /// Number of jobs with a task in flight.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.active.contains(id)
    }

    // ---------------------------------------------------------------------
    // Unit of work
    // ---------------------------------------------------------------------

    async fn process(&self, job: Job) {
        let job_id = job.id.as_str();

        let started = JobPatch {
            status: Some(JobStatus::Processing),
            progress: Some(progress::SUBMITTED),
            ..Default::default()
        };
        match self.store.update(job_id, started).await {
            Ok(Some(current)) if current.status.is_terminal() => {
                tracing::info!(job_id, status = %current.status, "Job finished before processing began");
                return;
            }
            Ok(Some(_)) => {}
            Ok(None) => {
                tracing::warn!(job_id, "Job record disappeared before processing began");
                return;
            }
            Err(e) => {
                tracing::error!(
                    job_id,
                    error = %e,
                    "Failed to mark job processing, not calling the engine",
                );
                let class = FailureClass::Unexpected {
                    detail: format!("Job store unavailable: {e}"),
                };
                self.fail(job_id, class, None).await;
                return;
            }
        }

        tracing::info!(job_id, job_type = %job.kind, "Job processing started");

        let mut tracker = ProgressTracker::new();
        let mut logs = Vec::new();
        let outcome = if job.kind.is_streaming() {
            self.run_streaming(&job, &mut tracker, &mut logs).await
        } else {
            self.run_blocking(&job, &mut tracker).await
        };
        let logs = (!logs.is_empty()).then_some(logs);

        match outcome {
            Ok(result) => self.complete(job_id, result, logs).await,
            Err(e) => {
                tracing::warn!(job_id, job_type = %job.kind, error = %e, "Engine call failed");
                self.fail(job_id, e.failure_class(), logs).await;
            }
        }
    }

    async fn run_blocking(
        &self,
        job: &Job,
        tracker: &mut ProgressTracker,
    ) -> Result<Value, EngineError> {
        self.report_progress(&job.id, tracker, Phase::Accepted).await;
        let result = self
            .engine
            .run_blocking(job.kind, &job.input, &job.user_id)
            .await?;
        self.report_progress(&job.id, tracker, Phase::Returned).await;
        Ok(result)
    }

    async fn run_streaming(
        &self,
        job: &Job,
        tracker: &mut ProgressTracker,
        logs: &mut Vec<StreamLogEntry>,
    ) -> Result<Value, EngineError> {
        let job_id = job.id.as_str();

        self.report_progress(job_id, tracker, Phase::Accepted).await;
        let feed = self.engine.run_streaming(&job.input, &job.user_id).await?;
        let mut reader = EventReader::new(feed);

        while let Some(item) = reader.next().await {
            match item? {
                StreamItem::Event(event) => {
                    logs.push(event.to_log_entry());
                    tracker.advance(Phase::Streaming {
                        events: event.sequence,
                    });

                    if self
                        .config
                        .persist
                        .should_persist(event.sequence, event.kind.is_milestone())
                    {
                        tracing::debug!(
                            job_id,
                            events = event.sequence,
                            event_kind = event.kind.as_str(),
                            "Persisting stream snapshot",
                        );
                        let patch = JobPatch {
                            progress: Some(tracker.current()),
                            streaming_logs: Some(logs.clone()),
                            ..Default::default()
                        };
                        self.write_best_effort(job_id, patch, "stream snapshot").await;
                    }
                }
                StreamItem::Finished(summary) => {
                    tracing::info!(
                        job_id,
                        events = summary.total_events,
                        partial = summary.is_partial(),
                        "Workflow stream finished",
                    );

                    tracker.advance(Phase::Returned);
                    let patch = JobPatch {
                        progress: Some(tracker.current()),
                        streaming_logs: Some(logs.clone()),
                        ..Default::default()
                    };
                    self.write_best_effort(job_id, patch, "final stream snapshot").await;

                    let partial = summary.is_partial();
                    let mut result = summary.into_result();
                    if partial {
                        result["warning"] = json!(STREAM_INTERRUPTED_WARNING);
                        result["suggestion"] = json!(STREAM_INTERRUPTED_SUGGESTION);
                    }
                    return Ok(result);
                }
            }
        }

        Err(EngineError::Stream(
            "event stream ended without a summary".into(),
        ))
    }

    // ---------------------------------------------------------------------
    // Store writes
    // ---------------------------------------------------------------------

    async fn report_progress(&self, job_id: &str, tracker: &mut ProgressTracker, phase: Phase) {
        if let Some(value) = tracker.advance(phase) {
            self.write_best_effort(job_id, JobPatch::progress(value), "progress")
                .await;
        }
    }

    /// Intermediate writes are non-fatal: a lost snapshot is superseded by
    /// the next one or by the terminal write.
    async fn write_best_effort(&self, job_id: &str, patch: JobPatch, what: &'static str) {
        if let Err(e) = self.store.update(job_id, patch).await {
            tracing::warn!(job_id, error = %e, write = what, "Non-fatal job write failed");
        }
    }

    async fn write_terminal(&self, job_id: &str, patch: JobPatch) -> Result<Option<Job>, StoreError> {
        with_retry(&self.config.terminal_retry, "terminal_update", || {
            self.store.update(job_id, patch.clone())
        })
        .await
    }

    async fn complete(&self, job_id: &str, result: Value, logs: Option<Vec<StreamLogEntry>>) {
        let patch = JobPatch {
            status: Some(JobStatus::Completed),
            progress: Some(progress::FINALIZED),
            result: Some(result),
            streaming_logs: logs,
            completed_at: Some(Utc::now()),
            ..Default::default()
        };

        match self.write_terminal(job_id, patch).await {
            Ok(Some(job)) if job.status == JobStatus::Completed => {
                tracing::info!(job_id, "Job completed");
            }
            Ok(Some(job)) => {
                tracing::info!(job_id, status = %job.status, "Job already finished, completion ignored");
            }
            Ok(None) => tracing::warn!(job_id, "Job record disappeared before completion"),
            Err(e) => tracing::error!(job_id, error = %e, "Failed to record job completion"),
        }
    }

    async fn fail(&self, job_id: &str, class: FailureClass, logs: Option<Vec<StreamLogEntry>>) {
        let now = Utc::now();
        let message = class.message();
        let patch = JobPatch {
            status: Some(JobStatus::Failed),
            error_message: Some(message.clone()),
            error_details: Some(class.details(now)),
            streaming_logs: logs,
            completed_at: Some(now),
            ..Default::default()
        };

        match self.write_terminal(job_id, patch).await {
            Ok(Some(job)) if job.error_message.as_deref() == Some(message.as_str()) => {
                tracing::info!(job_id, failure = class.label(), "Job failed");
            }
            Ok(Some(job)) => {
                tracing::info!(job_id, status = %job.status, "Job already finished, failure ignored");
            }
            Ok(None) => tracing::warn!(job_id, "Job record disappeared before failure"),
            Err(e) => tracing::error!(job_id, error = %e, "Failed to record job failure"),
        }
    }
}
