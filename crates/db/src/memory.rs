//! In-process store doubles.
//!
//! Same merge rules and retry behaviour as the PostgreSQL backends, plus
//! fault injection so that retry paths can be exercised without a
//! database.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use longrun_core::job::{Job, JobPatch, NewJob};
use longrun_core::types::{new_job_id, JobId};
use tokio::sync::RwLock;

use crate::models::engine_log::{EngineLog, LogPage, NewEngineLog, Pagination};
use crate::retry::{with_retry, RetryPolicy};
use crate::store::{EngineLogStore, JobStore, StoreError};

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

/// [`JobStore`] kept in a `HashMap` behind a `tokio` `RwLock`.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
    retry: RetryPolicy,
    /// Remaining injected failures for any operation.
    faults: AtomicU32,
    /// Remaining injected failures for updates that set a terminal status.
    terminal_faults: AtomicU32,
    /// Applied (non-no-op) updates, for throttling assertions.
    applied_updates: AtomicUsize,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Fail the next `n` attempts of any operation with a transient error.
    pub fn fail_next_ops(&self, n: u32) {
        self.faults.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` attempts of terminal updates with a transient error.
    pub fn fail_next_terminal_updates(&self, n: u32) {
        self.terminal_faults.store(n, Ordering::SeqCst);
    }

    /// Number of updates that changed a record.
    pub fn applied_updates(&self) -> usize {
        self.applied_updates.load(Ordering::SeqCst)
    }

    fn take_fault(counter: &AtomicU32) -> Result<(), StoreError> {
        let taken = counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if taken {
            Err(StoreError::Unavailable("injected fault".into()))
        } else {
            Ok(())
        }
    }

    async fn merge(&self, id: &str, patch: JobPatch) -> Result<Option<Job>, StoreError> {
        Self::take_fault(&self.faults)?;
        if patch.is_terminal() {
            Self::take_fault(&self.terminal_faults)?;
        }

        let mut jobs = self.jobs.write().await;
        let Some(job) = jobs.get_mut(id) else {
            return Ok(None);
        };
        if job.apply(patch, Utc::now()) {
            self.applied_updates.fetch_add(1, Ordering::SeqCst);
        }
        Ok(Some(job.clone()))
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, new_job: NewJob) -> Result<Job, StoreError> {
        let job = new_job.into_job(new_job_id(), Utc::now());
        with_retry(&self.retry, "create", || async {
            Self::take_fault(&self.faults)?;
            self.jobs
                .write()
                .await
                .insert(job.id.clone(), job.clone());
            Ok(job.clone())
        })
        .await
    }

    async fn get(&self, id: &str) -> Result<Option<Job>, StoreError> {
        with_retry(&self.retry, "get", || async {
            Self::take_fault(&self.faults)?;
            Ok(self.jobs.read().await.get(id).cloned())
        })
        .await
    }

    async fn update(&self, id: &str, patch: JobPatch) -> Result<Option<Job>, StoreError> {
        with_retry(&self.retry, "update", || self.merge(id, patch.clone())).await
    }

    async fn list(&self) -> Result<Vec<Job>, StoreError> {
        with_retry(&self.retry, "list", || async {
            Self::take_fault(&self.faults)?;
            let mut jobs: Vec<Job> = self.jobs.read().await.values().cloned().collect();
            jobs.sort_by(|a, b| {
                b.created_at
                    .cmp(&a.created_at)
                    .then_with(|| b.id.cmp(&a.id))
            });
            Ok(jobs)
        })
        .await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Self::take_fault(&self.faults)
    }
}

// ---------------------------------------------------------------------------
// Engine logs
// ---------------------------------------------------------------------------

/// [`EngineLogStore`] kept in a `Vec`.
#[derive(Default)]
pub struct MemoryEngineLogStore {
    logs: RwLock<Vec<EngineLog>>,
    next_id: AtomicI64,
}

impl MemoryEngineLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.logs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.logs.read().await.is_empty()
    }
}

#[async_trait]
impl EngineLogStore for MemoryEngineLogStore {
    async fn upsert(&self, log: NewEngineLog) -> Result<EngineLog, StoreError> {
        let now = Utc::now();
        let mut logs = self.logs.write().await;

        if let Some(existing) = logs
            .iter_mut()
            .find(|l| l.engine_log_id == log.engine_log_id)
        {
            existing.content = log.content;
            existing.status = log.status;
            existing.fetched_at = now;
            return Ok(existing.clone());
        }

        let row = EngineLog {
            id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            engine_log_id: log.engine_log_id,
            log_type: log.log_type,
            content: log.content,
            user_id: log.user_id,
            status: log.status,
            created_at: log.created_at,
            fetched_at: now,
        };
        logs.push(row.clone());
        Ok(row)
    }

    async fn page(&self, page: i64, limit: i64) -> Result<LogPage, StoreError> {
        let (page, limit) = Pagination::normalize(page, limit);
        let mut logs = self.logs.read().await.clone();
        logs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));

        let pagination = Pagination::new(page, limit, logs.len() as i64);
        let logs = logs
            .into_iter()
            .skip(usize::try_from(pagination.offset()).unwrap_or(usize::MAX))
            .take(limit as usize)
            .collect();
        Ok(LogPage { logs, pagination })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;
    use chrono::Utc;
    use longrun_core::job::{JobInput, JobKind, JobStatus};
    use serde_json::json;

    use super::*;

    fn new_job(kind: JobKind) -> NewJob {
        NewJob {
            kind,
            user_id: "user-1".into(),
            input: JobInput {
                query: Some("hello".into()),
                ..Default::default()
            },
        }
    }

    fn store() -> MemoryJobStore {
        MemoryJobStore::new().with_retry(RetryPolicy::immediate(3))
    }

    #[tokio::test]
    async fn create_then_get_returns_pending_record() {
        let store = store();
        let created = store.create(new_job(JobKind::Chat)).await.unwrap();

        assert_eq!(created.status, JobStatus::Pending);
        assert_eq!(created.progress, 0);

        let fetched = store.get(&created.id).await.unwrap().unwrap();
        assert_eq!(fetched, created);
    }

    #[tokio::test]
    async fn get_unknown_id_is_none() {
        assert!(store().get("job-missing").await.unwrap().is_none());
        assert!(store().get_fresh("job-missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_unknown_id_is_none() {
        let result = store()
            .update("job-missing", JobPatch::progress(10))
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn update_merges_and_bumps_updated_at() {
        let store = store();
        let created = store.create(new_job(JobKind::Chat)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;

        let updated = store
            .update(
                &created.id,
                JobPatch {
                    status: Some(JobStatus::Processing),
                    progress: Some(25),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(updated.status, JobStatus::Processing);
        assert_eq!(updated.progress, 25);
        assert!(updated.updated_at > created.updated_at);
        assert_eq!(updated.input, created.input);
    }

    #[tokio::test]
    async fn terminal_job_ignores_further_updates() {
        let store = store();
        let job = store.create(new_job(JobKind::Workflow)).await.unwrap();
        let done = store
            .update(
                &job.id,
                JobPatch {
                    status: Some(JobStatus::Completed),
                    result: Some(json!({ "text_output": "hi" })),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();

        let after = store
            .update(
                &job.id,
                JobPatch {
                    streaming_logs: Some(Vec::new()),
                    progress: Some(10),
                    status: Some(JobStatus::Failed),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(after, done);
        assert_eq!(store.applied_updates(), 1);
    }

    #[tokio::test]
    async fn list_is_newest_first() {
        let store = store();
        let first = store.create(new_job(JobKind::Chat)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
        let second = store.create(new_job(JobKind::Workflow)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
        let third = store.create(new_job(JobKind::Completion)).await.unwrap();

        let ids: Vec<_> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|j| j.id)
            .collect();
        assert_eq!(ids, [third.id, second.id, first.id]);
    }

    #[tokio::test]
    async fn transient_faults_are_retried_internally() {
        let store = store();
        store.fail_next_ops(2);
        let job = store.create(new_job(JobKind::Chat)).await.unwrap();
        assert!(store.get(&job.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn faults_beyond_the_retry_budget_surface() {
        let store = store();
        store.fail_next_ops(3);
        assert_matches!(
            store.create(new_job(JobKind::Chat)).await,
            Err(StoreError::Unavailable(_))
        );
    }

    #[tokio::test]
    async fn terminal_faults_only_hit_terminal_updates() {
        let store = store();
        let job = store.create(new_job(JobKind::Chat)).await.unwrap();
        store.fail_next_terminal_updates(3);

        store
            .update(&job.id, JobPatch::progress(50))
            .await
            .unwrap();
        assert_matches!(
            store
                .update(&job.id, JobPatch::status(JobStatus::Completed))
                .await,
            Err(StoreError::Unavailable(_))
        );
    }

    #[tokio::test]
    async fn concurrent_updates_to_one_job_serialize() {
        let store = std::sync::Arc::new(store());
        let job = store.create(new_job(JobKind::Workflow)).await.unwrap();

        let mut handles = Vec::new();
        for progress in 1..=50i16 {
            let store = std::sync::Arc::clone(&store);
            let id = job.id.clone();
            handles.push(tokio::spawn(async move {
                store.update(&id, JobPatch::progress(progress)).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let job = store.get(&job.id).await.unwrap().unwrap();
        assert_eq!(job.progress, 50);
    }

    #[tokio::test]
    async fn engine_log_upsert_replaces_by_engine_id() {
        let logs = MemoryEngineLogStore::new();
        let log = NewEngineLog {
            engine_log_id: "msg-1".into(),
            log_type: "message".into(),
            content: json!({ "answer": "v1" }),
            user_id: Some("system".into()),
            status: Some("normal".into()),
            created_at: Utc::now(),
        };

        let first = logs.upsert(log.clone()).await.unwrap();
        let second = logs
            .upsert(NewEngineLog {
                content: json!({ "answer": "v2" }),
                ..log
            })
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.content["answer"], "v2");
        assert_eq!(logs.len().await, 1);
    }

    #[tokio::test]
    async fn engine_log_pages_are_newest_first() {
        let logs = MemoryEngineLogStore::new();
        let base = Utc::now();
        for i in 0..5 {
            logs.upsert(NewEngineLog {
                engine_log_id: format!("msg-{i}"),
                log_type: "message".into(),
                content: json!({}),
                user_id: None,
                status: None,
                created_at: base + chrono::Duration::seconds(i),
            })
            .await
            .unwrap();
        }

        let page = logs.page(2, 2).await.unwrap();
        assert_eq!(page.pagination.total, 5);
        assert_eq!(page.pagination.total_pages, 3);
        let ids: Vec<_> = page.logs.iter().map(|l| l.engine_log_id.as_str()).collect();
        assert_eq!(ids, ["msg-2", "msg-1"]);
    }

    #[tokio::test]
    async fn engine_log_page_far_past_the_end_is_empty() {
        let logs = MemoryEngineLogStore::new();
        let page = logs.page(i64::MAX, crate::models::engine_log::MAX_LIMIT).await.unwrap();
        assert!(page.logs.is_empty());
        assert_eq!(page.pagination.page, i64::MAX);
    }
}
