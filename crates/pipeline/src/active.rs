//! Set of job ids with a unit of work in flight.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use longrun_core::types::JobId;

/// Ids currently being processed. At most one task per id.
#[derive(Debug, Default)]
pub struct ActiveJobs {
    ids: Mutex<HashSet<JobId>>,
}

impl ActiveJobs {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Claim `id`. Returns `None` if it is already claimed; otherwise the
    /// claim lasts until the returned guard is dropped.
    pub fn claim(self: &Arc<Self>, id: &str) -> Option<ActiveGuard> {
        let mut ids = self.ids.lock().unwrap_or_else(PoisonError::into_inner);
        if !ids.insert(id.to_string()) {
            return None;
        }
        Some(ActiveGuard {
            set: Arc::clone(self),
            id: id.to_string(),
        })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Releases its id on drop, including during unwinding.
#[derive(Debug)]
pub struct ActiveGuard {
    set: Arc<ActiveJobs>,
    id: JobId,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.set
            .ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_claim_is_refused_until_release() {
        let active = ActiveJobs::new();
        let guard = active.claim("job-1").unwrap();
        assert!(active.claim("job-1").is_none());
        assert!(active.contains("job-1"));

        drop(guard);
        assert!(!active.contains("job-1"));
        assert!(active.claim("job-1").is_some());
    }

    #[test]
    fn distinct_ids_do_not_interfere() {
        let active = ActiveJobs::new();
        let _a = active.claim("job-a").unwrap();
        let _b = active.claim("job-b").unwrap();
        assert_eq!(active.len(), 2);
    }

    #[test]
    fn claim_is_released_on_panic() {
        let active = ActiveJobs::new();
        let cloned = Arc::clone(&active);
        let result = std::thread::spawn(move || {
            let _guard = cloned.claim("job-p").unwrap();
            panic!("worker blew up");
        })
        .join();

        assert!(result.is_err());
        assert!(active.is_empty());
    }
}
