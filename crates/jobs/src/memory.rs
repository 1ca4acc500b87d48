//! In-process job store for local runs and tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use enqueuer_core::JobStatus;

use crate::error::JobStoreError;
use crate::store::JobStore;

#[derive(Debug, Default)]
struct State {
    records: HashMap<String, JobStatus>,
    reads: usize,
    writes: Vec<(String, JobStatus)>,
    failing_writes: u32,
}

/// Shared handle; clones observe the same records.
#[derive(Debug, Clone, Default)]
pub struct MemoryJobStore {
    state: Arc<Mutex<State>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Seed a record, as the upstream intake process would.
    pub fn insert(&self, key: impl Into<String>, status: JobStatus) {
        self.lock().records.insert(key.into(), status);
    }

    pub fn status_of(&self, key: &str) -> Option<JobStatus> {
        self.lock().records.get(key).cloned()
    }

    /// Every `set_status` call that succeeded, in order.
    pub fn writes(&self) -> Vec<(String, JobStatus)> {
        self.lock().writes.clone()
    }

    pub fn reads(&self) -> usize {
        self.lock().reads
    }

    /// The next `n` `set_status` calls fail as if the database were down.
    pub fn fail_next_writes(&self, n: u32) {
        self.lock().failing_writes = n;
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn has_record(&self, key: &str) -> Result<bool, JobStoreError> {
        let mut state = self.lock();
        state.reads += 1;
        Ok(state.records.contains_key(key))
    }

    async fn get_status(&self, key: &str) -> Result<Option<JobStatus>, JobStoreError> {
        let mut state = self.lock();
        state.reads += 1;
        Ok(state.records.get(key).cloned())
    }

    async fn set_status(&self, key: &str, status: &JobStatus) -> Result<(), JobStoreError> {
        let mut state = self.lock();
        if state.failing_writes > 0 {
            state.failing_writes -= 1;
            return Err(JobStoreError::Database(sqlx::Error::PoolTimedOut));
        }
        match state.records.get_mut(key) {
            Some(current) => *current = status.clone(),
            None => return Err(JobStoreError::MissingRecord(key.to_string())),
        }
        state.writes.push((key.to_string(), status.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_status_never_creates_records() {
        let store = MemoryJobStore::new();
        let err = store.set_status("k", &JobStatus::FileQueued).await.unwrap_err();
        assert!(matches!(err, JobStoreError::MissingRecord(_)));
        assert!(!store.has_record("k").await.unwrap());
        assert!(store.writes().is_empty());
    }

    #[tokio::test]
    async fn test_transition_recorded() {
        let store = MemoryJobStore::new();
        store.insert("k", JobStatus::FileAccepted);
        store.set_status("k", &JobStatus::FileQueued).await.unwrap();
        assert_eq!(store.get_status("k").await.unwrap(), Some(JobStatus::FileQueued));
        assert_eq!(store.writes(), vec![("k".to_string(), JobStatus::FileQueued)]);
    }

    #[tokio::test]
    async fn test_failing_writes_leave_record_untouched() {
        let store = MemoryJobStore::new();
        store.insert("k", JobStatus::FileAccepted);
        store.fail_next_writes(1);

        let err = store.set_status("k", &JobStatus::FileQueued).await.unwrap_err();
        assert!(matches!(err, JobStoreError::Database(_)));
        assert_eq!(store.status_of("k"), Some(JobStatus::FileAccepted));

        store.set_status("k", &JobStatus::FileQueued).await.unwrap();
        assert_eq!(store.status_of("k"), Some(JobStatus::FileQueued));
    }
}
