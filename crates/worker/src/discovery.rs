//! Discovery Loop: find candidate files under the watched prefix.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::info;

use enqueuer_core::CandidateFile;
use enqueuer_storage::{ObjectStorage, StorageError};

/// Listing entries already handed to a worker by this process.
///
/// Lives for the process lifetime. Durable "already queued" state is the job
/// status; this set only prevents redundant work before that catches up.
#[derive(Debug, Default)]
pub struct DedupSet {
    seen: Mutex<HashSet<CandidateFile>>,
}

impl DedupSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<CandidateFile>> {
        self.seen.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn contains(&self, candidate: &CandidateFile) -> bool {
        self.lock().contains(candidate)
    }

    /// Returns `false` if the entry was already present.
    pub fn insert(&self, candidate: CandidateFile) -> bool {
        self.lock().insert(candidate)
    }

    pub fn remove(&self, candidate: &CandidateFile) -> bool {
        self.lock().remove(candidate)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

pub struct Discovery {
    storage: Arc<ObjectStorage>,
    prefix: String,
    dedup: Option<Arc<DedupSet>>,
}

impl Discovery {
    /// `dedup = None` relies solely on eligibility plus relocation.
    pub fn new(
        storage: Arc<ObjectStorage>,
        prefix: impl Into<String>,
        dedup: Option<Arc<DedupSet>>,
    ) -> Self {
        Self {
            storage,
            prefix: prefix.into(),
            dedup,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn dedup(&self) -> Option<&Arc<DedupSet>> {
        self.dedup.as_ref()
    }

    /// The prefix's own directory marker, or any other "folder" entry.
    fn is_pseudo_entry(&self, candidate: &CandidateFile) -> bool {
        candidate.key == self.prefix
            || candidate.key == self.prefix.trim_end_matches('/')
            || candidate.key.ends_with('/')
    }

    /// One poll: list the prefix, drop pseudo-entries and entries already
    /// dispatched. Does not mutate the dedup set.
    pub async fn poll(&self) -> Result<Vec<CandidateFile>, StorageError> {
        let listed = self.storage.list(&self.prefix).await?;
        let fresh: Vec<CandidateFile> = listed
            .into_iter()
            .filter(|c| !self.is_pseudo_entry(c))
            .filter(|c| self.dedup.as_ref().map_or(true, |d| !d.contains(c)))
            .collect();

        let keys: Vec<&str> = fresh.iter().map(|c| c.key.as_str()).collect();
        info!(count = fresh.len(), files = %keys.join(", "), "new files found");
        Ok(fresh)
    }
}
