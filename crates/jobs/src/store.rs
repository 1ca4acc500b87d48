use async_trait::async_trait;

use enqueuer_core::JobStatus;

use crate::error::JobStoreError;

/// Read/write access to job records.
///
/// Implementations never create or delete records; `set_status` on a key
/// without a record is [`JobStoreError::MissingRecord`].
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn has_record(&self, key: &str) -> Result<bool, JobStoreError>;

    /// `None` when no record exists.
    async fn get_status(&self, key: &str) -> Result<Option<JobStatus>, JobStoreError>;

    async fn set_status(&self, key: &str, status: &JobStatus) -> Result<(), JobStoreError>;
}
