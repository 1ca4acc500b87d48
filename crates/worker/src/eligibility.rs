//! Eligibility Gate: a file may only proceed once upstream intake accepted it.

use std::sync::Arc;

use tracing::{debug, warn};

use enqueuer_core::JobStatus;
use enqueuer_jobs::{JobStore, JobStoreError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Eligibility {
    Eligible,
    NoRecord,
    NotAccepted(JobStatus),
}

/// Read-only view over the job store.
#[derive(Clone)]
pub struct EligibilityGate {
    jobs: Arc<dyn JobStore>,
}

impl EligibilityGate {
    pub fn new(jobs: Arc<dyn JobStore>) -> Self {
        Self { jobs }
    }

    pub async fn check(&self, key: &str) -> Result<Eligibility, JobStoreError> {
        if !self.jobs.has_record(key).await? {
            return Ok(Eligibility::NoRecord);
        }
        match self.jobs.get_status(key).await? {
            Some(JobStatus::FileAccepted) => Ok(Eligibility::Eligible),
            Some(other) => Ok(Eligibility::NotAccepted(other)),
            // Record vanished between the two reads.
            None => Ok(Eligibility::NoRecord),
        }
    }

    /// `true` only for a record whose status is exactly `file_accepted`.
    /// Store failures count as not eligible for this cycle.
    pub async fn is_eligible(&self, key: &str) -> bool {
        match self.check(key).await {
            Ok(Eligibility::Eligible) => true,
            Ok(Eligibility::NoRecord) => {
                debug!(key, "no job record, skipping");
                false
            }
            Ok(Eligibility::NotAccepted(status)) => {
                debug!(key, status = %status, "job record is not file_accepted, skipping");
                false
            }
            Err(e) => {
                warn!(key, error = %e, "job store lookup failed, skipping this cycle");
                false
            }
        }
    }
}
