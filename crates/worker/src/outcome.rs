//! Structured result of attempting to publish one file.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Success,
    /// Nothing to publish (no data rows). No queue was declared.
    Warning,
    Error,
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OutcomeStatus::Success => "success",
            OutcomeStatus::Warning => "warning",
            OutcomeStatus::Error => "error",
        })
    }
}

/// Pure data: callers branch on [`status`](Self::status), never on an `Err`.
#[derive(Debug, Clone, Serialize)]
pub struct PublishOutcome {
    pub status: OutcomeStatus,
    pub filename: String,
    pub filepath: PathBuf,
    /// Derived queue name; only created on the broker when `queue_declared`.
    pub queue_name: String,
    pub queue_declared: bool,
    pub total_rows: usize,
    pub rows_published: usize,
    pub rows_missing_required: usize,
    pub columns: Vec<String>,
    pub processing_time_seconds: f64,
    pub processed_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PublishOutcome {
    pub(crate) fn started(filename: &str, filepath: PathBuf, queue_name: String) -> Self {
        Self {
            status: OutcomeStatus::Error,
            filename: filename.to_string(),
            filepath,
            queue_name,
            queue_declared: false,
            total_rows: 0,
            rows_published: 0,
            rows_missing_required: 0,
            columns: Vec::new(),
            processing_time_seconds: 0.0,
            processed_at: Utc::now(),
            message: None,
            error: None,
        }
    }

    pub fn rows_processed(&self) -> usize {
        self.rows_published
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }

    pub fn is_error(&self) -> bool {
        self.status == OutcomeStatus::Error
    }
}

/// Round to two decimals, as reported in logs.
pub(crate) fn round_secs(secs: f64) -> f64 {
    (secs * 100.0).round() / 100.0
}
