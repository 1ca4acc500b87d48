//! Cumulative pipeline counters and the periodic progress report.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::outcome::{OutcomeStatus, PublishOutcome};

#[derive(Debug, Default)]
pub struct ProgressStats {
    cycles: AtomicU64,
    files_succeeded: AtomicU64,
    files_warned: AtomicU64,
    files_failed: AtomicU64,
    files_abandoned: AtomicU64,
    rows_published: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    pub cycles: u64,
    pub files_succeeded: u64,
    pub files_warned: u64,
    pub files_failed: u64,
    pub files_abandoned: u64,
    pub rows_published: u64,
}

impl ProgressStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_cycle(&self) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_outcome(&self, outcome: &PublishOutcome) {
        let counter = match outcome.status {
            OutcomeStatus::Success => &self.files_succeeded,
            OutcomeStatus::Warning => &self.files_warned,
            OutcomeStatus::Error => &self.files_failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.rows_published
            .fetch_add(outcome.rows_published as u64, Ordering::Relaxed);
    }

    /// Download or transition failed; the file will be retried.
    pub fn record_abandoned(&self) {
        self.files_abandoned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            files_succeeded: self.files_succeeded.load(Ordering::Relaxed),
            files_warned: self.files_warned.load(Ordering::Relaxed),
            files_failed: self.files_failed.load(Ordering::Relaxed),
            files_abandoned: self.files_abandoned.load(Ordering::Relaxed),
            rows_published: self.rows_published.load(Ordering::Relaxed),
        }
    }
}

/// Logs a [`ProgressSnapshot`] every interval until cancelled.
pub struct ProgressReporter {
    stats: Arc<ProgressStats>,
    interval: Duration,
}

impl ProgressReporter {
    pub fn new(stats: Arc<ProgressStats>, interval: Duration) -> Self {
        Self { stats, interval }
    }

    pub async fn run(self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {
                    let s = self.stats.snapshot();
                    info!(
                        cycles = s.cycles,
                        succeeded = s.files_succeeded,
                        warned = s.files_warned,
                        failed = s.files_failed,
                        abandoned = s.files_abandoned,
                        rows = s.rows_published,
                        "file progress"
                    );
                }
            }
        }
    }
}
