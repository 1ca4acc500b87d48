//! Ingestion Orchestrator: per-file download, publish, transition, cleanup.
//!
//! Each poll cycle gates the discovered candidates, dispatches the eligible
//! ones to a fixed pool of worker tasks, and waits for every dispatched file
//! to finish before sleeping. A file's failure never stops the loop.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use enqueuer_core::{CandidateFile, Config, JobStatus};
use enqueuer_jobs::JobStore;
use enqueuer_storage::ObjectStorage;

use crate::discovery::{DedupSet, Discovery};
use crate::eligibility::EligibilityGate;
use crate::outcome::{OutcomeStatus, PublishOutcome};
use crate::progress::ProgressStats;
use crate::publisher::FilePublisher;

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub in_progress_prefix: String,
    pub queued_prefix: String,
    pub download_dir: PathBuf,
    pub transition_on_error: bool,
    pub concurrency: usize,
    pub polling_interval: Duration,
    pub paused: bool,
}

impl OrchestratorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            in_progress_prefix: config.storage.in_progress_prefix.clone(),
            queued_prefix: config.storage.queued_prefix.clone(),
            download_dir: config.storage.download_dir.clone(),
            transition_on_error: config.worker.transition_on_error,
            concurrency: config.worker.concurrency.max(1),
            polling_interval: config.worker.polling_interval(),
            paused: config.worker.paused,
        }
    }
}

/// What happened to one dispatched file.
#[derive(Debug, Clone)]
pub enum FileReport {
    /// Download failed; the object stays in place for the next cycle.
    Abandoned { key: String, error: String },
    Processed {
        key: String,
        outcome: PublishOutcome,
        /// Status set to `file_queued` and object moved to the queued prefix.
        transitioned: bool,
    },
}

impl FileReport {
    pub fn key(&self) -> &str {
        match self {
            FileReport::Abandoned { key, .. } | FileReport::Processed { key, .. } => key,
        }
    }

    pub fn outcome(&self) -> Option<&PublishOutcome> {
        match self {
            FileReport::Processed { outcome, .. } => Some(outcome),
            FileReport::Abandoned { .. } => None,
        }
    }

    /// The file will be picked up again by a later cycle.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FileReport::Abandoned { .. } | FileReport::Processed { transitioned: false, .. }
        )
    }
}

pub struct Orchestrator {
    storage: Arc<ObjectStorage>,
    jobs: Arc<dyn JobStore>,
    publisher: Arc<FilePublisher>,
    gate: EligibilityGate,
    discovery: Discovery,
    settings: OrchestratorSettings,
    stats: Arc<ProgressStats>,
}

impl Orchestrator {
    pub fn new(
        storage: Arc<ObjectStorage>,
        jobs: Arc<dyn JobStore>,
        publisher: Arc<FilePublisher>,
        settings: OrchestratorSettings,
        dedup: Option<Arc<DedupSet>>,
    ) -> Self {
        let discovery = Discovery::new(storage.clone(), settings.in_progress_prefix.clone(), dedup);
        Self {
            gate: EligibilityGate::new(jobs.clone()),
            storage,
            jobs,
            publisher,
            discovery,
            settings,
            stats: Arc::new(ProgressStats::new()),
        }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub fn stats(&self) -> Arc<ProgressStats> {
        self.stats.clone()
    }

    // ── Loop ────────────────────────────────────────────────────────

    /// Poll, process, sleep, until `cancel` fires. Files already in a
    /// worker's hands are finished before returning.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let pool = WorkerPool::spawn(self.clone(), self.settings.concurrency);
        info!(
            prefix = %self.settings.in_progress_prefix,
            workers = self.settings.concurrency,
            interval_secs = self.settings.polling_interval.as_secs(),
            "orchestrator started"
        );

        while !cancel.is_cancelled() {
            self.run_cycle(&pool, &cancel).await;
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.settings.polling_interval) => {}
            }
        }

        pool.shutdown().await;
        info!("orchestrator stopped");
    }

    /// A single cycle with its own worker pool.
    pub async fn run_once(self: Arc<Self>) -> Vec<FileReport> {
        let pool = WorkerPool::spawn(self.clone(), self.settings.concurrency);
        let reports = self.run_cycle(&pool, &CancellationToken::new()).await;
        pool.shutdown().await;
        reports
    }

    async fn run_cycle(&self, pool: &WorkerPool, cancel: &CancellationToken) -> Vec<FileReport> {
        if self.settings.paused {
            info!("paused, skipping cycle");
            return Vec::new();
        }
        self.stats.record_cycle();

        let candidates = match self.discovery.poll().await {
            Ok(c) => c,
            Err(e) => {
                error!(prefix = %self.discovery.prefix(), error = %e, "listing failed");
                return Vec::new();
            }
        };
        if candidates.is_empty() {
            debug!("no new files this cycle");
            return Vec::new();
        }

        let mut pending = Vec::new();
        for candidate in candidates {
            if cancel.is_cancelled() {
                break;
            }
            if !self.gate.is_eligible(&candidate.key).await {
                continue;
            }
            if let Some(dedup) = self.discovery.dedup() {
                if !dedup.insert(candidate.clone()) {
                    continue;
                }
            }
            match pool.submit(candidate.clone()).await {
                Some(reply) => pending.push((candidate, reply)),
                None => {
                    self.release(&candidate);
                    warn!("worker pool closed, stopping dispatch");
                    break;
                }
            }
        }

        let mut reports = Vec::with_capacity(pending.len());
        for (candidate, reply) in pending {
            match reply.await {
                Ok(report) => {
                    match &report {
                        FileReport::Abandoned { .. } => self.stats.record_abandoned(),
                        FileReport::Processed { outcome, .. } => self.stats.record_outcome(outcome),
                    }
                    if report.is_retryable() {
                        self.release(&candidate);
                    }
                    reports.push(report);
                }
                Err(_) => {
                    error!(key = %candidate.key, "worker dropped file without a report");
                    self.stats.record_abandoned();
                    self.release(&candidate);
                }
            }
        }
        reports
    }

    fn release(&self, candidate: &CandidateFile) {
        if let Some(dedup) = self.discovery.dedup() {
            dedup.remove(candidate);
        }
    }

    // ── Per-file state machine ──────────────────────────────────────

    /// Download, publish, transition, clean up. Never fails: every error
    /// ends up in the returned report.
    pub async fn process_candidate(
        &self,
        candidate: &CandidateFile,
        worker_id: usize,
    ) -> FileReport {
        let local_path = self
            .settings
            .download_dir
            .join(format!("worker-{worker_id}"))
            .join(candidate.file_name());

        if let Err(e) = self.storage.get(&candidate.key, &local_path).await {
            error!(key = %candidate.key, error = %e, "download failed, retrying next cycle");
            return FileReport::Abandoned {
                key: candidate.key.clone(),
                error: e.to_string(),
            };
        }
        debug!(key = %candidate.key, path = %local_path.display(), "downloaded");

        let outcome = self.publisher.process_file(&local_path).await;

        let transitioned = if outcome.is_error() && !self.settings.transition_on_error {
            warn!(
                key = %candidate.key,
                error = outcome.error.as_deref().unwrap_or_default(),
                "publish failed, leaving file in place"
            );
            false
        } else {
            match self.transition(candidate).await {
                Ok(dst) => {
                    log_queued(&candidate.key, &dst, &outcome);
                    true
                }
                Err(TransitionFailure::Unchanged(reason)) => {
                    error!(
                        key = %candidate.key,
                        error = %reason,
                        "status update failed, retrying next cycle"
                    );
                    false
                }
                Err(TransitionFailure::Stranded { dst, reason }) => {
                    // Status already reads file_queued, so no later cycle picks it up.
                    error!(
                        key = %candidate.key,
                        to = %dst,
                        error = %reason,
                        "file marked queued but not moved, needs manual recovery"
                    );
                    false
                }
            }
        };

        remove_local(&local_path).await;

        FileReport::Processed {
            key: candidate.key.clone(),
            outcome,
            transitioned,
        }
    }

    /// Mark the job queued, then move the object out of the watched prefix.
    async fn transition(&self, candidate: &CandidateFile) -> Result<String, TransitionFailure> {
        let settings = &self.settings;
        let dst = candidate
            .relocated_key(&settings.in_progress_prefix, &settings.queued_prefix)
            .ok_or_else(|| {
                TransitionFailure::Unchanged(format!(
                    "{} is outside {}",
                    candidate.key, settings.in_progress_prefix
                ))
            })?;

        self.jobs
            .set_status(&candidate.key, &JobStatus::FileQueued)
            .await
            .map_err(|e| TransitionFailure::Unchanged(format!("status update: {e}")))?;
        self.storage
            .move_object(&candidate.key, &dst)
            .await
            .map_err(|e| TransitionFailure::Stranded {
                dst: dst.clone(),
                reason: e.to_string(),
            })?;
        Ok(dst)
    }
}

/// Where a failed transition left the file.
#[derive(Debug)]
enum TransitionFailure {
    /// Nothing changed; the file is still `file_accepted` in the watched prefix.
    Unchanged(String),
    /// Status was set but the object is still in the watched prefix.
    Stranded { dst: String, reason: String },
}

fn log_queued(key: &str, dst: &str, outcome: &PublishOutcome) {
    let rows = outcome.rows_published;
    let total = outcome.total_rows;
    match outcome.status {
        OutcomeStatus::Success => info!(key, to = dst, rows, total, "file queued"),
        OutcomeStatus::Warning => warn!(
            key,
            to = dst,
            message = outcome.message.as_deref().unwrap_or_default(),
            "file queued with warning"
        ),
        OutcomeStatus::Error => error!(
            key,
            to = dst,
            rows,
            total,
            error = outcome.error.as_deref().unwrap_or_default(),
            "file queued after failed publish"
        ),
    }
}

async fn remove_local(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!(path = %path.display(), error = %e, "failed to delete local copy");
    }
}

// ── Worker pool ─────────────────────────────────────────────────────

struct WorkItem {
    candidate: CandidateFile,
    reply: oneshot::Sender<FileReport>,
}

/// Fixed set of tasks pulling files off one bounded channel.
struct WorkerPool {
    tx: mpsc::Sender<WorkItem>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    fn spawn(orchestrator: Arc<Orchestrator>, workers: usize) -> Self {
        let workers = workers.max(1);
        let (tx, rx) = mpsc::channel::<WorkItem>(workers);
        let rx = Arc::new(Mutex::new(rx));

        let handles = (0..workers)
            .map(|worker_id| {
                let orchestrator = orchestrator.clone();
                let rx = rx.clone();
                tokio::spawn(async move {
                    loop {
                        let next = rx.lock().await.recv().await;
                        let Some(item) = next else { break };
                        let report = orchestrator
                            .process_candidate(&item.candidate, worker_id)
                            .await;
                        // The cycle may have stopped waiting; nothing to do then.
                        let _ = item.reply.send(report);
                    }
                    debug!(worker = worker_id, "worker exiting");
                })
            })
            .collect();

        Self { tx, handles }
    }

    /// `None` once every worker has exited.
    async fn submit(&self, candidate: CandidateFile) -> Option<oneshot::Receiver<FileReport>> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(WorkItem { candidate, reply }).await.ok()?;
        Some(rx)
    }

    async fn shutdown(self) {
        drop(self.tx);
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "worker task failed");
            }
        }
    }
}
