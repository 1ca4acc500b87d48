//! End-to-end cycles over in-memory storage, job store and broker.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use enqueuer_core::config::MessageIdScheme;
use enqueuer_core::{Config, JobStatus};
use enqueuer_ingest::RowIngestor;
use enqueuer_jobs::MemoryJobStore;
use enqueuer_queue::{MemoryBroker, RetryPolicy};
use enqueuer_storage::{ObjectStorage, StorageBackend};
use enqueuer_worker::{
    DedupSet, FilePublisher, FileReport, Orchestrator, OrchestratorSettings, OutcomeStatus,
    PublishOutcome, Service,
};

const IN_PROGRESS: &str = "validation/in-progress/";
const QUEUED: &str = "validation/queued/";

struct Harness {
    storage: Arc<ObjectStorage>,
    jobs: MemoryJobStore,
    broker: MemoryBroker,
    download_dir: PathBuf,
}

impl Harness {
    fn new() -> Self {
        Self {
            storage: Arc::new(ObjectStorage::new(StorageBackend::in_memory())),
            jobs: MemoryJobStore::new(),
            broker: MemoryBroker::new(),
            download_dir: std::env::temp_dir()
                .join(format!("enqueuer-it-{}", uuid::Uuid::new_v4())),
        }
    }

    async fn upload(&self, name: &str, body: &str, status: Option<JobStatus>) -> String {
        let key = format!("{IN_PROGRESS}{name}");
        self.storage.put(&key, body.to_string()).await.unwrap();
        if let Some(status) = status {
            self.jobs.insert(key.clone(), status);
        }
        key
    }

    fn orchestrator(&self, transition_on_error: bool) -> Arc<Orchestrator> {
        self.orchestrator_with(transition_on_error, Arc::new(DedupSet::new()))
    }

    fn orchestrator_with(
        &self,
        transition_on_error: bool,
        dedup: Arc<DedupSet>,
    ) -> Arc<Orchestrator> {
        let publisher = FilePublisher::new(
            Arc::new(self.broker.clone()),
            RetryPolicy::immediate(5),
            RowIngestor::new("Email"),
            "batch_validation",
            MessageIdScheme::Stable,
        );
        let settings = OrchestratorSettings {
            in_progress_prefix: IN_PROGRESS.into(),
            queued_prefix: QUEUED.into(),
            download_dir: self.download_dir.clone(),
            transition_on_error,
            concurrency: 3,
            polling_interval: Duration::from_millis(20),
            paused: false,
        };
        Arc::new(Orchestrator::new(
            self.storage.clone(),
            Arc::new(self.jobs.clone()),
            Arc::new(publisher),
            settings,
            Some(dedup),
        ))
    }

    fn local_files(&self) -> usize {
        walk_count(&self.download_dir)
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.download_dir);
    }
}

fn walk_count(dir: &std::path::Path) -> usize {
    let Ok(entries) = std::fs::read_dir(dir) else { return 0 };
    entries
        .flatten()
        .map(|e| {
            let path = e.path();
            if path.is_dir() { walk_count(&path) } else { 1 }
        })
        .sum()
}

fn outcome_for<'a>(reports: &'a [FileReport], key: &str) -> &'a PublishOutcome {
    reports
        .iter()
        .find(|r| r.key() == key)
        .and_then(|r| r.outcome())
        .unwrap_or_else(|| panic!("no outcome for {key}"))
}

#[tokio::test]
async fn test_accepted_file_is_published_and_queued() {
    let h = Harness::new();
    let key = h
        .upload(
            "batch1.csv",
            "Email,Name\na@x.com,Ann\nb@x.com,Bob\n",
            Some(JobStatus::FileAccepted),
        )
        .await;

    let reports = h.orchestrator(true).run_once().await;
    assert_eq!(reports.len(), 1);
    let outcome = outcome_for(&reports, &key);
    assert_eq!(outcome.status, OutcomeStatus::Success);
    assert_eq!(outcome.queue_name, "batch_validation_batch1_csv");
    assert_eq!(outcome.rows_published, 2);

    let messages = h.broker.messages("batch_validation_batch1_csv");
    let rows: Vec<u64> = messages.iter().map(|m| m.headers.row_number).collect();
    assert_eq!(rows, vec![1, 2]);
    assert!(messages.iter().all(|m| m.persistent && m.headers.total_rows == 2));
    let body: serde_json::Value = serde_json::from_str(messages[1].payload_str()).unwrap();
    assert_eq!(body["Email"], "b@x.com");
    assert_eq!(body["queueName"], "batch_validation_batch1_csv");

    assert_eq!(h.jobs.status_of(&key), Some(JobStatus::FileQueued));
    assert!(!h.storage.exists(&key).await.unwrap());
    assert!(h.storage.exists("validation/queued/batch1.csv").await.unwrap());
    assert_eq!(h.local_files(), 0);
}

#[tokio::test]
async fn test_header_only_file_is_transitioned_without_queue() {
    let h = Harness::new();
    let key = h.upload("empty.csv", "Email,Name\n", Some(JobStatus::FileAccepted)).await;

    let reports = h.orchestrator(true).run_once().await;
    let outcome = outcome_for(&reports, &key);
    assert_eq!(outcome.status, OutcomeStatus::Warning);
    assert_eq!(outcome.rows_processed(), 0);

    assert!(h.broker.queue_names().is_empty());
    assert_eq!(h.broker.connect_attempts(), 0);
    assert_eq!(h.jobs.status_of(&key), Some(JobStatus::FileQueued));
    assert!(h.storage.exists("validation/queued/empty.csv").await.unwrap());
}

#[tokio::test]
async fn test_ineligible_files_are_left_alone() {
    let h = Harness::new();
    let orphan = h.upload("orphan.csv", "Email\na@x.com\n", None).await;
    let done = h
        .upload("done.csv", "Email\na@x.com\n", Some(JobStatus::FileQueued))
        .await;

    let reports = h.orchestrator(true).run_once().await;
    assert!(reports.is_empty());

    assert_eq!(h.broker.connect_attempts(), 0);
    assert_eq!(h.broker.total_messages(), 0);
    assert!(h.jobs.writes().is_empty());
    assert!(h.storage.exists(&orphan).await.unwrap());
    assert!(h.storage.exists(&done).await.unwrap());
    assert_eq!(h.local_files(), 0);
}

#[tokio::test]
async fn test_failed_publish_is_still_transitioned_by_default() {
    let h = Harness::new();
    h.broker.set_unreachable(true);
    let key = h.upload("batch2.csv", "Email\na@x.com\n", Some(JobStatus::FileAccepted)).await;

    let reports = h.orchestrator(true).run_once().await;
    let outcome = outcome_for(&reports, &key);
    assert_eq!(outcome.status, OutcomeStatus::Error);
    assert!(outcome.error.as_deref().unwrap().contains("Could not connect to broker"));

    assert_eq!(h.broker.connect_attempts(), 5);
    assert_eq!(h.jobs.status_of(&key), Some(JobStatus::FileQueued));
    assert!(h.storage.exists("validation/queued/batch2.csv").await.unwrap());
    assert_eq!(h.local_files(), 0);
}

#[tokio::test]
async fn test_failed_publish_stays_for_retry_when_configured() {
    let h = Harness::new();
    h.broker.set_unreachable(true);
    let key = h.upload("batch3.csv", "Email\na@x.com\n", Some(JobStatus::FileAccepted)).await;
    let orchestrator = h.orchestrator(false);

    let first = orchestrator.clone().run_once().await;
    assert!(matches!(first[0], FileReport::Processed { transitioned: false, .. }));
    assert_eq!(h.jobs.status_of(&key), Some(JobStatus::FileAccepted));
    assert!(h.storage.exists(&key).await.unwrap());

    // The dedup entry was released, so the next cycle tries again.
    h.broker.set_unreachable(false);
    let second = orchestrator.clone().run_once().await;
    assert_eq!(outcome_for(&second, &key).status, OutcomeStatus::Success);
    assert_eq!(h.jobs.status_of(&key), Some(JobStatus::FileQueued));
    assert_eq!(h.broker.messages("batch_validation_batch3_csv").len(), 1);

    let stats = orchestrator.stats().snapshot();
    assert_eq!(stats.cycles, 2);
    assert_eq!(stats.files_failed, 1);
    assert_eq!(stats.files_succeeded, 1);
}

#[tokio::test]
async fn test_ragged_file_is_published_and_queued() {
    let h = Harness::new();
    let key = h
        .upload(
            "ragged.csv",
            "Email,Name\na@x.com,Ann\nb@x.com\nc@x.com,Cy\n",
            Some(JobStatus::FileAccepted),
        )
        .await;

    let reports = h.orchestrator(true).run_once().await;
    let outcome = outcome_for(&reports, &key);
    assert_eq!(outcome.status, OutcomeStatus::Success);
    assert_eq!(outcome.rows_published, 3);
    assert_eq!(h.broker.messages("batch_validation_ragged_csv").len(), 3);
    assert_eq!(h.jobs.status_of(&key), Some(JobStatus::FileQueued));
}

#[tokio::test]
async fn test_undecodable_file_is_error_with_no_messages() {
    let h = Harness::new();
    let key = format!("{IN_PROGRESS}binary.csv");
    h.storage.put(&key, b"Email\n\xff\xfe\n".to_vec()).await.unwrap();
    h.jobs.insert(key.clone(), JobStatus::FileAccepted);

    let reports = h.orchestrator(true).run_once().await;
    assert_eq!(outcome_for(&reports, &key).status, OutcomeStatus::Error);
    assert_eq!(h.broker.total_messages(), 0);
    assert!(h.broker.queue_names().is_empty());
}

#[tokio::test]
async fn test_status_write_failure_releases_file_for_next_cycle() {
    let h = Harness::new();
    let key = h.upload("batch4.csv", "Email\na@x.com\n", Some(JobStatus::FileAccepted)).await;
    h.jobs.fail_next_writes(1);
    let dedup = Arc::new(DedupSet::new());
    let orchestrator = h.orchestrator_with(true, dedup.clone());

    let first = orchestrator.clone().run_once().await;
    assert!(first[0].is_retryable());
    assert!(matches!(first[0], FileReport::Processed { transitioned: false, .. }));
    assert!(dedup.is_empty());
    assert_eq!(h.jobs.status_of(&key), Some(JobStatus::FileAccepted));
    assert!(h.storage.exists(&key).await.unwrap());

    let second = orchestrator.run_once().await;
    assert!(!second[0].is_retryable());
    assert_eq!(dedup.len(), 1);
    assert_eq!(h.jobs.status_of(&key), Some(JobStatus::FileQueued));
    assert!(h.storage.exists("validation/queued/batch4.csv").await.unwrap());
    // Same content, so the retry republished under the same message IDs.
    let ids: Vec<String> = h
        .broker
        .messages("batch_validation_batch4_csv")
        .into_iter()
        .map(|m| m.message_id)
        .collect();
    assert_eq!(ids.len(), 2);
    assert_eq!(ids[0], ids[1]);
}

#[tokio::test]
async fn test_download_failure_releases_file_for_next_cycle() {
    let h = Harness::new();
    let key = h.upload("batch5.csv", "Email\na@x.com\n", Some(JobStatus::FileAccepted)).await;
    // A plain file where the download directory should be makes every download fail.
    std::fs::write(&h.download_dir, b"blocker").unwrap();
    let dedup = Arc::new(DedupSet::new());
    let orchestrator = h.orchestrator_with(true, dedup.clone());

    let first = orchestrator.clone().run_once().await;
    assert!(matches!(first[0], FileReport::Abandoned { .. }));
    assert!(dedup.is_empty());
    assert_eq!(h.broker.connect_attempts(), 0);
    assert!(h.jobs.writes().is_empty());
    assert!(h.storage.exists(&key).await.unwrap());

    std::fs::remove_file(&h.download_dir).unwrap();
    let second = orchestrator.clone().run_once().await;
    assert_eq!(outcome_for(&second, &key).status, OutcomeStatus::Success);
    assert_eq!(h.jobs.status_of(&key), Some(JobStatus::FileQueued));
    assert_eq!(orchestrator.stats().snapshot().files_abandoned, 1);
}

#[tokio::test]
async fn test_many_files_processed_concurrently() {
    let h = Harness::new();
    for i in 0..6 {
        h.upload(&format!("f{i}.csv"), "Email\na@x.com\nb@x.com\n", Some(JobStatus::FileAccepted))
            .await;
    }

    let reports = h.orchestrator(true).run_once().await;
    assert_eq!(reports.len(), 6);
    assert!(reports.iter().all(|r| !r.is_retryable()));
    assert_eq!(h.broker.queue_names().len(), 6);
    assert_eq!(h.broker.total_messages(), 12);
    assert!(h.storage.list(IN_PROGRESS).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_service_runs_until_cancelled() {
    let h = Harness::new();
    let key = h
        .upload("batch1.csv", "Email\na@x.com\n", Some(JobStatus::FileAccepted))
        .await;

    let monitor = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&monitor)
        .await;

    let mut config = Config::for_profile("ENQUEUER_PIPELINE_IT");
    config.storage.in_progress_prefix = IN_PROGRESS.into();
    config.storage.queued_prefix = QUEUED.into();
    config.storage.download_dir = h.download_dir.clone();
    config.broker.queue_prefix = "batch_validation".into();
    config.broker.connect_attempts = 1;
    config.broker.connect_delay_secs = 0;
    config.worker.polling_interval_secs = 1;
    config.worker.paused = false;
    config.worker.concurrency = 2;
    config.worker.uptime_monitor = Some(monitor.uri());
    config.worker.progress_report = true;

    let service = Service::build(
        &config,
        h.storage.clone(),
        Arc::new(h.jobs.clone()),
        Arc::new(h.broker.clone()),
    );
    let cancel = CancellationToken::new();
    let running = tokio::spawn(service.run(cancel.clone()));

    tokio::time::timeout(Duration::from_secs(5), async {
        while h.jobs.status_of(&key) != Some(JobStatus::FileQueued) {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("file was never queued");

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("service did not stop")
        .unwrap();

    assert_eq!(h.broker.total_messages(), 1);
    assert!(!monitor.received_requests().await.unwrap().is_empty());
}
