//! File Publisher: fans one local CSV file out into a durable per-file queue.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, warn};

use enqueuer_core::config::MessageIdScheme;
use enqueuer_ingest::RowIngestor;
use enqueuer_queue::{BrokerConnector, QueueAgent, RetryPolicy};

use crate::message::{queue_name_for, Envelope, MessageIdStrategy};
use crate::outcome::{round_secs, OutcomeStatus, PublishOutcome};

/// Rows between progress log lines for large files.
const PROGRESS_EVERY: usize = 1000;

pub struct FilePublisher {
    connector: Arc<dyn BrokerConnector>,
    retry: RetryPolicy,
    ingestor: RowIngestor,
    queue_prefix: String,
    id_scheme: MessageIdScheme,
}

impl FilePublisher {
    pub fn new(
        connector: Arc<dyn BrokerConnector>,
        retry: RetryPolicy,
        ingestor: RowIngestor,
        queue_prefix: impl Into<String>,
        id_scheme: MessageIdScheme,
    ) -> Self {
        Self {
            connector,
            retry,
            ingestor,
            queue_prefix: queue_prefix.into(),
            id_scheme,
        }
    }

    pub fn queue_name(&self, filename: &str) -> String {
        queue_name_for(&self.queue_prefix, filename)
    }

    /// Publish every row of `filepath`, in order, as its own message.
    ///
    /// The broker is only contacted when there is at least one row. A failure
    /// part-way leaves already-published rows in place; `rows_published`
    /// reports how many made it.
    pub async fn process_file(&self, filepath: &Path) -> PublishOutcome {
        let started = Instant::now();
        let filename = filepath
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| filepath.to_string_lossy().into_owned());
        let queue_name = self.queue_name(&filename);
        let mut outcome =
            PublishOutcome::started(&filename, filepath.to_path_buf(), queue_name.clone());

        let file = match self.ingestor.ingest(filepath).await {
            Ok(file) => file,
            Err(e) => {
                error!(filename = %filename, error = %e, "failed to read rows");
                outcome.error = Some(format!("Error processing {filename}: {e}"));
                return finish(outcome, started);
            }
        };

        if file.is_empty() {
            warn!(filename = %filename, "no data rows found");
            outcome.status = OutcomeStatus::Warning;
            outcome.columns = file.columns;
            outcome.message = Some("No data rows found".into());
            return finish(outcome, started);
        }

        let total_rows = file.rows.len();
        outcome.total_rows = total_rows;
        outcome.columns = file.columns.clone();
        outcome.rows_missing_required = file.missing_required;

        let mut agent = QueueAgent::new(self.connector.clone(), self.retry);
        if let Err(e) = agent.connect().await {
            outcome.error = Some(format!("Could not connect to broker: {e}"));
            return finish(outcome, started);
        }

        if let Err(e) = agent.declare_queue(&queue_name).await {
            error!(queue = %queue_name, error = %e, "queue declare failed");
            outcome.error = Some(e.to_string());
            agent.disconnect().await;
            return finish(outcome, started);
        }
        outcome.queue_declared = true;
        debug!(queue = %queue_name, "created queue");

        let filepath_str = filepath.to_string_lossy();
        let envelope = Envelope {
            filename: &filename,
            filepath: &filepath_str,
            queue_name: &queue_name,
            total_rows: total_rows as u64,
        };
        let ids = MessageIdStrategy::new(self.id_scheme, &filename, &file.digest);

        for (idx, row) in file.rows.iter().enumerate() {
            let row_number = idx as u64 + 1;
            let message_id = ids.message_id(row_number);
            let body = envelope.body(&message_id, row_number, row);
            let payload = match serde_json::to_vec(&body) {
                Ok(p) => p,
                Err(e) => {
                    outcome.error = Some(format!("failed to encode row {row_number}: {e}"));
                    break;
                }
            };

            if let Err(e) = agent
                .publish(&queue_name, &payload, &message_id, &envelope.headers(row_number))
                .await
            {
                error!(
                    filename = %filename,
                    row = row_number,
                    published = outcome.rows_published,
                    error = %e,
                    "publish failed mid-file"
                );
                outcome.error = Some(e.to_string());
                break;
            }

            outcome.rows_published += 1;
            if outcome.rows_published % PROGRESS_EVERY == 0 {
                debug!(
                    filename = %filename,
                    published = outcome.rows_published,
                    total = total_rows,
                    "publish progress"
                );
            }
        }

        agent.disconnect().await;

        if outcome.error.is_none() {
            outcome.status = OutcomeStatus::Success;
            debug!(
                filename = %filename,
                rows = outcome.rows_published,
                queue = %queue_name,
                "published file"
            );
        }
        finish(outcome, started)
    }
}

fn finish(mut outcome: PublishOutcome, started: Instant) -> PublishOutcome {
    outcome.processing_time_seconds = round_secs(started.elapsed().as_secs_f64());
    outcome.processed_at = chrono::Utc::now();
    outcome
}
