//! Wires the long-lived loops together and runs them until shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use enqueuer_core::Config;
use enqueuer_ingest::RowIngestor;
use enqueuer_jobs::JobStore;
use enqueuer_queue::{BrokerConnector, RetryPolicy};
use enqueuer_storage::ObjectStorage;

use crate::discovery::DedupSet;
use crate::heartbeat::Heartbeat;
use crate::orchestrator::{Orchestrator, OrchestratorSettings};
use crate::progress::ProgressReporter;
use crate::publisher::FilePublisher;

/// The orchestrator loop plus the optional heartbeat and progress loops.
/// The side loops share nothing with the orchestrator but the counters.
pub struct Service {
    orchestrator: Arc<Orchestrator>,
    heartbeat: Option<Heartbeat>,
    reporter: Option<ProgressReporter>,
}

impl Service {
    pub fn build(
        config: &Config,
        storage: Arc<ObjectStorage>,
        jobs: Arc<dyn JobStore>,
        connector: Arc<dyn BrokerConnector>,
    ) -> Self {
        let publisher = FilePublisher::new(
            connector,
            RetryPolicy::from_config(&config.broker),
            RowIngestor::new(config.worker.required_field.clone()),
            config.broker.queue_prefix.clone(),
            config.worker.message_id_scheme,
        );
        let dedup = config.worker.dedup_enabled.then(|| Arc::new(DedupSet::new()));
        let orchestrator = Arc::new(Orchestrator::new(
            storage,
            jobs,
            Arc::new(publisher),
            OrchestratorSettings::from_config(config),
            dedup,
        ));

        let interval = config.worker.polling_interval();
        let heartbeat = config.worker.uptime_monitor.as_ref().map(|url| {
            Heartbeat::new(
                url.clone(),
                interval,
                Duration::from_secs(config.worker.heartbeat_timeout_secs),
            )
        });
        let reporter = config
            .worker
            .progress_report
            .then(|| ProgressReporter::new(orchestrator.stats(), interval));

        Self {
            orchestrator,
            heartbeat,
            reporter,
        }
    }

    pub fn orchestrator(&self) -> Arc<Orchestrator> {
        self.orchestrator.clone()
    }

    /// Run every loop until `cancel` fires, then wait for all of them.
    pub async fn run(self, cancel: CancellationToken) {
        let mut side_loops = Vec::new();
        match self.heartbeat {
            Some(heartbeat) => side_loops.push(tokio::spawn(heartbeat.run(cancel.clone()))),
            None => info!("no uptime monitor configured, heartbeat disabled"),
        }
        if let Some(reporter) = self.reporter {
            side_loops.push(tokio::spawn(reporter.run(cancel.clone())));
        }

        let orchestrator = tokio::spawn(self.orchestrator.run(cancel.clone()));
        if let Err(e) = orchestrator.await {
            error!(error = %e, "orchestrator task failed");
        }

        // The orchestrator only returns once cancelled; make sure the rest follow.
        cancel.cancel();
        for handle in side_loops {
            if let Err(e) = handle.await {
                warn!(error = %e, "background loop failed");
            }
        }
    }
}

/// Wait for SIGINT or SIGTERM (Unix) or Ctrl+C elsewhere.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to register SIGTERM handler, ctrl-c only");
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!(error = %e, "failed to listen for ctrl-c");
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
        }
    }
}
