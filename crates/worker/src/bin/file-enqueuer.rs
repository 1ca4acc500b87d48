//! file-enqueuer: watch the in-progress prefix and fan accepted files out
//! into per-file broker queues.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use enqueuer_core::config::{load_dotenv, BrokerProvider};
use enqueuer_core::Config;
use enqueuer_jobs::PgJobStore;
use enqueuer_queue::{AmqpConnector, BrokerConnector, MemoryBroker, SqsConnector};
use enqueuer_storage::ObjectStorage;
use enqueuer_worker::service::{shutdown_signal, Service};
use enqueuer_worker::FileReport;

// ── CLI ─────────────────────────────────────────────────────────────

/// Publish one durable message per CSV row for every accepted file.
#[derive(Parser, Debug)]
#[command(name = "file-enqueuer", version, about)]
struct Cli {
    /// Run a single poll cycle and exit.
    #[arg(long)]
    once: bool,

    /// Worker count; takes precedence over the configured WORKER_CONCURRENCY.
    #[arg(long)]
    concurrency: Option<usize>,

    /// Poll interval in seconds; takes precedence over the configured POLLING_INTERVAL.
    #[arg(long)]
    polling_interval: Option<u64>,
}

fn connector_for(config: &Config) -> Arc<dyn BrokerConnector> {
    match config.broker.provider {
        BrokerProvider::Amqp => Arc::new(AmqpConnector::new(&config.broker)),
        BrokerProvider::Sqs => Arc::new(SqsConnector::new(&config.aws)),
        BrokerProvider::Memory => {
            tracing::warn!("in-memory broker: messages are discarded on exit");
            Arc::new(MemoryBroker::new())
        }
    }
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = Config::from_env();
    if let Some(n) = cli.concurrency {
        config.worker.concurrency = n;
    }
    if let Some(secs) = cli.polling_interval {
        config.worker.polling_interval_secs = secs;
    }
    config.validate()?;
    config.log_summary();

    let storage = Arc::new(ObjectStorage::from_config(&config).context("object storage")?);
    info!(backend = %storage.backend().describe(), "storage ready");

    let jobs = Arc::new(
        PgJobStore::connect(&config.postgres)
            .await
            .context("job status store")?,
    );
    info!(target = %config.postgres.redacted_target(), "job store connected");

    let service = Service::build(&config, storage, jobs, connector_for(&config));

    if cli.once {
        let reports = service.orchestrator().run_once().await;
        let abandoned = reports
            .iter()
            .filter(|r| matches!(r, FileReport::Abandoned { .. }))
            .count();
        info!(files = reports.len(), abandoned, "single cycle finished");
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        trigger.cancel();
    });

    info!("file-enqueuer starting");
    service.run(cancel).await;
    info!("file-enqueuer exited cleanly");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_when_given() {
        let cli = Cli::parse_from([
            "file-enqueuer",
            "--once",
            "--concurrency",
            "4",
            "--polling-interval",
            "30",
        ]);
        assert!(cli.once);
        assert_eq!(cli.concurrency, Some(4));
        assert_eq!(cli.polling_interval, Some(30));
    }

    #[test]
    fn test_environment_is_left_to_config_loading() {
        // Not a valid u64; the config layer falls back to its default instead.
        std::env::set_var("POLLING_INTERVAL", "10s");
        std::env::set_var("WORKER_CONCURRENCY", "8");
        let parsed = Cli::try_parse_from(["file-enqueuer"]);
        std::env::remove_var("POLLING_INTERVAL");
        std::env::remove_var("WORKER_CONCURRENCY");

        let cli = parsed.expect("env must not reach clap");
        assert!(!cli.once);
        assert_eq!(cli.concurrency, None);
        assert_eq!(cli.polling_interval, None);
    }
}
