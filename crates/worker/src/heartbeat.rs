//! Heartbeat Loop: ping the external uptime monitor every interval.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub struct Heartbeat {
    client: reqwest::Client,
    url: String,
    interval: Duration,
}

impl Heartbeat {
    pub fn new(url: impl Into<String>, interval: Duration, timeout: Duration) -> Self {
        let client = match reqwest::Client::builder().timeout(timeout).build() {
            Ok(client) => client,
            Err(e) => {
                warn!(error = %e, "heartbeat client build failed, pinging without a timeout");
                reqwest::Client::new()
            }
        };
        Self {
            client,
            url: url.into(),
            interval,
        }
    }

    /// One fire-and-forget ping. Every failure is swallowed.
    pub async fn ping(&self) {
        match self.client.get(&self.url).send().await {
            Ok(resp) => debug!(status = %resp.status(), "heartbeat sent"),
            Err(e) => debug!(error = %e, "heartbeat failed"),
        }
    }

    /// Ping, then sleep, until cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.ping() => {}
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
        debug!("heartbeat loop stopped");
    }
}
