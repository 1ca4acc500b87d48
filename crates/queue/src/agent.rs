//! Broker connection lifecycle: connect with retry, declare, publish, disconnect.

use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::broker::{BrokerChannel, BrokerConnector, MessageHeaders};
use crate::error::QueueError;
use crate::retry::RetryPolicy;

/// Owns at most one broker connection.
///
/// Knows nothing about files or rows. One agent is created per
/// file-processing attempt, so the channel is never shared between tasks.
pub struct QueueAgent {
    connector: Arc<dyn BrokerConnector>,
    policy: RetryPolicy,
    channel: Option<Box<dyn BrokerChannel>>,
}

impl QueueAgent {
    pub fn new(connector: Arc<dyn BrokerConnector>, policy: RetryPolicy) -> Self {
        Self {
            connector,
            policy,
            channel: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.channel.is_some()
    }

    /// Connect, retrying per the policy. Returns
    /// [`QueueError::RetriesExhausted`] once every attempt has failed.
    pub async fn connect(&mut self) -> Result<(), QueueError> {
        if self.channel.is_some() {
            return Ok(());
        }

        let max = self.policy.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max {
            match self.connector.connect().await {
                Ok(channel) => {
                    debug!(endpoint = %self.connector.endpoint(), attempt, "connected to broker");
                    self.channel = Some(channel);
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        endpoint = %self.connector.endpoint(),
                        attempt,
                        max_attempts = max,
                        error = %e,
                        "broker connection attempt failed"
                    );
                    last_error = e.to_string();
                    if attempt < max {
                        tokio::time::sleep(self.policy.delay_after(attempt)).await;
                    }
                }
            }
        }

        error!(
            endpoint = %self.connector.endpoint(),
            "failed to connect to broker after all retries"
        );
        Err(QueueError::RetriesExhausted {
            attempts: max,
            last_error,
        })
    }

    pub async fn declare_queue(&mut self, queue: &str) -> Result<(), QueueError> {
        let channel = self.channel.as_mut().ok_or(QueueError::NotConnected)?;
        channel.declare_durable_queue(queue).await?;
        debug!(queue, "declared durable queue");
        Ok(())
    }

    /// Publish one persistent message. Not retried here: a failure on an
    /// established connection goes straight back to the caller.
    pub async fn publish(
        &mut self,
        queue: &str,
        payload: &[u8],
        message_id: &str,
        headers: &MessageHeaders,
    ) -> Result<(), QueueError> {
        let channel = self.channel.as_mut().ok_or(QueueError::NotConnected)?;
        channel
            .publish_persistent(queue, payload, message_id, headers)
            .await
    }

    /// Close the connection if open. Never fails.
    pub async fn disconnect(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            match channel.close().await {
                Ok(()) => debug!(endpoint = %self.connector.endpoint(), "disconnected from broker"),
                Err(e) => warn!(error = %e, "error during broker disconnect"),
            }
        }
    }
}
