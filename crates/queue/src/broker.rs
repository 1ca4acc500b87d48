//! Broker traits shared by every queue backend.

use async_trait::async_trait;
use serde::Serialize;

use crate::error::QueueError;

/// Metadata attached to each published row message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageHeaders {
    pub filename: String,
    pub row_number: u64,
    pub total_rows: u64,
}

/// Opens connections to a message broker.
///
/// A connector is cheap to share; every call to [`connect`](Self::connect)
/// yields an independent channel, so concurrent publishers never share one.
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    /// Single connection attempt. Retries are the caller's business.
    async fn connect(&self) -> Result<Box<dyn BrokerChannel>, QueueError>;

    /// Redacted endpoint description for logs.
    fn endpoint(&self) -> String;
}

/// An open connection capable of declaring queues and publishing to them.
#[async_trait]
pub trait BrokerChannel: Send {
    /// Declare a durable queue. Declaring an existing queue with the same
    /// properties is a no-op.
    async fn declare_durable_queue(&mut self, queue: &str) -> Result<(), QueueError>;

    /// Publish one persistent message directly to `queue`, returning once the
    /// broker has accepted it.
    async fn publish_persistent(
        &mut self,
        queue: &str,
        payload: &[u8],
        message_id: &str,
        headers: &MessageHeaders,
    ) -> Result<(), QueueError>;

    async fn close(&mut self) -> Result<(), QueueError>;
}
