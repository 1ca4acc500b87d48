pub mod agent;
pub mod amqp;
pub mod broker;
pub mod error;
pub mod memory;
pub mod retry;
pub mod sqs;

pub use agent::QueueAgent;
pub use amqp::AmqpConnector;
pub use broker::{BrokerChannel, BrokerConnector, MessageHeaders};
pub use error::QueueError;
pub use memory::{MemoryBroker, PublishedMessage};
pub use retry::{Backoff, RetryPolicy};
pub use sqs::SqsConnector;
