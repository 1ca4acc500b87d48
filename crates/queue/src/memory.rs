//! In-process broker for local runs and tests.
//!
//! Mirrors the broker semantics the pipeline relies on: durable queues are
//! declared idempotently, messages land in per-queue FIFO order, and
//! publishing to an undeclared queue fails. Failure injection hooks let
//! callers simulate an unreachable broker or a mid-file publish failure.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::broker::{BrokerChannel, BrokerConnector, MessageHeaders};
use crate::error::QueueError;

/// A message as the broker stored it.
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub queue: String,
    pub payload: Vec<u8>,
    pub message_id: String,
    pub headers: MessageHeaders,
    pub persistent: bool,
}

impl PublishedMessage {
    pub fn payload_str(&self) -> &str {
        std::str::from_utf8(&self.payload).unwrap_or("")
    }
}

#[derive(Debug, Default)]
struct State {
    queues: BTreeMap<String, Vec<PublishedMessage>>,
    declare_calls: usize,
    connect_attempts: u32,
    failing_connects: u32,
    unreachable: bool,
    publish_calls: usize,
    fail_publish_at: Option<usize>,
    open_channels: usize,
}

/// Shared handle; clones observe the same broker.
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<State>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A poisoned lock only means a test thread panicked mid-update.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make the next `n` connection attempts fail.
    pub fn fail_next_connects(&self, n: u32) {
        self.lock().failing_connects = n;
    }

    /// Make every connection attempt fail while `true`.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.lock().unreachable = unreachable;
    }

    /// Fail the `n`th publish call (1-based, counted across all channels).
    pub fn fail_publish_at(&self, n: usize) {
        self.lock().fail_publish_at = Some(n);
    }

    pub fn connect_attempts(&self) -> u32 {
        self.lock().connect_attempts
    }

    pub fn declare_calls(&self) -> usize {
        self.lock().declare_calls
    }

    pub fn open_channels(&self) -> usize {
        self.lock().open_channels
    }

    pub fn queue_names(&self) -> Vec<String> {
        self.lock().queues.keys().cloned().collect()
    }

    pub fn messages(&self, queue: &str) -> Vec<PublishedMessage> {
        self.lock().queues.get(queue).cloned().unwrap_or_default()
    }

    pub fn total_messages(&self) -> usize {
        self.lock().queues.values().map(Vec::len).sum()
    }
}

#[async_trait]
impl BrokerConnector for MemoryBroker {
    async fn connect(&self) -> Result<Box<dyn BrokerChannel>, QueueError> {
        let mut state = self.lock();
        state.connect_attempts += 1;
        if state.unreachable {
            return Err(QueueError::Connection("memory broker unreachable".into()));
        }
        if state.failing_connects > 0 {
            state.failing_connects -= 1;
            return Err(QueueError::Connection("memory broker refused connection".into()));
        }
        state.open_channels += 1;
        Ok(Box::new(MemoryChannel {
            broker: self.clone(),
            open: true,
        }))
    }

    fn endpoint(&self) -> String {
        "memory://".to_string()
    }
}

struct MemoryChannel {
    broker: MemoryBroker,
    open: bool,
}

impl MemoryChannel {
    fn ensure_open(&self) -> Result<(), QueueError> {
        if self.open {
            Ok(())
        } else {
            Err(QueueError::NotConnected)
        }
    }
}

#[async_trait]
impl BrokerChannel for MemoryChannel {
    async fn declare_durable_queue(&mut self, queue: &str) -> Result<(), QueueError> {
        self.ensure_open()?;
        let mut state = self.broker.lock();
        state.declare_calls += 1;
        state.queues.entry(queue.to_string()).or_default();
        Ok(())
    }

    async fn publish_persistent(
        &mut self,
        queue: &str,
        payload: &[u8],
        message_id: &str,
        headers: &MessageHeaders,
    ) -> Result<(), QueueError> {
        self.ensure_open()?;
        let mut state = self.broker.lock();
        state.publish_calls += 1;
        if state.fail_publish_at == Some(state.publish_calls) {
            return Err(QueueError::Publish {
                queue: queue.to_string(),
                reason: "injected publish failure".into(),
            });
        }
        let messages = state.queues.get_mut(queue).ok_or_else(|| QueueError::Publish {
            queue: queue.to_string(),
            reason: "queue not declared".into(),
        })?;
        messages.push(PublishedMessage {
            queue: queue.to_string(),
            payload: payload.to_vec(),
            message_id: message_id.to_string(),
            headers: headers.clone(),
            persistent: true,
        });
        Ok(())
    }

    async fn close(&mut self) -> Result<(), QueueError> {
        if self.open {
            self.open = false;
            let mut state = self.broker.lock();
            state.open_channels = state.open_channels.saturating_sub(1);
        }
        Ok(())
    }
}
