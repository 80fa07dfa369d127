//! Durable-queue transport variant (backend side).
//!
//! Outbound dispatch becomes a `send` to a durable, visibility-timeout
//! based queue; a consumer elsewhere receives, processes and deletes the
//! message. Messages that exceed their receive budget are redriven to a
//! dead-letter destination. Batch size and visibility timeout are
//! configuration, not protocol.
//!
//! `InMemoryDurableQueue` exists for dev and tests; production would wire
//! an SQS-like implementation behind the same `DurableQueue` port.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use ulid::Ulid;

use crate::domain::{Job, TransportFailure};
use crate::ports::{DurableQueue, QueueMessage, SendReceipt, Transport};

#[derive(Debug, Clone, Copy)]
pub struct DurableQueueConfig {
    pub visibility_timeout: Duration,

    /// Receives allowed before a message is redriven to the dead letter.
    pub max_receives: u32,

    /// Max messages handed out per `receive` call.
    pub batch_size: usize,

    /// Refuse sends beyond this depth (`accepted: false`), None = unbounded.
    pub capacity: Option<usize>,
}

impl Default for DurableQueueConfig {
    fn default() -> Self {
        Self {
            visibility_timeout: Duration::from_secs(30),
            max_receives: 3,
            batch_size: 10,
            capacity: None,
        }
    }
}

/// Opaque handle for deleting a received message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReceiptHandle(String);

#[derive(Debug, Clone)]
struct StoredMessage {
    message: QueueMessage,
    receive_count: u32,
}

struct DurableState {
    available: VecDeque<StoredMessage>,
    in_flight: HashMap<ReceiptHandle, (Instant, StoredMessage)>,
    dead_letter: Vec<QueueMessage>,
}

pub struct InMemoryDurableQueue {
    config: DurableQueueConfig,
    state: Mutex<DurableState>,
}

impl InMemoryDurableQueue {
    pub fn new(config: DurableQueueConfig) -> Self {
        Self {
            config,
            state: Mutex::new(DurableState {
                available: VecDeque::new(),
                in_flight: HashMap::new(),
                dead_letter: Vec::new(),
            }),
        }
    }

    /// Receive up to `batch_size` messages, making them invisible for the
    /// visibility timeout. Expired in-flight messages are requeued (or
    /// dead-lettered) first.
    pub async fn receive(&self) -> Vec<(ReceiptHandle, QueueMessage)> {
        let mut state = self.state.lock().await;
        self.requeue_expired(&mut state);

        let mut batch = Vec::new();
        while batch.len() < self.config.batch_size {
            let Some(mut stored) = state.available.pop_front() else {
                break;
            };
            stored.receive_count += 1;

            let receipt = ReceiptHandle(Ulid::new().to_string());
            let deadline = Instant::now() + self.config.visibility_timeout;
            batch.push((receipt.clone(), stored.message.clone()));
            state.in_flight.insert(receipt, (deadline, stored));
        }
        batch
    }

    /// Acknowledge successful processing.
    pub async fn delete(&self, receipt: &ReceiptHandle) -> bool {
        let mut state = self.state.lock().await;
        state.in_flight.remove(receipt).is_some()
    }

    pub async fn dead_letters(&self) -> Vec<QueueMessage> {
        let mut state = self.state.lock().await;
        self.requeue_expired(&mut state);
        state.dead_letter.clone()
    }

    pub async fn depth(&self) -> usize {
        let state = self.state.lock().await;
        state.available.len()
    }

    fn requeue_expired(&self, state: &mut DurableState) {
        let now = Instant::now();
        let expired: Vec<ReceiptHandle> = state
            .in_flight
            .iter()
            .filter(|(_, (deadline, _))| *deadline <= now)
            .map(|(receipt, _)| receipt.clone())
            .collect();

        for receipt in expired {
            let (_, stored) = state.in_flight.remove(&receipt).expect("receipt exists");
            if stored.receive_count >= self.config.max_receives {
                state.dead_letter.push(stored.message);
            } else {
                state.available.push_back(stored);
            }
        }
    }
}

#[async_trait]
impl DurableQueue for InMemoryDurableQueue {
    async fn send(&self, message: QueueMessage) -> Result<SendReceipt, String> {
        let mut state = self.state.lock().await;
        let message_id = Ulid::new().to_string();

        if let Some(capacity) = self.config.capacity
            && state.available.len() >= capacity
        {
            return Ok(SendReceipt {
                message_id,
                accepted: false,
            });
        }

        state.available.push_back(StoredMessage {
            message,
            receive_count: 0,
        });
        Ok(SendReceipt {
            message_id,
            accepted: true,
        })
    }
}

/// Transport adapter: dispatching a job means handing it to the durable
/// queue. A refused send surfaces as a retryable failure.
pub struct DurableQueueTransport {
    queue: Arc<dyn DurableQueue>,
}

impl DurableQueueTransport {
    pub fn new(queue: Arc<dyn DurableQueue>) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl Transport for DurableQueueTransport {
    async fn send(&self, job: &Job) -> Result<serde_json::Value, TransportFailure> {
        let message = QueueMessage {
            job_id: job.id.clone(),
            body: job.payload.clone(),
        };

        let receipt = self
            .queue
            .send(message)
            .await
            .map_err(TransportFailure::unstructured)?;

        if receipt.accepted {
            Ok(serde_json::json!({ "message_id": receipt.message_id }))
        } else {
            Err(TransportFailure::new(
                "RATE_LIMITED",
                "durable queue refused the message",
            ))
        }
    }

    fn dependency(&self) -> &str {
        "durable-queue"
    }
}
