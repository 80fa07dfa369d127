//! DurableQueue port - backend transport variant.
//!
//! On the backend, outbound dispatch is a send to a durable,
//! visibility-timeout-based queue with a dead-letter destination for
//! messages that exceed their retry budget. Batch size and visibility
//! timeout are configuration of the implementation, not protocol.

use async_trait::async_trait;

use serde::{Deserialize, Serialize};

use crate::domain::JobId;

/// Message handed to the durable queue. The body is the job payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueMessage {
    pub job_id: JobId,
    pub body: serde_json::Value,
}

/// Result of a durable send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendReceipt {
    pub message_id: String,
    pub accepted: bool,
}

#[async_trait]
pub trait DurableQueue: Send + Sync {
    /// Enqueue one message. `accepted: false` means the queue refused it
    /// (full, throttled, ...) without the send being an error per se.
    async fn send(&self, message: QueueMessage) -> Result<SendReceipt, String>;
}
