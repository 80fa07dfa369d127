//! AckSink port - where acknowledgement events go.
//!
//! Fire-and-forget from the dispatcher's point of view: a failing sink is
//! logged and discarded, it never becomes part of the job's own outcome.

use async_trait::async_trait;

use crate::domain::AckEvent;

#[async_trait]
pub trait AckSink: Send + Sync {
    /// Deliver one event to the originator (websocket frame, SQS message, ...).
    async fn emit(&self, event: AckEvent) -> Result<(), String>;
}
