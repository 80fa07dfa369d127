//! MemoryAckSink - event-collecting ack sink for dev and tests.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

use crate::domain::AckEvent;
use crate::ports::AckSink;

#[derive(Default)]
pub struct MemoryAckSink {
    events: Mutex<Vec<AckEvent>>,
    fail: AtomicBool,
}

impl MemoryAckSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<AckEvent> {
        self.events.lock().await.clone()
    }

    /// Make subsequent `emit` calls fail (to exercise the "sink failures
    /// are logged and discarded" path).
    pub fn fail_emits(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl AckSink for MemoryAckSink {
    async fn emit(&self, event: AckEvent) -> Result<(), String> {
        if self.fail.load(Ordering::SeqCst) {
            return Err("sink unavailable".to_string());
        }
        self.events.lock().await.push(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::JobId;

    #[tokio::test]
    async fn collects_events_in_order() {
        let sink = MemoryAckSink::new();
        sink.emit(AckEvent::ack(JobId::new("a"), 1)).await.unwrap();
        sink.emit(AckEvent::ack(JobId::new("b"), 1)).await.unwrap();

        let events = sink.events().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].job_id().as_str(), "a");
    }

    #[tokio::test]
    async fn can_simulate_failure() {
        let sink = MemoryAckSink::new();
        sink.fail_emits(true);
        assert!(sink.emit(AckEvent::ack(JobId::new("a"), 1)).await.is_err());
        assert!(sink.events().await.is_empty());
    }
}
