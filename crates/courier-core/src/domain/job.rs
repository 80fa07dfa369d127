//! Job record and status management.
//!
//! The record is the single source of truth for one unit of work. Queue
//! structures hold `JobId` only; every state transition happens through
//! the methods here, driven by the dispatcher loop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{Category, JobId};

/// Job lifecycle state.
///
/// Transitions:
/// - Queued -> Dispatching -> Succeeded
/// - Queued -> Dispatching -> Queued (retry, delayed tail re-insertion)
/// - Queued -> Dispatching -> Failed (terminal classification or retry budget exhausted)
/// - Queued -> Cancelled (only while still queued)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Dispatching,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Terminal states are no longer owned by the dispatch core.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Is this job live in the queue (counts for dedup on resubmission)?
    pub fn is_live(self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Dispatching)
    }
}

/// A unit of work to dispatch.
///
/// Invariants:
/// - `attempt` counts actual external-call invocations only. Limiter
///   deferrals and breaker denials never touch it.
/// - `attempt > 0` implies the job was sent downstream at least once.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub category: Category,

    /// Opaque to the core; handed to the transport as-is.
    pub payload: serde_json::Value,

    /// Dispatch attempts so far (incremented right before each external call).
    pub attempt: u32,

    pub status: JobStatus,

    /// Highest attempt number an `ack` event has been emitted for.
    /// Guards against duplicate acks when admission defers the head job.
    pub acked_attempt: u32,

    pub last_error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(
        id: JobId,
        category: Category,
        payload: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            category,
            payload,
            attempt: 0,
            status: JobStatus::Queued,
            acked_attempt: 0,
            last_error: None,
            created_at: now,
            last_attempt_at: None,
        }
    }

    /// The attempt number the next external call will carry.
    pub fn next_attempt(&self) -> u32 {
        self.attempt + 1
    }

    /// Mark as dispatching and burn one attempt. Returns the new attempt number.
    pub fn start_attempt(&mut self, now: DateTime<Utc>) -> u32 {
        self.status = JobStatus::Dispatching;
        self.attempt += 1;
        self.last_attempt_at = Some(now);
        self.attempt
    }

    pub fn mark_succeeded(&mut self) {
        self.status = JobStatus::Succeeded;
        self.last_error = None;
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = JobStatus::Failed;
        self.last_error = Some(error.into());
    }

    pub fn mark_cancelled(&mut self) {
        self.status = JobStatus::Cancelled;
    }

    /// Back to Queued while the backoff delay elapses.
    pub fn requeue_for_retry(&mut self, error: impl Into<String>) {
        self.status = JobStatus::Queued;
        self.last_error = Some(error.into());
    }

    /// Back to Queued with nothing consumed (admission denial path).
    pub fn defer(&mut self) {
        self.status = JobStatus::Queued;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn job() -> Job {
        Job::new(
            JobId::new("j1"),
            Category::new("dm"),
            serde_json::json!({"to": "fan-1"}),
            Utc::now(),
        )
    }

    #[test]
    fn new_job_is_queued_with_zero_attempts() {
        let j = job();
        assert_eq!(j.status, JobStatus::Queued);
        assert_eq!(j.attempt, 0);
        assert_eq!(j.acked_attempt, 0);
        assert!(j.last_attempt_at.is_none());
    }

    #[test]
    fn start_attempt_increments_exactly_once() {
        let mut j = job();
        let now = Utc::now();

        assert_eq!(j.next_attempt(), 1);
        assert_eq!(j.start_attempt(now), 1);
        assert_eq!(j.status, JobStatus::Dispatching);
        assert_eq!(j.last_attempt_at, Some(now));

        j.requeue_for_retry("network down");
        assert_eq!(j.status, JobStatus::Queued);
        assert_eq!(j.attempt, 1); // retry does not burn an attempt by itself
        assert_eq!(j.start_attempt(now), 2);
    }

    #[test]
    fn defer_does_not_touch_attempt_or_error() {
        let mut j = job();
        j.start_attempt(Utc::now());
        j.defer();
        assert_eq!(j.status, JobStatus::Queued);
        assert_eq!(j.attempt, 1);
        assert!(j.last_error.is_none());
    }

    #[rstest]
    #[case::succeeded(JobStatus::Succeeded, true)]
    #[case::failed(JobStatus::Failed, true)]
    #[case::cancelled(JobStatus::Cancelled, true)]
    #[case::queued(JobStatus::Queued, false)]
    #[case::dispatching(JobStatus::Dispatching, false)]
    fn terminal_states(#[case] status: JobStatus, #[case] terminal: bool) {
        assert_eq!(status.is_terminal(), terminal);
        assert_eq!(status.is_live(), !terminal);
    }

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&JobStatus::Dispatching).unwrap(),
            "\"dispatching\""
        );
    }
}
