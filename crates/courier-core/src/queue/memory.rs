//! In-memory dispatch queue.
//!
//! Ordered buffer of pending jobs with dedup by id. The job map is the
//! single source of truth; the ready deque and the scheduled heap hold
//! `JobId` only. Retry re-insertion is a delayed push to the *tail* (via
//! the heap + `Notify`), never a blocking sleep inside the drain loop.

use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use crate::app::status::DispatchCounts;
use crate::domain::{Category, CourierError, Job, JobId, JobStatus};
use crate::ports::Clock;

/// Snapshot of the job at the head of the queue, owned by the drain loop
/// while it negotiates admission.
pub type HeadJob = Job;

/// Delayed re-insertion entry. Reverse ordering so the `BinaryHeap` acts
/// as a min-heap (earliest `ready_at` first).
///
/// `epoch` pins the entry to one incarnation of the id: cancelling a job
/// and resubmitting the same id must not let the old entry wake the new
/// incarnation before its own backoff.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ScheduledJob {
    ready_at: Instant,
    id: JobId,
    epoch: u64,
}

impl PartialOrd for ScheduledJob {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledJob {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .ready_at
            .cmp(&self.ready_at)
            .then_with(|| other.id.cmp(&self.id))
    }
}

struct QueueState {
    /// All job records, terminal ones included (kept for status queries).
    jobs: HashMap<JobId, Job>,

    /// Incarnation counter per id, bumped on every accepted `submit`.
    epochs: HashMap<JobId, u64>,

    /// Arrival-order FIFO of runnable job ids.
    ready: VecDeque<JobId>,

    /// Jobs waiting out a backoff or deferral delay.
    scheduled: BinaryHeap<ScheduledJob>,
}

impl QueueState {
    fn new() -> Self {
        Self {
            jobs: HashMap::new(),
            epochs: HashMap::new(),
            ready: VecDeque::new(),
            scheduled: BinaryHeap::new(),
        }
    }

    fn epoch(&self, id: &JobId) -> u64 {
        self.epochs.get(id).copied().unwrap_or(0)
    }

    /// Move due scheduled jobs to the ready tail. Entries from an earlier
    /// incarnation of the id are dropped.
    fn promote_scheduled(&mut self) {
        let now = Instant::now();
        while let Some(entry) = self.scheduled.peek() {
            if entry.ready_at > now {
                break; // min-heap: nothing else is due either
            }
            let entry = self.scheduled.pop().expect("peeked entry exists");
            if entry.epoch != self.epoch(&entry.id) {
                continue; // stale: the job was cancelled or resubmitted
            }
            if let Some(job) = self.jobs.get(&entry.id)
                && job.status == JobStatus::Queued
            {
                self.ready.push_back(entry.id);
            }
        }
    }

    fn counts(&self) -> DispatchCounts {
        let mut counts = DispatchCounts::default();
        for job in self.jobs.values() {
            match job.status {
                JobStatus::Queued => counts.queued += 1,
                JobStatus::Dispatching => counts.dispatching += 1,
                JobStatus::Succeeded => counts.succeeded += 1,
                JobStatus::Failed => counts.failed += 1,
                JobStatus::Cancelled => counts.cancelled += 1,
            }
        }
        counts
    }
}

pub struct DispatchQueue {
    state: Arc<Mutex<QueueState>>,
    notify: Arc<Notify>,
    clock: Arc<dyn Clock>,
}

impl DispatchQueue {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState::new())),
            notify: Arc::new(Notify::new()),
            clock,
        }
    }

    /// Idempotent submission. Returns `false` (no-op) when a job with the
    /// same id is already queued or dispatching; a terminal record with
    /// the same id is replaced by the fresh job.
    pub async fn submit(
        &self,
        id: JobId,
        category: Category,
        payload: serde_json::Value,
    ) -> bool {
        {
            let mut state = self.state.lock().await;
            if let Some(existing) = state.jobs.get(&id)
                && existing.status.is_live()
            {
                return false;
            }

            let job = Job::new(id.clone(), category, payload, self.clock.now());
            state
                .epochs
                .entry(id.clone())
                .and_modify(|e| *e += 1)
                .or_insert(0);
            state.jobs.insert(id.clone(), job);
            state.ready.push_back(id);
        }
        self.notify.notify_one();
        true
    }

    /// Cancel a still-queued job. Cancelling a dispatching job is refused
    /// (the in-flight attempt's outcome will still surface); unknown ids
    /// are an error.
    pub async fn cancel(&self, id: &JobId) -> Result<(), CourierError> {
        let mut state = self.state.lock().await;
        let job = state
            .jobs
            .get_mut(id)
            .ok_or_else(|| CourierError::JobNotFound(id.clone()))?;

        match job.status {
            JobStatus::Queued => {
                job.mark_cancelled();
                state.ready.retain(|queued| queued != id);
                Ok(())
            }
            _ => Err(CourierError::NotCancellable(id.clone())),
        }
    }

    /// Wait for the next runnable job and hand back a snapshot of it.
    /// The record stays `Queued` until `start_attempt`; the loop holding
    /// the snapshot is what makes at-most-one-in-flight hold.
    pub async fn next_ready(&self) -> HeadJob {
        loop {
            let next_wake = {
                let mut state = self.state.lock().await;
                state.promote_scheduled();

                while let Some(id) = state.ready.pop_front() {
                    if let Some(job) = state.jobs.get(&id)
                        && job.status == JobStatus::Queued
                    {
                        return job.clone();
                    }
                    // Cancelled or replaced while sitting in the deque; skip.
                }

                state.scheduled.peek().map(|entry| entry.ready_at)
            };

            match next_wake {
                Some(wake_at) => {
                    tokio::select! {
                        _ = self.notify.notified() => {}
                        _ = tokio::time::sleep_until(wake_at) => {}
                    }
                }
                None => self.notify.notified().await,
            }
        }
    }

    /// Record that an ack was emitted for the given attempt number.
    pub async fn note_acked(&self, id: &JobId, attempt: u32) {
        let mut state = self.state.lock().await;
        if let Some(job) = state.jobs.get_mut(id) {
            job.acked_attempt = attempt;
        }
    }

    /// Transition to Dispatching and burn one attempt. Returns `None` if
    /// the job is no longer queued (e.g. cancelled during a deferral).
    pub async fn start_attempt(&self, id: &JobId) -> Option<u32> {
        let mut state = self.state.lock().await;
        let job = state.jobs.get_mut(id)?;
        if job.status != JobStatus::Queued {
            return None;
        }
        Some(job.start_attempt(self.clock.now()))
    }

    pub async fn complete_success(&self, id: &JobId) {
        let mut state = self.state.lock().await;
        if let Some(job) = state.jobs.get_mut(id) {
            job.mark_succeeded();
        }
    }

    pub async fn complete_failure(&self, id: &JobId, error: &str) {
        let mut state = self.state.lock().await;
        if let Some(job) = state.jobs.get_mut(id) {
            job.mark_failed(error);
        }
    }

    /// Re-insert at the tail after `delay` (retry path: the error is
    /// recorded on the job).
    pub async fn schedule_retry(&self, id: &JobId, delay: Duration, error: &str) {
        {
            let mut state = self.state.lock().await;
            let Some(job) = state.jobs.get_mut(id) else {
                return;
            };
            job.requeue_for_retry(error);
            let epoch = state.epoch(id);
            state.scheduled.push(ScheduledJob {
                ready_at: Instant::now() + delay,
                id: id.clone(),
                epoch,
            });
        }
        self.notify.notify_one();
    }

    /// Re-insert at the tail after `delay` without recording a failure
    /// (breaker-denial path: nothing was attempted).
    pub async fn defer(&self, id: &JobId, delay: Duration) {
        {
            let mut state = self.state.lock().await;
            let Some(job) = state.jobs.get_mut(id) else {
                return;
            };
            job.defer();
            let epoch = state.epoch(id);
            state.scheduled.push(ScheduledJob {
                ready_at: Instant::now() + delay,
                id: id.clone(),
                epoch,
            });
        }
        self.notify.notify_one();
    }

    pub async fn job(&self, id: &JobId) -> Option<Job> {
        let state = self.state.lock().await;
        state.jobs.get(id).cloned()
    }

    pub async fn counts(&self) -> DispatchCounts {
        let state = self.state.lock().await;
        state.counts()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::SystemClock;

    fn queue() -> DispatchQueue {
        DispatchQueue::new(Arc::new(SystemClock))
    }

    async fn submit(q: &DispatchQueue, id: &str) -> bool {
        q.submit(JobId::new(id), Category::new("dm"), serde_json::json!({}))
            .await
    }

    #[tokio::test]
    async fn submit_is_idempotent_while_live() {
        let q = queue();

        assert!(submit(&q, "j1").await);
        assert!(!submit(&q, "j1").await, "queued: resubmission is a no-op");

        let head = q.next_ready().await;
        q.start_attempt(&head.id).await.unwrap();
        assert!(!submit(&q, "j1").await, "dispatching: still a no-op");

        let counts = q.counts().await;
        assert_eq!(counts.queued + counts.dispatching, 1);
    }

    #[tokio::test]
    async fn terminal_jobs_can_be_resubmitted() {
        let q = queue();
        submit(&q, "j1").await;
        let head = q.next_ready().await;
        q.start_attempt(&head.id).await.unwrap();
        q.complete_success(&head.id).await;

        assert!(submit(&q, "j1").await, "terminal record is replaced");
        let fresh = q.job(&JobId::new("j1")).await.unwrap();
        assert_eq!(fresh.status, JobStatus::Queued);
        assert_eq!(fresh.attempt, 0);
    }

    #[tokio::test]
    async fn next_ready_is_fifo() {
        let q = queue();
        submit(&q, "a").await;
        submit(&q, "b").await;
        submit(&q, "c").await;

        assert_eq!(q.next_ready().await.id.as_str(), "a");
        // Head snapshot does not consume: simulate completion to advance.
        q.start_attempt(&JobId::new("a")).await.unwrap();
        q.complete_success(&JobId::new("a")).await;
        assert_eq!(q.next_ready().await.id.as_str(), "b");
    }

    #[tokio::test]
    async fn cancel_queued_removes_without_side_effects() {
        let q = queue();
        submit(&q, "a").await;
        submit(&q, "b").await;

        q.cancel(&JobId::new("a")).await.unwrap();
        assert_eq!(
            q.job(&JobId::new("a")).await.unwrap().status,
            JobStatus::Cancelled
        );
        assert_eq!(q.next_ready().await.id.as_str(), "b");
    }

    #[tokio::test]
    async fn cancel_dispatching_is_refused() {
        let q = queue();
        submit(&q, "a").await;
        let head = q.next_ready().await;
        q.start_attempt(&head.id).await.unwrap();

        let err = q.cancel(&head.id).await.unwrap_err();
        assert!(matches!(err, CourierError::NotCancellable(_)));
    }

    #[tokio::test]
    async fn cancel_unknown_is_an_error() {
        let q = queue();
        let err = q.cancel(&JobId::new("ghost")).await.unwrap_err();
        assert!(matches!(err, CourierError::JobNotFound(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn scheduled_retry_reinserts_at_tail_after_delay() {
        let q = queue();
        submit(&q, "a").await;
        let head = q.next_ready().await;
        q.start_attempt(&head.id).await.unwrap();
        q.schedule_retry(&head.id, Duration::from_secs(5), "boom")
            .await;

        // While "a" waits out its backoff, later arrivals run first.
        submit(&q, "b").await;
        assert_eq!(q.next_ready().await.id.as_str(), "b");
        q.start_attempt(&JobId::new("b")).await.unwrap();
        q.complete_success(&JobId::new("b")).await;

        // Paused clock: next_ready auto-advances past the 5s delay.
        let head = q.next_ready().await;
        assert_eq!(head.id.as_str(), "a");
        assert_eq!(head.last_error.as_deref(), Some("boom"));
        assert_eq!(head.attempt, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_backoff_prevents_requeue() {
        let q = queue();
        submit(&q, "a").await;
        let head = q.next_ready().await;
        q.start_attempt(&head.id).await.unwrap();
        q.schedule_retry(&head.id, Duration::from_millis(10), "boom")
            .await;

        q.cancel(&head.id).await.unwrap();
        submit(&q, "b").await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(q.next_ready().await.id.as_str(), "b", "a was cancelled");
    }

    #[tokio::test(start_paused = true)]
    async fn resubmission_does_not_inherit_stale_backoff_entries() {
        let q = queue();
        submit(&q, "a").await;
        let head = q.next_ready().await;
        q.start_attempt(&head.id).await.unwrap();
        q.schedule_retry(&head.id, Duration::from_secs(5), "boom")
            .await;
        q.cancel(&head.id).await.unwrap();

        // Same id, fresh incarnation, much longer backoff.
        assert!(submit(&q, "a").await, "cancelled record is replaced");
        let head = q.next_ready().await;
        q.start_attempt(&head.id).await.unwrap();
        q.schedule_retry(&head.id, Duration::from_secs(100), "boom again")
            .await;

        // The first incarnation's 5s entry must not wake this one early.
        tokio::time::sleep(Duration::from_secs(10)).await;
        let early = tokio::time::timeout(Duration::from_secs(1), q.next_ready()).await;
        assert!(early.is_err(), "ready before the 100s backoff elapsed");

        tokio::time::sleep(Duration::from_secs(95)).await;
        assert_eq!(q.next_ready().await.id.as_str(), "a");
    }

    #[tokio::test]
    async fn start_attempt_on_cancelled_job_returns_none() {
        let q = queue();
        submit(&q, "a").await;
        let head = q.next_ready().await;
        q.cancel(&head.id).await.unwrap();

        assert_eq!(q.start_attempt(&head.id).await, None);
    }

    #[tokio::test]
    async fn counts_reflect_statuses() {
        let q = queue();
        submit(&q, "a").await;
        submit(&q, "b").await;
        submit(&q, "c").await;

        q.start_attempt(&JobId::new("a")).await.unwrap();
        q.complete_failure(&JobId::new("a"), "dead").await;
        q.cancel(&JobId::new("b")).await.unwrap();

        let counts = q.counts().await;
        assert_eq!(counts.queued, 1);
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.cancelled, 1);
    }
}
