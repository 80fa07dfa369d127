//! Dispatcher - the core drain loop.
//!
//! Single logical consumer: one head job at a time per dispatcher
//! instance, which is what makes strict FIFO ordering and
//! at-most-one-in-flight trivially correct without locks. Limiter and
//! breaker are owned mutable state, touched only inside this loop.
//!
//! Per head job:
//! 1. ack (once per attempt, emitted before the external call)
//! 2. token bucket admission — denial defers at the head, nothing counted
//! 3. circuit breaker admission — open circuit is an immediate retryable
//!    `CIRCUIT_OPEN` result, attempt unchanged, classifier not involved
//! 4. attempt += 1, external call under `call_timeout`
//! 5. classify, then: success / scheduled retry (tail) / terminal failure
//!
//! Concurrency exists only across independent dispatcher instances; they
//! must never share a limiter or a breaker registry.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::admission::{BreakerRegistry, TokenBucketLimiter};
use crate::domain::{
    AckEvent, AttemptError, FailureKind, Job, JobStatus, TransportFailure, classify,
};
use crate::ports::{AckSink, SessionInvalidator, Transport};
use crate::queue::{DispatchQueue, RetryPolicy};

/// Loop-level knobs (retry and admission configs are wired separately by
/// the builder).
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Upper bound on one external call; expiry surfaces as TIMEOUT.
    pub call_timeout: Duration,

    /// Fixed short delay between admission re-checks when the limiter
    /// denies the head job. Not an attempt, not classified.
    pub throttle_deferral: Duration,

    /// Feature flag: when false, limiter and breaker are bypassed and
    /// every result event says so explicitly.
    pub admission_enabled: bool,

    /// Adaptive throttling (see DESIGN notes): drain the local bucket on
    /// a downstream RATE_LIMITED answer.
    pub shrink_on_rate_limited: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(30),
            throttle_deferral: Duration::from_millis(250),
            admission_enabled: true,
            shrink_on_rate_limited: false,
        }
    }
}

pub struct Dispatcher {
    queue: Arc<DispatchQueue>,
    transport: Arc<dyn Transport>,
    ack_sink: Arc<dyn AckSink>,
    session_invalidator: Arc<dyn SessionInvalidator>,
    limiter: TokenBucketLimiter,
    breakers: BreakerRegistry,
    retry: RetryPolicy,
    config: DispatchConfig,
}

/// Handle for a spawned dispatcher.
/// - `request_shutdown()` stops taking new head jobs; the in-flight
///   external call is allowed to finish (no forcible abort).
/// - `shutdown_and_join()` waits for the loop to exit.
pub struct DispatcherHandle {
    queue: Arc<DispatchQueue>,
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl DispatcherHandle {
    pub fn queue(&self) -> Arc<DispatchQueue> {
        Arc::clone(&self.queue)
    }

    pub fn request_shutdown(&self) {
        // ignore send error: the loop may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        let _ = self.join.await;
    }
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        queue: Arc<DispatchQueue>,
        transport: Arc<dyn Transport>,
        ack_sink: Arc<dyn AckSink>,
        session_invalidator: Arc<dyn SessionInvalidator>,
        limiter: TokenBucketLimiter,
        breakers: BreakerRegistry,
        retry: RetryPolicy,
        config: DispatchConfig,
    ) -> Self {
        Self {
            queue,
            transport,
            ack_sink,
            session_invalidator,
            limiter,
            breakers,
            retry,
            config,
        }
    }

    pub fn queue(&self) -> Arc<DispatchQueue> {
        Arc::clone(&self.queue)
    }

    /// Spawn the drain loop onto the runtime.
    pub fn spawn(self) -> DispatcherHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let queue = Arc::clone(&self.queue);

        let join = tokio::spawn(async move {
            self.run(shutdown_rx).await;
        });

        DispatcherHandle {
            queue,
            shutdown_tx,
            join,
        }
    }

    async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(admission_enabled = self.config.admission_enabled, "dispatcher started");
        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let head = tokio::select! {
                _ = shutdown_rx.changed() => continue,
                head = self.queue.next_ready() => head,
            };

            self.process(head, &mut shutdown_rx).await;
        }
        info!("dispatcher stopped");
    }

    async fn process(&mut self, head: Job, shutdown_rx: &mut watch::Receiver<bool>) {
        let id = head.id.clone();
        let next_attempt = head.next_attempt();

        // Ack once per attempt, before admission and before the call, so
        // the caller learns the job was accepted even when no result
        // exists yet. Deferrals must not re-emit it.
        if head.acked_attempt < next_attempt {
            self.emit(AckEvent::ack(id.clone(), next_attempt)).await;
            self.queue.note_acked(&id, next_attempt).await;
        }

        if self.config.admission_enabled {
            if !self.admit_throttle(&head, shutdown_rx).await {
                return; // cancelled or shutting down while deferred
            }

            let dependency = self.transport.dependency().to_string();
            if !self.breakers.try_acquire(&dependency) {
                self.fail_fast_circuit_open(&head, &dependency).await;
                return;
            }
        }

        // Cancelled while waiting for admission: drop without an attempt.
        // The breaker slot acquired above must be handed back, or a
        // half-open probe would leak and wedge the breaker.
        let Some(attempt) = self.queue.start_attempt(&id).await else {
            if self.config.admission_enabled {
                self.breakers.release(self.transport.dependency());
            }
            debug!(%id, "head job no longer queued, skipping");
            return;
        };

        let started = std::time::Instant::now();
        let result = tokio::time::timeout(self.config.call_timeout, self.transport.send(&head))
            .await
            .unwrap_or_else(|_| {
                Err(TransportFailure::new(
                    "TIMEOUT",
                    format!(
                        "external call exceeded {}ms",
                        self.config.call_timeout.as_millis()
                    ),
                ))
            });
        let duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(payload) => self.handle_success(&head, attempt, duration_ms, payload).await,
            Err(raw) => self.handle_failure(&head, attempt, duration_ms, raw).await,
        }
    }

    /// Token bucket admission with fixed-delay deferral at the head.
    /// Returns false when the job went away or shutdown was requested.
    async fn admit_throttle(
        &mut self,
        head: &Job,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> bool {
        loop {
            let admission = self.limiter.try_take(&head.category, 1.0);
            if admission.allowed {
                return true;
            }

            debug!(
                id = %head.id,
                category = %head.category,
                remaining = ?admission.remaining,
                "throttled, deferring head job"
            );
            tokio::time::sleep(self.config.throttle_deferral).await;

            if *shutdown_rx.borrow() {
                return false;
            }
            match self.queue.job(&head.id).await {
                Some(job) if job.status == JobStatus::Queued => continue,
                _ => return false, // cancelled out from under us
            }
        }
    }

    /// Open circuit: report a retryable CIRCUIT_OPEN result (so callers
    /// can tell "we chose not to call" from "we called and it failed")
    /// and re-insert at the tail. No attempt is burned, nothing is
    /// classified.
    async fn fail_fast_circuit_open(&mut self, head: &Job, dependency: &str) {
        warn!(id = %head.id, dependency, "circuit open, failing fast");

        let error = AttemptError {
            code: "CIRCUIT_OPEN".to_string(),
            message: format!("circuit open for dependency '{dependency}'"),
            retryable: true,
            meta: None,
        };
        self.emit(AckEvent::error(
            head.id.clone(),
            head.attempt,
            0,
            false,
            error,
        ))
        .await;

        let delay = self.retry.next_delay(head.next_attempt());
        self.queue.defer(&head.id, delay).await;
    }

    async fn handle_success(
        &mut self,
        head: &Job,
        attempt: u32,
        duration_ms: u64,
        payload: serde_json::Value,
    ) {
        if self.config.admission_enabled {
            self.breakers.on_success(self.transport.dependency());
        }

        self.queue.complete_success(&head.id).await;
        debug!(id = %head.id, attempt, duration_ms, "dispatch succeeded");
        self.emit(
            AckEvent::success(head.id.clone(), attempt, duration_ms, payload)
                .with_bypassed(!self.config.admission_enabled),
        )
        .await;
    }

    async fn handle_failure(
        &mut self,
        head: &Job,
        attempt: u32,
        duration_ms: u64,
        raw: TransportFailure,
    ) {
        let failure = classify(&raw);
        warn!(
            id = %head.id,
            attempt,
            kind = failure.kind.code(),
            retryable = failure.retryable(),
            "dispatch attempt failed: {}",
            failure.message
        );

        if self.config.admission_enabled {
            self.breakers.on_failure(self.transport.dependency());

            // A terminal, non-retryable failure likely indicates a
            // caller-side condition unrelated to throttling; don't let it
            // keep consuming future budget.
            if !failure.retryable() {
                self.limiter.reset(&head.category);
            }
            if failure.kind == FailureKind::RateLimited && self.config.shrink_on_rate_limited {
                self.limiter.penalize(&head.category);
            }
        }

        if failure.kind == FailureKind::AuthRequired {
            // Fire-and-forget side channel; a failing invalidator is
            // logged and discarded, never part of the job's outcome.
            let invalidator = Arc::clone(&self.session_invalidator);
            tokio::spawn(async move {
                if let Err(e) = invalidator.invalidate_session().await {
                    warn!("session invalidation failed: {e}");
                }
            });
        }

        let error = AttemptError::from(&failure);
        if self.retry.should_retry(&failure, attempt) {
            let delay = self.retry.next_delay(attempt);
            debug!(id = %head.id, attempt, ?delay, "scheduling retry");
            self.emit(
                AckEvent::error(head.id.clone(), attempt, duration_ms, false, error)
                    .with_bypassed(!self.config.admission_enabled),
            )
            .await;
            self.queue
                .schedule_retry(&head.id, delay, &failure.message)
                .await;
        } else {
            self.queue.complete_failure(&head.id, &failure.message).await;
            self.emit(
                AckEvent::error(head.id.clone(), attempt, duration_ms, true, error)
                    .with_bypassed(!self.config.admission_enabled),
            )
            .await;
        }
    }

    /// Deliver one acknowledgement event. Sink failures are logged and
    /// discarded; they never corrupt the job's own outcome.
    async fn emit(&self, event: AckEvent) {
        if let Err(e) = self.ack_sink.emit(event).await {
            warn!("ack sink failed: {e}");
        }
    }
}
