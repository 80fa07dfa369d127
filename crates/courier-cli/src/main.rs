use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;

use courier_core::admission::RateLimitConfig;
use courier_core::app::DispatcherBuilder;
use courier_core::domain::{Category, Job, JobId, TransportFailure};
use courier_core::impls::MemoryAckSink;
use courier_core::ports::Transport;
use courier_core::queue::RetryPolicy;

/// Fake downstream: fails the first N calls with a network error, then
/// starts succeeding. Enough to watch retries and backoff in the logs.
struct FlakyTransport {
    remaining_failures: AtomicU32,
}

impl FlakyTransport {
    fn new(n: u32) -> Self {
        Self {
            remaining_failures: AtomicU32::new(n),
        }
    }
}

#[async_trait]
impl Transport for FlakyTransport {
    async fn send(&self, job: &Job) -> Result<serde_json::Value, TransportFailure> {
        let left = self.remaining_failures.load(Ordering::Relaxed);
        if left > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::Relaxed);
            return Err(TransportFailure::new(
                "NETWORK",
                format!("intentional failure (left={left})"),
            ));
        }
        Ok(serde_json::json!({ "delivered": job.id.as_str() }))
    }

    fn dependency(&self) -> &str {
        "demo-platform"
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,courier_core=debug".into()),
        )
        .init();

    // 環境フラグ: admission control を丸ごと無効化できる（結果には bypassed が付く）
    let admission_enabled = std::env::var("COURIER_ADMISSION_ENABLED")
        .map(|v| v != "0" && v.to_ascii_lowercase() != "false")
        .unwrap_or(true);

    let sink = Arc::new(MemoryAckSink::new());
    let dispatcher = DispatcherBuilder::new(Arc::new(FlakyTransport::new(2)))
        .ack_sink(sink.clone())
        .rate_limit(
            "dm",
            RateLimitConfig {
                quota_per_hour: 3600.0,
                burst: 5,
            },
        )
        .retry(RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(200),
            ..RetryPolicy::default()
        })
        .admission_enabled(admission_enabled)
        .build()
        .expect("valid demo configuration");

    let handle = dispatcher.spawn();
    let queue = handle.queue();
    tracing::info!(admission_enabled, "courier demo started");

    for i in 0..3 {
        let id = JobId::new(format!("demo-{i}"));
        queue
            .submit(
                id.clone(),
                Category::new("dm"),
                serde_json::json!({ "to": format!("fan-{i}"), "text": "hello" }),
            )
            .await;
        println!("submitted: {id}");
    }

    // Poll until everything is terminal.
    loop {
        let counts = queue.counts().await;
        if counts.queued == 0 && counts.dispatching == 0 {
            println!("final counts: {counts:?}");
            break;
        }
        sleep(Duration::from_millis(100)).await;
    }

    for event in sink.events().await {
        println!("event: {}", serde_json::to_string(&event).expect("serializable event"));
    }

    handle.shutdown_and_join().await;
}
