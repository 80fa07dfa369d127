//! Transport port - the external collaborator that actually performs a job.
//!
//! The core treats the downstream as opaque: it can succeed with a payload,
//! or fail with a raw `TransportFailure` that the classifier turns into a
//! typed outcome. Timeouts are enforced by the dispatcher, not here.

use async_trait::async_trait;

use crate::domain::{Job, TransportFailure};

/// Narrow interface to the downstream dependency (browser agent session,
/// platform API client, durable queue, ...).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform the job's external call once.
    ///
    /// Implementations should not retry internally; retries are the
    /// dispatcher's job, otherwise attempts are double-counted.
    async fn send(&self, job: &Job) -> Result<serde_json::Value, TransportFailure>;

    /// Key used to pick the circuit breaker guarding this dependency.
    fn dependency(&self) -> &str {
        "default"
    }
}
