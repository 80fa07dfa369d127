//! Acknowledgement protocol: events the core reports back to the caller.
//!
//! Two event shapes, per attempt:
//! - `ack`: the job was accepted for processing (sent once per attempt,
//!   before the external call executes).
//! - `result`: the outcome of one attempt. `terminal` marks the exactly-once
//!   final outcome; non-terminal error results mean a retry is scheduled.

use serde::{Deserialize, Serialize};

use super::failure::Failure;
use super::ids::JobId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Success,
    Error,
}

/// Error half of a result event: `{code, message, retryable, meta}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptError {
    pub code: String,
    pub message: String,
    pub retryable: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

impl From<&Failure> for AttemptError {
    fn from(f: &Failure) -> Self {
        Self {
            code: f.kind.code().to_string(),
            message: f.message.clone(),
            retryable: f.retryable(),
            meta: f.meta.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AckEvent {
    /// Accepted for processing; `attempt` is the attempt about to run.
    Ack { id: JobId, attempt: u32 },

    Result {
        id: JobId,
        status: ResultStatus,
        attempt: u32,
        duration_ms: u64,

        /// True for the exactly-once final outcome of the job.
        terminal: bool,

        /// Set when admission control was disabled by the feature flag.
        /// Never reported silently.
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        bypassed: bool,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<serde_json::Value>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<AttemptError>,
    },
}

impl AckEvent {
    pub fn ack(id: JobId, attempt: u32) -> Self {
        AckEvent::Ack { id, attempt }
    }

    pub fn success(id: JobId, attempt: u32, duration_ms: u64, payload: serde_json::Value) -> Self {
        AckEvent::Result {
            id,
            status: ResultStatus::Success,
            attempt,
            duration_ms,
            terminal: true,
            bypassed: false,
            payload: Some(payload),
            error: None,
        }
    }

    pub fn error(
        id: JobId,
        attempt: u32,
        duration_ms: u64,
        terminal: bool,
        error: AttemptError,
    ) -> Self {
        AckEvent::Result {
            id,
            status: ResultStatus::Error,
            attempt,
            duration_ms,
            terminal,
            bypassed: false,
            payload: None,
            error: Some(error),
        }
    }

    pub fn with_bypassed(mut self, value: bool) -> Self {
        if let AckEvent::Result { bypassed, .. } = &mut self {
            *bypassed = value;
        }
        self
    }

    pub fn job_id(&self) -> &JobId {
        match self {
            AckEvent::Ack { id, .. } | AckEvent::Result { id, .. } => id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AckEvent::Result { terminal: true, .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::failure::{TransportFailure, classify};

    #[test]
    fn ack_event_shape() {
        let e = AckEvent::ack(JobId::new("j1"), 2);
        let v = serde_json::to_value(&e).unwrap();
        assert_eq!(v["event"], "ack");
        assert_eq!(v["id"], "j1");
        assert_eq!(v["attempt"], 2);
    }

    #[test]
    fn success_result_is_terminal_and_carries_payload() {
        let e = AckEvent::success(JobId::new("j1"), 1, 42, serde_json::json!({"sent": true}));
        assert!(e.is_terminal());

        let v = serde_json::to_value(&e).unwrap();
        assert_eq!(v["event"], "result");
        assert_eq!(v["status"], "success");
        assert_eq!(v["duration_ms"], 42);
        assert_eq!(v["payload"]["sent"], true);
        assert!(v.get("error").is_none());
        // bypassed=false is omitted from the wire shape
        assert!(v.get("bypassed").is_none());
    }

    #[test]
    fn error_result_carries_classified_failure() {
        let failure = classify(&TransportFailure::new("429", "slow down"));
        let e = AckEvent::error(JobId::new("j1"), 3, 10, false, AttemptError::from(&failure));
        assert!(!e.is_terminal());

        let v = serde_json::to_value(&e).unwrap();
        assert_eq!(v["error"]["code"], "RATE_LIMITED");
        assert_eq!(v["error"]["retryable"], true);
        assert_eq!(v["terminal"], false);
    }

    #[test]
    fn bypassed_flag_is_explicit_on_the_wire() {
        let e = AckEvent::success(JobId::new("j1"), 1, 0, serde_json::json!({}))
            .with_bypassed(true);
        let v = serde_json::to_value(&e).unwrap();
        assert_eq!(v["bypassed"], true);
    }
}
