//! Failure taxonomy and classification.
//!
//! The classifier is a pure function from a raw transport failure to a
//! typed `Failure`. Classification is by structural signal first (an
//! explicit code supplied by the collaborator); pattern matching on the
//! message is a best-effort fallback only, not authoritative.
//!
//! Side effects triggered by a kind (session invalidation, bucket reset)
//! belong to the dispatcher, never to this module.

use serde::{Deserialize, Serialize};

/// Raw failure as reported by a transport adapter.
///
/// `code` is the structured signal (HTTP status, platform error code, ...).
/// `meta` is carried through to the result event untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportFailure {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

impl TransportFailure {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            message: message.into(),
            meta: None,
        }
    }

    /// A failure with no structured code (message-pattern fallback applies).
    pub fn unstructured(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
            meta: None,
        }
    }

    pub fn with_meta(mut self, meta: serde_json::Value) -> Self {
        self.meta = Some(meta);
        self
    }
}

/// Closed taxonomy of dispatch failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    /// Session/credential invalid. Terminal for the dispatcher; triggers
    /// session invalidation as a side effect.
    AuthRequired,

    /// The downstream itself rejected due to its own limits. Retryable.
    RateLimited,

    Timeout,

    Network,

    /// The payload itself is invalid; retrying will not help.
    BadRequest,

    /// Conservative default: retryable.
    Unknown,
}

impl FailureKind {
    pub fn retryable(self) -> bool {
        match self {
            FailureKind::RateLimited
            | FailureKind::Timeout
            | FailureKind::Network
            | FailureKind::Unknown => true,
            FailureKind::AuthRequired | FailureKind::BadRequest => false,
        }
    }

    /// Stable wire code for result events.
    pub fn code(self) -> &'static str {
        match self {
            FailureKind::AuthRequired => "AUTH_REQUIRED",
            FailureKind::RateLimited => "RATE_LIMITED",
            FailureKind::Timeout => "TIMEOUT",
            FailureKind::Network => "NETWORK",
            FailureKind::BadRequest => "BAD_REQUEST",
            FailureKind::Unknown => "UNKNOWN",
        }
    }
}

/// Typed outcome of one failed attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

impl Failure {
    pub fn retryable(&self) -> bool {
        self.kind.retryable()
    }
}

/// Map a raw transport failure into the closed taxonomy.
pub fn classify(raw: &TransportFailure) -> Failure {
    let kind = match raw.code.as_deref() {
        Some(code) => classify_code(code),
        None => None,
    }
    // Fallback: substring matching on the message. Best-effort only —
    // collaborators that care should send a structured code.
    .unwrap_or_else(|| classify_message(&raw.message));

    Failure {
        kind,
        message: raw.message.clone(),
        meta: raw.meta.clone(),
    }
}

fn classify_code(code: &str) -> Option<FailureKind> {
    let kind = match code {
        "AUTH_REQUIRED" | "SESSION_INVALID" | "401" | "403" => FailureKind::AuthRequired,
        "RATE_LIMITED" | "429" => FailureKind::RateLimited,
        "TIMEOUT" | "408" | "504" => FailureKind::Timeout,
        "NETWORK" | "502" | "503" | "ECONNRESET" | "ECONNREFUSED" => FailureKind::Network,
        "BAD_REQUEST" | "400" | "422" => FailureKind::BadRequest,
        _ => return None,
    };
    Some(kind)
}

fn classify_message(message: &str) -> FailureKind {
    let m = message.to_ascii_lowercase();
    if m.contains("timeout") || m.contains("timed out") {
        FailureKind::Timeout
    } else if m.contains("rate limit") || m.contains("too many requests") {
        FailureKind::RateLimited
    } else if m.contains("unauthorized") || m.contains("session expired") || m.contains("logged out")
    {
        FailureKind::AuthRequired
    } else if m.contains("connection") || m.contains("network") || m.contains("socket") {
        FailureKind::Network
    } else {
        FailureKind::Unknown
    }
}
