//! Domain identifiers.
//!
//! `JobId` is opaque: callers may supply their own id (which is what makes
//! resubmission idempotent), or ask Courier to mint one. Minted ids are
//! ULIDs, so they sort by creation time with no coordination.
//!
//! `Category` is the rate-limit key (job type, recipient, ...). It is a
//! plain string newtype so the core stays agnostic about what callers key
//! their quotas on.

use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Identity of a job: dedup key and acknowledgement correlation key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Mint a fresh id (ULID, lowercased prefix for readability in logs).
    pub fn generate() -> Self {
        Self(format!("job-{}", Ulid::new()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Rate-limit key. Categories absent from the limiter config are unthrottled.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Category(String);

impl Category {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for Category {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}
