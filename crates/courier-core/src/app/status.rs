use serde::{Deserialize, Serialize};

/// Job counts by status, for observability endpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatchCounts {
    pub queued: usize,
    pub dispatching: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
}
