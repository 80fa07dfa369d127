//! Library error type.

use thiserror::Error;

use super::ids::JobId;

#[derive(Debug, Error)]
pub enum CourierError {
    #[error("job not found: {0}")]
    JobNotFound(JobId),

    #[error("job {0} is not cancellable in its current state")]
    NotCancellable(JobId),
}
