//! Domain model (ids, job record, failure taxonomy, ack events, errors).

pub mod errors;
pub mod events;
pub mod failure;
pub mod ids;
pub mod job;

pub use errors::CourierError;
pub use events::{AckEvent, AttemptError, ResultStatus};
pub use failure::{Failure, FailureKind, TransportFailure, classify};
pub use ids::{Category, JobId};
pub use job::{Job, JobStatus};
