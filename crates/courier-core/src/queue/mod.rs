//! Dispatch queue: retry policy and the in-memory ordered buffer.

mod memory;
mod retry;

pub use memory::{DispatchQueue, HeadJob};
pub use retry::RetryPolicy;
