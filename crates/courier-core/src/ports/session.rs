//! SessionInvalidator port - side channel for AUTH_REQUIRED failures.
//!
//! When the classifier reports an invalid session, the dispatcher tells
//! this collaborator to drop the cached session so the next login starts
//! clean. Fire-and-forget: failures are logged, never propagated.

use async_trait::async_trait;

#[async_trait]
pub trait SessionInvalidator: Send + Sync {
    async fn invalidate_session(&self) -> Result<(), String>;
}
