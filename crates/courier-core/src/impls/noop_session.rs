//! NoopSessionInvalidator - default when no session store is wired.

use async_trait::async_trait;

use crate::ports::SessionInvalidator;

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSessionInvalidator;

#[async_trait]
impl SessionInvalidator for NoopSessionInvalidator {
    async fn invalidate_session(&self) -> Result<(), String> {
        Ok(())
    }
}
