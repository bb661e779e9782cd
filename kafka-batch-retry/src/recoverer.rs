use async_trait::async_trait;

use crate::error::RecoveryError;

/// Where records go once their batch has exhausted its retries.
#[async_trait]
pub trait Recoverer<R>: Send + Sync {
    /// Durably record `record` as failed with `cause`. Errors abort the batch and are not retried.
    async fn recover(&self, record: &R, cause: &anyhow::Error) -> Result<(), RecoveryError>;
}
