use async_trait::async_trait;
use thiserror::Error;

use crate::switchbot::Reading;

/// Readings produced by one scan cycle, in discovery order.
pub type Batch = Vec<Reading>;

#[derive(Debug, Error)]
pub enum ScanError {
    /// The scanner cannot work at all, e.g. no Bluetooth adapter.
    #[error("Bluetooth scanner unavailable")]
    Unavailable(#[source] anyhow::Error),

    #[error("scan cycle failed")]
    Failed(#[source] anyhow::Error),
}

impl ScanError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ScanError::Failed(_))
    }
}

/// Pull interface over a possibly infinite producer of batches.
///
/// `Ok(None)` means the producer had nothing this time; callers decide
/// whether to ask again. The relay waits [`crate::relay::IDLE_DELAY`]
/// before asking again after `Ok(None)` or an empty batch, so
/// implementations do not need to pace themselves to avoid a busy loop.
#[async_trait]
pub trait Scanner: Send {
    async fn next_batch(&mut self) -> Result<Option<Batch>, ScanError>;

    async fn stop(&mut self) -> Result<(), ScanError> {
        Ok(())
    }
}
