pub mod backoff;
pub mod queue;

pub use backoff::{retry_if, RetryConfig};
pub use queue::{RetryCoordinator, RetryQueue, Retryable, WatchHandle};

use thiserror::Error;

/// Errors from the retry queue
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RetryError {
    #[error("Retry queue for {0} is closed")]
    Closed(String),
}
