//! Error types for the dispatch pipeline.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for dispatch operations.
pub type Result<T> = std::result::Result<T, DispatchError>;

/// Error conditions raised by the dispatch pipeline.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Storage operation failed.
    #[error("storage error: {0}")]
    Storage(#[from] airqod_core::CoreError),

    /// Pipeline configuration is unusable.
    #[error("invalid dispatch configuration: {message}")]
    Configuration {
        /// Configuration error detail.
        message: String,
    },

    /// The work channel closed while the pipeline was running.
    #[error("dispatch channel closed unexpectedly")]
    ChannelClosed,

    /// A consumer task panicked.
    #[error("dispatch worker {worker_id} panicked: {error}")]
    WorkerPanic {
        /// Index of the panicked worker.
        worker_id: usize,
        /// Join error description.
        error: String,
    },

    /// Graceful shutdown did not complete in time.
    #[error("shutdown timed out after {timeout:?}")]
    ShutdownTimeout {
        /// The timeout that elapsed.
        timeout: Duration,
    },
}

impl DispatchError {
    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }
}
