//! Error types for bridge transports.

use std::io;
use std::sync::Arc;

use thiserror::Error;

/// Failures while starting or driving a bridge session.
///
/// I/O errors are wrapped in `Arc` so the error stays cheap to clone when it
/// is logged and reported from several places.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The bridge binary could not be located.
    #[error("bridge binary not found: {command}")]
    BridgeNotFound {
        /// The command that was not found.
        command: String,
        /// The underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },

    /// The bridge process could not be started.
    #[error("failed to spawn bridge process: {message}")]
    SpawnFailed {
        /// Description of the spawn failure.
        message: String,
        /// The underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },

    /// Reading from or writing to the bridge failed.
    #[error("bridge I/O error: {source}")]
    Io {
        /// The underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },

    /// The session was closed before the operation.
    #[error("bridge session is closed")]
    Closed,
}

impl TransportError {
    /// Whether the error means the bridge could not be started at all.
    #[must_use]
    pub const fn is_unavailable(&self) -> bool {
        matches!(self, Self::BridgeNotFound { .. } | Self::SpawnFailed { .. })
    }
}

impl From<io::Error> for TransportError {
    fn from(source: io::Error) -> Self {
        Self::Io {
            source: Arc::new(source),
        }
    }
}
