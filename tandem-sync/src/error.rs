//! Error types for the sync layer.

use tandem_storage::StorageError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Network error.
    #[error("network error: {0}")]
    Network(String),

    /// Protocol error (invalid message format).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// The runtime lacks the peer-to-peer transport capability.
    #[error("peer transport unsupported: {0}")]
    Unsupported(String),

    /// Timeout.
    #[error("{operation} timed out")]
    Timeout { operation: &'static str },

    /// Channel closed.
    #[error("channel closed")]
    ChannelClosed,

    /// No open channel to the peer.
    #[error("peer not connected: {0}")]
    PeerNotFound(String),

    /// The session was used before `initialize`.
    #[error("transport session not initialized")]
    NotInitialized,

    /// A store's merge handler failed.
    #[error("merge failed for {store}: {message}")]
    Merge { store: String, message: String },

    /// A blocking task panicked or was cancelled.
    #[error("background task failed: {0}")]
    Task(String),

    /// Invalid store registration.
    #[error("registry error: {0}")]
    Registry(String),
}
