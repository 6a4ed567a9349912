//! Core type definitions for Tandem.
//!
//! This crate defines the small set of types shared by every other crate:
//! - Device identifiers (UUID v4, persisted once per install)
//! - Millisecond wall-clock timestamps used for last-writer-wins
//! - The fixed enumeration of domain stores and which of them may sync
//! - The coarse sync status observed by the UI
//!
//! Domain record shapes (bills, habits, tasks, ...) are not modelled here;
//! the sync layer treats them as JSON.

mod ids;
mod status;
mod store;
mod timestamp;

pub use ids::DeviceId;
pub use status::SyncStatus;
pub use store::StoreName;
pub use timestamp::Timestamp;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("unknown store: {0}")]
    UnknownStore(String),
}
