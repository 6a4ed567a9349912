use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse, process-wide sync status surfaced to the UI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// No sync in flight.
    #[default]
    Idle,
    /// A sync was initiated locally or a peer's request is being served.
    Syncing,
    /// The last user-initiated sync failed before it could start.
    Error,
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Syncing => "syncing",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}
