//! Wall-clock timestamps in milliseconds since the Unix epoch.
//!
//! Conflict resolution is last-writer-wins on these values, so they are kept
//! as plain milliseconds to match what every peer puts on the wire.

use crate::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The epoch itself. Used as the stand-in for "never updated".
    pub const ZERO: Timestamp = Timestamp(0);

    /// Returns the current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        Self(u64::try_from(millis).unwrap_or(u64::MAX))
    }

    /// Creates a timestamp from milliseconds.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Returns the milliseconds since the epoch.
    #[must_use]
    pub const fn as_millis(&self) -> u64 {
        self.0
    }

    /// Parses an RFC 3339 date-time (e.g. `2024-01-02T03:04:05.000Z`).
    pub fn parse_rfc3339(s: &str) -> Result<Self, Error> {
        let parsed = chrono::DateTime::parse_from_rfc3339(s)
            .map_err(|e| Error::InvalidTimestamp(format!("{s}: {e}")))?;
        let millis = u64::try_from(parsed.timestamp_millis())
            .map_err(|_| Error::InvalidTimestamp(format!("{s}: before the Unix epoch")))?;
        Ok(Self(millis))
    }

    /// Milliseconds elapsed from `earlier` to `self`, saturating at zero.
    #[must_use]
    pub const fn saturating_since(&self, earlier: Timestamp) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl From<u64> for Timestamp {
    fn from(millis: u64) -> Self {
        Self(millis)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
