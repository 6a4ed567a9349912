//! The fixed set of domain stores known to the app.

use crate::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Name of a domain store. The wire form is the camelCase string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StoreName {
    Habits,
    Bills,
    Calendar,
    Tasks,
    Vault,
    People,
    CustomCategory,
    Tags,
    Projects,
    /// User preferences. Device-local.
    User,
    /// Notes may embed images. Device-local.
    Notes,
    /// Background image cache. Device-local.
    Wallpaper,
    /// Device-local.
    Crm,
}

impl StoreName {
    /// Stores that may appear in a snapshot.
    pub const SYNCABLE: [StoreName; 9] = [
        Self::Habits,
        Self::Bills,
        Self::Calendar,
        Self::Tasks,
        Self::Vault,
        Self::People,
        Self::CustomCategory,
        Self::Tags,
        Self::Projects,
    ];

    /// Stores that never leave the device, whatever their flags say.
    pub const DEVICE_LOCAL: [StoreName; 4] = [Self::User, Self::Notes, Self::Wallpaper, Self::Crm];

    /// Returns the wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Habits => "habits",
            Self::Bills => "bills",
            Self::Calendar => "calendar",
            Self::Tasks => "tasks",
            Self::Vault => "vault",
            Self::People => "people",
            Self::CustomCategory => "customCategory",
            Self::Tags => "tags",
            Self::Projects => "projects",
            Self::User => "user",
            Self::Notes => "notes",
            Self::Wallpaper => "wallpaper",
            Self::Crm => "crm",
        }
    }

    /// Whether this store is excluded from sync unconditionally.
    #[must_use]
    pub const fn is_device_local(&self) -> bool {
        matches!(self, Self::User | Self::Notes | Self::Wallpaper | Self::Crm)
    }
}

impl fmt::Display for StoreName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StoreName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::SYNCABLE
            .iter()
            .chain(Self::DEVICE_LOCAL.iter())
            .find(|name| name.as_str() == s)
            .copied()
            .ok_or_else(|| Error::UnknownStore(s.to_string()))
    }
}
