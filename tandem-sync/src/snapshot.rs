//! Store snapshots and the exporter that produces them.
//!
//! A snapshot maps store names to slices. A slice always carries the
//! sender's `isSyncEnabled` flag; domain fields are only ever present when
//! that flag is true.

use crate::registry::StoreRegistry;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tandem_types::{StoreName, Timestamp};
use tracing::{debug, warn};

/// Keys reserved for slice metadata; never allowed among domain fields.
const RESERVED_KEYS: [&str; 2] = ["isSyncEnabled", "lastUpdated"];

/// One store's contribution to a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSlice {
    /// Sender's opt-in flag for this store.
    #[serde(default)]
    pub is_sync_enabled: bool,
    /// When the sender exported the slice.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<Timestamp>,
    /// Domain payload (e.g. `bills`, `tasks`).
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl StoreSlice {
    /// A slice for an opted-out store: the flag and nothing else.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            is_sync_enabled: false,
            last_updated: None,
            fields: Map::new(),
        }
    }

    /// A slice for an opted-in store.
    #[must_use]
    pub fn enabled(last_updated: Timestamp, mut fields: Map<String, Value>) -> Self {
        for key in RESERVED_KEYS {
            fields.remove(key);
        }
        Self {
            is_sync_enabled: true,
            last_updated: Some(last_updated),
            fields,
        }
    }
}

/// A partial view of every syncable store, keyed by wire name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    slices: BTreeMap<String, StoreSlice>,
    /// Keys whose slice failed to parse and was dropped on the way in.
    invalid: Vec<String>,
}

impl Snapshot {
    /// Creates an empty snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a slice under a store name.
    pub fn insert(&mut self, name: StoreName, slice: StoreSlice) {
        self.slices.insert(name.as_str().to_string(), slice);
    }

    /// Inserts a slice under an arbitrary key.
    pub fn insert_raw(&mut self, key: impl Into<String>, slice: StoreSlice) {
        self.slices.insert(key.into(), slice);
    }

    /// Returns the slice for a store.
    #[must_use]
    pub fn get(&self, name: StoreName) -> Option<&StoreSlice> {
        self.slices.get(name.as_str())
    }

    /// Iterates over every slice in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &StoreSlice)> {
        self.slices.iter()
    }

    /// Returns the keys present, in order.
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.slices.keys()
    }

    /// Number of slices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slices.len()
    }

    /// Whether the snapshot has no slices.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    /// Keys whose slices were malformed when the snapshot was decoded.
    #[must_use]
    pub fn invalid_slices(&self) -> &[String] {
        &self.invalid
    }

    /// Removes device-local stores, returning the keys that were removed.
    pub fn strip_device_local(&mut self) -> Vec<String> {
        let local: Vec<String> = self
            .slices
            .keys()
            .filter(|key| {
                key.parse::<StoreName>()
                    .is_ok_and(|name| name.is_device_local())
            })
            .cloned()
            .collect();
        for key in &local {
            self.slices.remove(key);
        }
        local
    }
}

impl Serialize for Snapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.slices.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Snapshot {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = BTreeMap::<String, Value>::deserialize(deserializer)?;
        let mut snapshot = Snapshot::new();
        for (key, value) in raw {
            match serde_json::from_value::<StoreSlice>(value) {
                Ok(slice) => {
                    snapshot.slices.insert(key, slice);
                }
                Err(e) => {
                    warn!("Dropping malformed slice {key:?}: {e}");
                    snapshot.invalid.push(key);
                }
            }
        }
        Ok(snapshot)
    }
}

/// Builds outgoing snapshots from the registered stores.
pub struct SnapshotExporter {
    registry: Arc<StoreRegistry>,
}

impl SnapshotExporter {
    /// Creates an exporter over a registry.
    pub fn new(registry: Arc<StoreRegistry>) -> Self {
        Self { registry }
    }

    /// Exports the current state of every registered store.
    ///
    /// Opted-out stores export as `{ "isSyncEnabled": false }`. Device-local
    /// stores never appear.
    pub fn export_snapshot(&self) -> Snapshot {
        let now = Timestamp::now();
        let mut snapshot = Snapshot::new();

        for (name, entry) in self.registry.iter() {
            if !entry.store.is_sync_enabled() {
                snapshot.insert(name, StoreSlice::disabled());
                continue;
            }
            match entry.store.domain_fields() {
                Ok(fields) => snapshot.insert(name, StoreSlice::enabled(now, fields)),
                Err(e) => {
                    warn!("Could not read {name} for export, sending it as disabled: {e}");
                    snapshot.insert(name, StoreSlice::disabled());
                }
            }
        }

        let stripped = snapshot.strip_device_local();
        if !stripped.is_empty() {
            debug!("Stripped device-local stores from export: {stripped:?}");
        }
        snapshot
    }
}
