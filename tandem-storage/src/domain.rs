//! Per-domain JSON stores.
//!
//! Each store owns one JSON object of domain fields (for example
//! `{"bills": {"<id>": {...}}}`) plus the two pieces of metadata sync cares
//! about: the user's `isSyncEnabled` opt-in and the `lastUpdated` timestamp.

use crate::error::{StorageError, StorageResult};
use crate::kv::KeyValueStore;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::{Arc, RwLock};
use tandem_types::{StoreName, Timestamp};
use tracing::debug;

/// Key prefix under which store blobs are persisted.
pub const STORE_KEY_PREFIX: &str = "store/";

/// Full persisted state of a domain store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreState {
    /// Whether the user opted this store into sync. Defaults to off.
    #[serde(default)]
    pub is_sync_enabled: bool,
    /// When the domain fields last changed, locally or through sync.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<Timestamp>,
    /// Domain payload. Shape is owned by the store's feature.
    #[serde(default)]
    pub fields: Map<String, Value>,
}

/// A domain store held in memory and written through to key-value storage.
pub struct DomainStore {
    name: StoreName,
    backend: Option<Arc<dyn KeyValueStore>>,
    state: RwLock<StoreState>,
}

impl std::fmt::Debug for DomainStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DomainStore")
            .field("name", &self.name)
            .field("persistent", &self.backend.is_some())
            .finish_non_exhaustive()
    }
}

impl DomainStore {
    /// Opens a store, loading its persisted state if any.
    pub fn open(name: StoreName, backend: Arc<dyn KeyValueStore>) -> StorageResult<Self> {
        let state = match backend.get(&Self::key(name))? {
            Some(raw) => serde_json::from_str(&raw)?,
            None => StoreState::default(),
        };
        debug!("Opened store {} (sync enabled: {})", name, state.is_sync_enabled);
        Ok(Self {
            name,
            backend: Some(backend),
            state: RwLock::new(state),
        })
    }

    /// Creates a store that is never persisted (for testing).
    #[must_use]
    pub fn in_memory(name: StoreName) -> Self {
        Self::with_state(name, StoreState::default())
    }

    /// Creates a non-persistent store with the given initial state.
    #[must_use]
    pub fn with_state(name: StoreName, state: StoreState) -> Self {
        Self {
            name,
            backend: None,
            state: RwLock::new(state),
        }
    }

    /// The storage key for a store.
    #[must_use]
    pub fn key(name: StoreName) -> String {
        format!("{STORE_KEY_PREFIX}{name}")
    }

    /// Returns the store's name.
    #[must_use]
    pub fn name(&self) -> StoreName {
        self.name
    }

    /// Returns a copy of the full state.
    pub fn state(&self) -> StorageResult<StoreState> {
        Ok(self.read()?.clone())
    }

    /// Returns a copy of the domain fields.
    pub fn fields(&self) -> StorageResult<Map<String, Value>> {
        Ok(self.read()?.fields.clone())
    }

    /// Whether the user opted this store into sync.
    ///
    /// A poisoned lock reads as "not enabled".
    #[must_use]
    pub fn is_sync_enabled(&self) -> bool {
        self.read().map(|s| s.is_sync_enabled).unwrap_or(false)
    }

    /// Returns the last-updated timestamp, if the store was ever written.
    #[must_use]
    pub fn last_updated(&self) -> Option<Timestamp> {
        self.read().ok().and_then(|s| s.last_updated)
    }

    /// Sets the sync opt-in preference.
    pub fn set_sync_enabled(&self, enabled: bool) -> StorageResult<()> {
        self.mutate(|state| state.is_sync_enabled = enabled)
    }

    /// Replaces the whole domain payload and sets `lastUpdated`.
    pub fn replace_fields(
        &self,
        fields: Map<String, Value>,
        last_updated: Option<Timestamp>,
    ) -> StorageResult<()> {
        self.mutate(|state| {
            state.fields = fields;
            state.last_updated = last_updated;
        })
    }

    /// Inserts or replaces one record in a keyed collection, stamping the
    /// store's `lastUpdated` with the current time.
    pub fn put_record(&self, collection: &str, id: &str, record: Value) -> StorageResult<()> {
        let mut state = self.write()?;
        let entry = state
            .fields
            .entry(collection.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        let Some(records) = entry.as_object_mut() else {
            return Err(StorageError::InvalidData(format!(
                "{}.{collection} is not a keyed collection",
                self.name
            )));
        };
        records.insert(id.to_string(), record);
        state.last_updated = Some(Timestamp::now());
        self.persist(&state)
    }

    /// Removes one record from a keyed collection. Returns whether it existed.
    pub fn remove_record(&self, collection: &str, id: &str) -> StorageResult<bool> {
        let mut state = self.write()?;
        let removed = state
            .fields
            .get_mut(collection)
            .and_then(Value::as_object_mut)
            .and_then(|records| records.remove(id))
            .is_some();
        if removed {
            state.last_updated = Some(Timestamp::now());
            self.persist(&state)?;
        }
        Ok(removed)
    }

    fn mutate(&self, f: impl FnOnce(&mut StoreState)) -> StorageResult<()> {
        let mut state = self.write()?;
        f(&mut state);
        self.persist(&state)
    }

    fn persist(&self, state: &StoreState) -> StorageResult<()> {
        if let Some(backend) = &self.backend {
            let raw = serde_json::to_string(state)?;
            backend.put(&Self::key(self.name), &raw)?;
        }
        Ok(())
    }

    fn read(&self) -> StorageResult<std::sync::RwLockReadGuard<'_, StoreState>> {
        self.state
            .read()
            .map_err(|_| StorageError::LockPoisoned("store state"))
    }

    fn write(&self) -> StorageResult<std::sync::RwLockWriteGuard<'_, StoreState>> {
        self.state
            .write()
            .map_err(|_| StorageError::LockPoisoned("store state"))
    }
}
