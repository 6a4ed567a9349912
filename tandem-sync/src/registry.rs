//! Store registry and per-store merge policies.
//!
//! Stores are injected as handles implementing [`SyncStore`], each paired
//! with the [`SyncPolicy`] the merger applies to incoming slices.

use crate::error::{SyncError, SyncResult};
use crate::merge::RecordMerge;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tandem_storage::DomainStore;
use tandem_types::{StoreName, Timestamp};
use tracing::debug;

/// The capabilities sync needs from a domain store.
pub trait SyncStore: Send + Sync {
    /// Whether the user opted this store into sync.
    fn is_sync_enabled(&self) -> bool;

    /// When the store's domain data last changed.
    fn last_updated(&self) -> Option<Timestamp>;

    /// Current domain fields.
    fn domain_fields(&self) -> SyncResult<Map<String, Value>>;

    /// Overwrites the domain fields with data that arrived through sync.
    fn hydrate_from_sync(
        &self,
        fields: Map<String, Value>,
        last_updated: Option<Timestamp>,
    ) -> SyncResult<()>;
}

impl SyncStore for DomainStore {
    fn is_sync_enabled(&self) -> bool {
        DomainStore::is_sync_enabled(self)
    }

    fn last_updated(&self) -> Option<Timestamp> {
        DomainStore::last_updated(self)
    }

    fn domain_fields(&self) -> SyncResult<Map<String, Value>> {
        Ok(self.fields()?)
    }

    fn hydrate_from_sync(
        &self,
        fields: Map<String, Value>,
        last_updated: Option<Timestamp>,
    ) -> SyncResult<()> {
        Ok(self.replace_fields(fields, last_updated)?)
    }
}

/// A store-specific merge of a remote slice into local fields.
pub trait SliceMerge: Send + Sync {
    /// Returns the merged fields. Must not mutate either input.
    fn merge(
        &self,
        local: &Map<String, Value>,
        remote: &Map<String, Value>,
    ) -> SyncResult<Map<String, Value>>;
}

/// How incoming slices are applied to a store.
#[derive(Clone)]
pub enum SyncPolicy {
    /// Replace local fields whenever the remote slice carries data,
    /// regardless of either side's opt-in flag.
    AlwaysReplace,
    /// Replace local fields only when both sides opted in and the remote
    /// slice is strictly newer.
    GatedReplace,
    /// Both sides must opt in; fields are combined by a store-specific merge.
    CustomMerge(Arc<dyn SliceMerge>),
}

impl SyncPolicy {
    /// The policy a store gets unless the caller picks one.
    #[must_use]
    pub fn default_for(name: StoreName) -> Self {
        match name {
            StoreName::Tags | StoreName::CustomCategory => Self::AlwaysReplace,
            StoreName::Habits => Self::CustomMerge(Arc::new(RecordMerge::habits())),
            StoreName::Tasks => Self::CustomMerge(Arc::new(RecordMerge::tasks())),
            _ => Self::GatedReplace,
        }
    }
}

impl fmt::Debug for SyncPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlwaysReplace => f.write_str("AlwaysReplace"),
            Self::GatedReplace => f.write_str("GatedReplace"),
            Self::CustomMerge(_) => f.write_str("CustomMerge(..)"),
        }
    }
}

/// A store handle with its policy.
#[derive(Clone)]
pub struct RegisteredStore {
    pub store: Arc<dyn SyncStore>,
    pub policy: SyncPolicy,
}

/// The set of syncable stores known to this device.
#[derive(Default)]
pub struct StoreRegistry {
    stores: BTreeMap<StoreName, RegisteredStore>,
}

impl StoreRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a store with an explicit policy.
    ///
    /// Device-local stores and duplicate names are rejected.
    pub fn register(
        &mut self,
        name: StoreName,
        store: Arc<dyn SyncStore>,
        policy: SyncPolicy,
    ) -> SyncResult<()> {
        if name.is_device_local() {
            return Err(SyncError::Registry(format!(
                "{name} is device-local and cannot sync"
            )));
        }
        if self.stores.contains_key(&name) {
            return Err(SyncError::Registry(format!("{name} is already registered")));
        }
        debug!("Registered store {name} with {policy:?}");
        self.stores.insert(name, RegisteredStore { store, policy });
        Ok(())
    }

    /// Registers a store with [`SyncPolicy::default_for`].
    pub fn register_default(&mut self, name: StoreName, store: Arc<dyn SyncStore>) -> SyncResult<()> {
        self.register(name, store, SyncPolicy::default_for(name))
    }

    /// Returns a registered store.
    #[must_use]
    pub fn get(&self, name: StoreName) -> Option<&RegisteredStore> {
        self.stores.get(&name)
    }

    /// Iterates over stores in name order.
    pub fn iter(&self) -> impl Iterator<Item = (StoreName, &RegisteredStore)> {
        self.stores.iter().map(|(name, entry)| (*name, entry))
    }

    /// Registered store names in order.
    #[must_use]
    pub fn names(&self) -> Vec<StoreName> {
        self.stores.keys().copied().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.stores.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }
}
