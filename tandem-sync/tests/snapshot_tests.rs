use proptest::prelude::*;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use tandem_storage::{DomainStore, StoreState};
use tandem_sync::{
    Snapshot, SnapshotExporter, StoreRegistry, StoreSlice, SyncError, SyncResult, SyncStore,
};
use tandem_types::{StoreName, Timestamp};

fn fields(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

fn store(name: StoreName, enabled: bool, data: Value) -> Arc<DomainStore> {
    Arc::new(DomainStore::with_state(
        name,
        StoreState {
            is_sync_enabled: enabled,
            last_updated: Some(Timestamp::from_millis(100)),
            fields: fields(data),
        },
    ))
}

/// Opted in, but its data cannot be read.
struct UnreadableStore;

impl SyncStore for UnreadableStore {
    fn is_sync_enabled(&self) -> bool {
        true
    }

    fn last_updated(&self) -> Option<Timestamp> {
        None
    }

    fn domain_fields(&self) -> SyncResult<Map<String, Value>> {
        Err(SyncError::Registry("unreadable".into()))
    }

    fn hydrate_from_sync(&self, _: Map<String, Value>, _: Option<Timestamp>) -> SyncResult<()> {
        Ok(())
    }
}

// ── Export ──────────────────────────────────────────────────────

#[test]
fn enabled_store_exports_fields_with_timestamp() {
    let mut registry = StoreRegistry::new();
    registry
        .register_default(StoreName::Bills, store(StoreName::Bills, true, json!({"bills": {"b1": {"amount": 5}}})))
        .unwrap();

    let before = Timestamp::now();
    let snapshot = SnapshotExporter::new(Arc::new(registry)).export_snapshot();
    let slice = snapshot.get(StoreName::Bills).unwrap();

    assert!(slice.is_sync_enabled);
    assert!(slice.last_updated.unwrap() >= before);
    assert_eq!(slice.fields["bills"], json!({"b1": {"amount": 5}}));
}

#[test]
fn disabled_store_exports_flag_only() {
    let mut registry = StoreRegistry::new();
    registry
        .register_default(StoreName::Vault, store(StoreName::Vault, false, json!({"vault": {"secret": 1}})))
        .unwrap();

    let snapshot = SnapshotExporter::new(Arc::new(registry)).export_snapshot();
    assert_eq!(snapshot.get(StoreName::Vault), Some(&StoreSlice::disabled()));

    let wire = serde_json::to_value(&snapshot).unwrap();
    assert_eq!(wire, json!({"vault": {"isSyncEnabled": false}}));
}

#[test]
fn unreadable_store_exports_as_disabled() {
    let mut registry = StoreRegistry::new();
    registry
        .register_default(StoreName::People, Arc::new(UnreadableStore))
        .unwrap();
    registry
        .register_default(StoreName::Bills, store(StoreName::Bills, true, json!({"bills": {}})))
        .unwrap();

    let snapshot = SnapshotExporter::new(Arc::new(registry)).export_snapshot();
    assert_eq!(snapshot.get(StoreName::People), Some(&StoreSlice::disabled()));
    assert!(snapshot.get(StoreName::Bills).unwrap().is_sync_enabled);
}

#[test]
fn every_registered_store_appears() {
    let mut registry = StoreRegistry::new();
    for name in StoreName::SYNCABLE {
        registry.register_default(name, store(name, name == StoreName::Tags, json!({}))).unwrap();
    }

    let snapshot = SnapshotExporter::new(Arc::new(registry)).export_snapshot();
    assert_eq!(snapshot.len(), StoreName::SYNCABLE.len());
    for name in StoreName::DEVICE_LOCAL {
        assert!(snapshot.get(name).is_none());
    }
}

#[test]
fn reserved_keys_never_leak_into_fields() {
    let slice = StoreSlice::enabled(
        Timestamp::from_millis(9),
        fields(json!({"isSyncEnabled": false, "lastUpdated": 1, "bills": {}})),
    );
    assert!(slice.is_sync_enabled);
    assert_eq!(slice.last_updated, Some(Timestamp::from_millis(9)));
    assert_eq!(slice.fields.keys().collect::<Vec<_>>(), ["bills"]);
}

// ── Device-local stripping ──────────────────────────────────────

#[test]
fn strip_removes_device_local_keys_only() {
    let mut snapshot = Snapshot::new();
    snapshot.insert(StoreName::User, StoreSlice::enabled(Timestamp::ZERO, Map::new()));
    snapshot.insert(StoreName::Notes, StoreSlice::disabled());
    snapshot.insert(StoreName::Bills, StoreSlice::disabled());
    snapshot.insert_raw("futureStore", StoreSlice::disabled());

    let mut stripped = snapshot.strip_device_local();
    stripped.sort();

    assert_eq!(stripped, ["notes", "user"]);
    assert_eq!(snapshot.keys().collect::<Vec<_>>(), ["bills", "futureStore"]);
}

// ── Confidentiality ─────────────────────────────────────────────

proptest! {
    #[test]
    fn opted_out_stores_never_carry_data(
        flags in proptest::collection::vec(any::<bool>(), StoreName::SYNCABLE.len()),
        amount in any::<u32>(),
    ) {
        let mut registry = StoreRegistry::new();
        for (name, enabled) in StoreName::SYNCABLE.iter().zip(&flags) {
            let mut data = Map::new();
            data.insert(name.as_str().to_string(), json!({"r1": {"amount": amount}}));
            registry.register_default(*name, store(*name, *enabled, Value::Object(data))).unwrap();
        }

        let snapshot = SnapshotExporter::new(Arc::new(registry)).export_snapshot();
        let wire = serde_json::to_value(&snapshot).unwrap();

        for (name, enabled) in StoreName::SYNCABLE.iter().zip(&flags) {
            let slice = &wire[name.as_str()];
            prop_assert_eq!(&slice["isSyncEnabled"], &json!(*enabled));
            if *enabled {
                prop_assert!(slice.get(name.as_str()).is_some());
            } else {
                prop_assert_eq!(slice, &json!({"isSyncEnabled": false}));
            }
        }
    }
}
