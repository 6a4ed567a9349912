use pretty_assertions::assert_eq;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tandem_storage::{DomainStore, KeyValueStore, KvStore, StoreState};
use tandem_types::{StoreName, Timestamp};
use tempfile::TempDir;

fn fields(value: Value) -> Map<String, Value> {
    value.as_object().unwrap().clone()
}

// ── Defaults ──────────────────────────────────────────────────────

#[test]
fn new_store_is_opted_out_and_empty() {
    let store = DomainStore::in_memory(StoreName::Bills);
    assert!(!store.is_sync_enabled());
    assert_eq!(store.last_updated(), None);
    assert!(store.fields().unwrap().is_empty());
}

#[test]
fn state_serializes_with_camel_case_flags() {
    let state = StoreState {
        is_sync_enabled: true,
        last_updated: Some(Timestamp::from_millis(5)),
        fields: fields(json!({"bills": {}})),
    };
    let value = serde_json::to_value(&state).unwrap();
    assert_eq!(
        value,
        json!({"isSyncEnabled": true, "lastUpdated": 5, "fields": {"bills": {}}})
    );
}

// ── Mutation ──────────────────────────────────────────────────────

#[test]
fn replace_fields_sets_timestamp() {
    let store = DomainStore::in_memory(StoreName::Vault);
    store
        .replace_fields(fields(json!({"items": {"a": 1}})), Some(Timestamp::from_millis(42)))
        .unwrap();

    assert_eq!(store.last_updated(), Some(Timestamp::from_millis(42)));
    assert_eq!(store.fields().unwrap(), fields(json!({"items": {"a": 1}})));
}

#[test]
fn put_record_creates_collection_and_bumps_timestamp() {
    let store = DomainStore::in_memory(StoreName::Bills);
    store.put_record("bills", "b1", json!({"amount": 12})).unwrap();

    assert!(store.last_updated().is_some());
    assert_eq!(store.fields().unwrap(), fields(json!({"bills": {"b1": {"amount": 12}}})));
}

#[test]
fn put_record_rejects_non_object_collection() {
    let store = DomainStore::in_memory(StoreName::Tags);
    store.replace_fields(fields(json!({"tags": ["a", "b"]})), None).unwrap();

    assert!(store.put_record("tags", "x", json!(1)).is_err());
}

#[test]
fn remove_record_reports_presence() {
    let store = DomainStore::in_memory(StoreName::People);
    store.put_record("people", "p1", json!({"name": "Sam"})).unwrap();

    assert!(store.remove_record("people", "p1").unwrap());
    assert!(!store.remove_record("people", "p1").unwrap());
}

// ── Persistence ───────────────────────────────────────────────────

#[test]
fn state_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("stores.db");

    {
        let kv: Arc<dyn KeyValueStore> = Arc::new(KvStore::open(&path).unwrap());
        let store = DomainStore::open(StoreName::Habits, kv).unwrap();
        store.set_sync_enabled(true).unwrap();
        store.put_record("habits", "h1", json!({"name": "Run"})).unwrap();
    }

    let kv: Arc<dyn KeyValueStore> = Arc::new(KvStore::open(&path).unwrap());
    let store = DomainStore::open(StoreName::Habits, kv).unwrap();
    assert!(store.is_sync_enabled());
    assert_eq!(store.fields().unwrap(), fields(json!({"habits": {"h1": {"name": "Run"}}})));
}

#[test]
fn stores_do_not_share_keys() {
    let kv = Arc::new(KvStore::open_in_memory().unwrap());
    let bills = DomainStore::open(StoreName::Bills, kv.clone()).unwrap();
    let tasks = DomainStore::open(StoreName::Tasks, kv.clone()).unwrap();

    bills.set_sync_enabled(true).unwrap();
    tasks.set_sync_enabled(false).unwrap();
    assert!(bills.is_sync_enabled());
    assert!(!tasks.is_sync_enabled());
    assert_eq!(
        kv.keys_with_prefix("store/").unwrap(),
        vec!["store/bills".to_string(), "store/tasks".to_string()]
    );
}
