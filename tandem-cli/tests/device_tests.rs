use pretty_assertions::assert_eq;
use serde_json::json;
use tandem_cli::LocalDevice;
use tandem_types::StoreName;

// ── Identity ────────────────────────────────────────────────────

#[test]
fn device_id_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let first = LocalDevice::open(dir.path()).unwrap().device_id();
    let second = LocalDevice::open(dir.path()).unwrap().device_id();
    assert_eq!(first, second);
}

#[test]
fn reset_identity_yields_new_id_on_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let device = LocalDevice::open(dir.path()).unwrap();
    let before = device.device_id();
    device.reset_identity().unwrap();
    drop(device);

    let after = LocalDevice::open(dir.path()).unwrap().device_id();
    assert_ne!(before, after);
}

#[test]
fn open_creates_data_dir() {
    let dir = tempfile::tempdir().unwrap();
    let nested = dir.path().join("a").join("b");
    LocalDevice::open(&nested).unwrap();
    assert!(LocalDevice::database_path(&nested).exists());
}

// ── Stores ──────────────────────────────────────────────────────

#[test]
fn lists_every_syncable_store_opted_out() {
    let dir = tempfile::tempdir().unwrap();
    let device = LocalDevice::open(dir.path()).unwrap();

    let summaries = device.summaries();
    let names: Vec<_> = summaries.iter().map(|s| s.name).collect();
    assert_eq!(names, StoreName::SYNCABLE.to_vec());
    assert!(summaries.iter().all(|s| !s.is_sync_enabled && s.last_updated.is_none()));
}

#[test]
fn sync_preference_persists() {
    let dir = tempfile::tempdir().unwrap();
    LocalDevice::open(dir.path())
        .unwrap()
        .set_sync_enabled(StoreName::Bills, true)
        .unwrap();

    let device = LocalDevice::open(dir.path()).unwrap();
    let bills = device
        .summaries()
        .into_iter()
        .find(|s| s.name == StoreName::Bills)
        .unwrap();
    assert!(bills.is_sync_enabled);
}

#[test]
fn device_local_stores_are_refused() {
    let dir = tempfile::tempdir().unwrap();
    let device = LocalDevice::open(dir.path()).unwrap();

    for name in StoreName::DEVICE_LOCAL {
        assert!(device.set_sync_enabled(name, true).is_err());
        assert!(device.import_value(name, json!({})).is_err());
    }
}

// ── Import / export ─────────────────────────────────────────────

#[test]
fn import_replaces_fields_and_stamps_time() {
    let dir = tempfile::tempdir().unwrap();
    let device = LocalDevice::open(dir.path()).unwrap();
    let file = dir.path().join("bills.json");
    std::fs::write(
        &file,
        r#"{"bills": {"rent": {"amount": 1200}}, "isSyncEnabled": true, "lastUpdated": 1}"#,
    )
    .unwrap();

    device.import(StoreName::Bills, &file).unwrap();

    let fields = device.fields(StoreName::Bills).unwrap();
    assert_eq!(serde_json::Value::Object(fields), json!({"bills": {"rent": {"amount": 1200}}}));
    let summary = device
        .summaries()
        .into_iter()
        .find(|s| s.name == StoreName::Bills)
        .unwrap();
    assert!(summary.last_updated.unwrap().as_millis() > 1);
    // The reserved keys never toggle the preference.
    assert!(!summary.is_sync_enabled);
}

#[test]
fn import_rejects_non_objects() {
    let dir = tempfile::tempdir().unwrap();
    let device = LocalDevice::open(dir.path()).unwrap();
    assert!(device.import_value(StoreName::Tasks, json!([1, 2])).is_err());
}

#[test]
fn export_withholds_opted_out_data() {
    let dir = tempfile::tempdir().unwrap();
    let device = LocalDevice::open(dir.path()).unwrap();
    device
        .import_value(StoreName::Vault, json!({"vault": {"pin": "1234"}}))
        .unwrap();
    device
        .import_value(StoreName::Bills, json!({"bills": {"rent": {}}}))
        .unwrap();
    device.set_sync_enabled(StoreName::Bills, true).unwrap();

    let snapshot = serde_json::to_value(device.export().unwrap()).unwrap();
    assert_eq!(snapshot["vault"], json!({"isSyncEnabled": false}));
    assert_eq!(snapshot["bills"]["bills"], json!({"rent": {}}));
    assert_eq!(snapshot["bills"]["isSyncEnabled"], json!(true));
    assert!(snapshot.get("notes").is_none());
}
