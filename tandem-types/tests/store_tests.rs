use tandem_types::{StoreName, SyncStatus, Timestamp};

// ── StoreName ─────────────────────────────────────────────────────

#[test]
fn wire_names_roundtrip() {
    for name in StoreName::SYNCABLE.iter().chain(StoreName::DEVICE_LOCAL.iter()) {
        let parsed: StoreName = name.as_str().parse().unwrap();
        assert_eq!(&parsed, name);
        let json = serde_json::to_string(name).unwrap();
        assert_eq!(json, format!("\"{}\"", name.as_str()));
    }
}

#[test]
fn custom_category_is_camel_case() {
    assert_eq!(StoreName::CustomCategory.as_str(), "customCategory");
    assert_eq!("customCategory".parse::<StoreName>().unwrap(), StoreName::CustomCategory);
}

#[test]
fn unknown_store_is_an_error() {
    assert!("spreadsheets".parse::<StoreName>().is_err());
    assert!("Habits".parse::<StoreName>().is_err());
}

#[test]
fn device_local_stores_are_never_syncable() {
    for name in StoreName::DEVICE_LOCAL {
        assert!(name.is_device_local());
        assert!(!StoreName::SYNCABLE.contains(&name));
    }
    for name in StoreName::SYNCABLE {
        assert!(!name.is_device_local());
    }
}

// ── SyncStatus ────────────────────────────────────────────────────

#[test]
fn status_defaults_to_idle() {
    assert_eq!(SyncStatus::default(), SyncStatus::Idle);
}

#[test]
fn status_serializes_lowercase() {
    assert_eq!(serde_json::to_string(&SyncStatus::Syncing).unwrap(), "\"syncing\"");
    assert_eq!(SyncStatus::Error.to_string(), "error");
}

// ── Timestamp ─────────────────────────────────────────────────────

#[test]
fn now_is_after_epoch() {
    assert!(Timestamp::now() > Timestamp::ZERO);
}

#[test]
fn ordering_by_millis() {
    assert!(Timestamp::from_millis(100) < Timestamp::from_millis(200));
}

#[test]
fn serializes_as_number() {
    let ts = Timestamp::from_millis(1_700_000_000_000);
    assert_eq!(serde_json::to_string(&ts).unwrap(), "1700000000000");
}

#[test]
fn parses_rfc3339() {
    let ts = Timestamp::parse_rfc3339("2024-01-01T00:00:00.000Z").unwrap();
    assert_eq!(ts.as_millis(), 1_704_067_200_000);
}

#[test]
fn rfc3339_rejects_garbage() {
    assert!(Timestamp::parse_rfc3339("yesterday").is_err());
}

#[test]
fn saturating_since_never_underflows() {
    let a = Timestamp::from_millis(10);
    let b = Timestamp::from_millis(25);
    assert_eq!(b.saturating_since(a), 15);
    assert_eq!(a.saturating_since(b), 0);
}
