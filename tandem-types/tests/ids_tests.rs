use tandem_types::DeviceId;
use std::collections::HashSet;
use std::str::FromStr;

// ── DeviceId ──────────────────────────────────────────────────────

#[test]
fn generate_is_unique() {
    let a = DeviceId::generate();
    let b = DeviceId::generate();
    assert_ne!(a, b);
}

#[test]
fn generated_ids_are_version_4() {
    let id = DeviceId::generate();
    assert_eq!(id.as_uuid().get_version_num(), 4);
}

#[test]
fn display_and_parse() {
    let id = DeviceId::generate();
    let parsed = DeviceId::parse(&id.to_string()).unwrap();
    assert_eq!(id, parsed);
}

#[test]
fn from_str_invalid() {
    assert!(DeviceId::from_str("garbage").is_err());
    assert!(DeviceId::parse("").is_err());
}

#[test]
fn bytes_roundtrip() {
    let id = DeviceId::generate();
    assert_eq!(DeviceId::from_bytes(*id.as_bytes()), id);
}

#[test]
fn hash_and_eq() {
    let id = DeviceId::generate();
    let mut set = HashSet::new();
    set.insert(id);
    set.insert(id);
    assert_eq!(set.len(), 1);
}

#[test]
fn serializes_as_plain_string() {
    let id = DeviceId::generate();
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, format!("\"{id}\""));
}

#[test]
fn deserialize_rejects_non_uuid() {
    let result: Result<DeviceId, _> = serde_json::from_str("\"device-one\"");
    assert!(result.is_err());
}
