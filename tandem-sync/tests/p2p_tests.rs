use libp2p::multiaddr::Protocol;
use tandem_sync::p2p::{AGENT_PREFIX, P2pConfig, P2pNetwork, device_from_agent, device_key};
use tandem_types::DeviceId;

// ── Config ──────────────────────────────────────────────────────

#[test]
fn default_config_listens_on_quic() {
    let config = P2pConfig::default();
    assert_eq!(config.listen_addrs.len(), 2);
    for addr in &config.listen_addrs {
        assert!(addr.iter().any(|p| matches!(p, Protocol::QuicV1)));
        assert!(addr.iter().any(|p| matches!(p, Protocol::Udp(0))));
    }
    assert!(config.bootstrap_nodes.is_empty());
    assert!(config.enable_mdns);
    assert!(config.enable_dht);
}

#[test]
fn network_keeps_keypair_identity() {
    let keypair = libp2p::identity::Keypair::generate_ed25519();
    let expected = keypair.public().to_peer_id();
    let network = P2pNetwork::with_keypair(keypair, P2pConfig::default());
    assert_eq!(network.libp2p_peer_id(), expected);
}

// ── Device addressing ───────────────────────────────────────────

#[test]
fn agent_version_roundtrips_device_id() {
    let device = DeviceId::generate();
    let agent = format!("{AGENT_PREFIX}{device}");
    assert_eq!(device_from_agent(&agent), Some(device));
}

#[test]
fn foreign_agents_are_not_devices() {
    assert_eq!(device_from_agent("rust-libp2p/0.56"), None);
    assert_eq!(device_from_agent("tandem/not-a-uuid"), None);
    assert_eq!(device_from_agent("tandem-relay/0.3.0"), None);
}

#[test]
fn device_keys_are_stable_and_distinct() {
    let a = DeviceId::generate();
    let b = DeviceId::generate();
    assert_eq!(device_key(&a), device_key(&a));
    assert_ne!(device_key(&a), device_key(&b));
}

#[test]
fn device_key_hides_raw_id() {
    let device = DeviceId::generate();
    let key = device_key(&device);
    let key = String::from_utf8(key.to_vec()).unwrap();
    assert!(key.starts_with("/tandem/device/"));
    assert!(!key.contains(&device.to_string()));
    assert_eq!(key.len(), "/tandem/device/".len() + 64);
}
