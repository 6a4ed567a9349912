use std::time::Duration;

use libp2p::multiaddr::Protocol;
use pretty_assertions::assert_eq;
use tandem_cli::{ConfigError, TandemConfig, load_config_from};

fn write_config(contents: &str) -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, contents).unwrap();
    (dir, path)
}

// ── Loading ─────────────────────────────────────────────────────

#[test]
fn missing_file_yields_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = load_config_from(&dir.path().join("absent.toml")).unwrap();
    let defaults = TandemConfig::default();

    assert_eq!(config.log_level, "info");
    assert_eq!(config.network, defaults.network);
    assert!(config.network.enable_mdns);
    assert_eq!(config.network.connect_timeout, 15);
}

#[test]
fn file_values_override_defaults() {
    let (_dir, path) = write_config(
        r#"
        data_dir = "/var/lib/tandem"
        log_level = "debug"

        [network]
        listen_port = 4100
        enable_mdns = false
        connect_timeout = 5
        bootstrap_nodes = ["/ip4/203.0.113.7/udp/4001/quic-v1"]
        "#,
    );

    let config = load_config_from(&path).unwrap();
    assert_eq!(config.data_dir, std::path::PathBuf::from("/var/lib/tandem"));
    assert_eq!(config.log_level, "debug");
    assert_eq!(config.network.listen_port, 4100);
    assert!(!config.network.enable_mdns);
    assert!(config.network.enable_dht);
    assert_eq!(config.network.connect_timeout, 5);
    assert_eq!(config.network.initialize_timeout, 10);
}

#[test]
fn malformed_file_is_an_error() {
    let (_dir, path) = write_config("[network]\nlisten_port = \"not a port\"\n");
    assert!(matches!(load_config_from(&path), Err(ConfigError::Figment(_))));
}

// ── Derived settings ────────────────────────────────────────────

#[test]
fn session_config_uses_network_timeouts() {
    let mut config = TandemConfig::default();
    config.network.initialize_timeout = 3;
    config.network.connect_timeout = 7;

    let session = config.session_config();
    assert_eq!(session.initialize_timeout, Duration::from_secs(3));
    assert_eq!(session.connect_timeout, Duration::from_secs(7));
}

#[test]
fn p2p_config_applies_listen_port_and_flags() {
    let mut config = TandemConfig::default();
    config.network.listen_port = 4100;
    config.network.enable_dht = false;
    config.network.bootstrap_nodes = vec!["/ip4/203.0.113.7/udp/4001/quic-v1".into()];

    let p2p = config.p2p_config().unwrap();
    assert!(!p2p.enable_dht);
    assert_eq!(p2p.bootstrap_nodes.len(), 1);
    for addr in &p2p.listen_addrs {
        assert!(addr.iter().any(|p| p == Protocol::Udp(4100)));
    }
}

#[test]
fn invalid_bootstrap_node_is_rejected() {
    let mut config = TandemConfig::default();
    config.network.bootstrap_nodes = vec!["not-a-multiaddr".into()];

    let err = config.p2p_config().unwrap_err();
    assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "network.bootstrap_nodes"));
}
