//! Configuration for the `tandem` binary.
//!
//! Layered with figment: built-in defaults, then the TOML file, then
//! `TANDEM_*` environment variables (`__` separates nested keys, e.g.
//! `TANDEM_NETWORK__ENABLE_MDNS=false`). Command-line flags are applied last
//! by the binary.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use libp2p::{Multiaddr, multiaddr::Protocol};
use serde::{Deserialize, Serialize};
use tandem_sync::SessionConfig;
use tandem_sync::p2p::P2pConfig;
use thiserror::Error;

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── Config structs ──────────────────────────────────────────────────

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TandemConfig {
    /// Directory holding `tandem.db`.
    pub data_dir: PathBuf,

    /// Optional diagnostic log file, written in addition to stderr.
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Default log filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub network: NetworkSettings,
}

impl Default for TandemConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_file: None,
            log_level: default_log_level(),
            network: NetworkSettings::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

/// Peer network and session settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct NetworkSettings {
    /// UDP port for QUIC. 0 picks a free port.
    #[serde(default)]
    pub listen_port: u16,

    /// Relay multiaddrs, including their `/p2p/<peer id>` suffix.
    #[serde(default)]
    pub bootstrap_nodes: Vec<String>,

    #[serde(default = "enabled")]
    pub enable_mdns: bool,

    #[serde(default = "enabled")]
    pub enable_dht: bool,

    /// Seconds allowed for network registration.
    #[serde(default = "default_initialize_timeout")]
    pub initialize_timeout: u64,

    /// Seconds allowed for a dial.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            listen_port: 0,
            bootstrap_nodes: Vec::new(),
            enable_mdns: true,
            enable_dht: true,
            initialize_timeout: default_initialize_timeout(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

fn enabled() -> bool {
    true
}
fn default_initialize_timeout() -> u64 {
    10
}
fn default_connect_timeout() -> u64 {
    15
}

impl TandemConfig {
    /// Session timeouts derived from the network settings.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            initialize_timeout: Duration::from_secs(self.network.initialize_timeout),
            connect_timeout: Duration::from_secs(self.network.connect_timeout),
            ..SessionConfig::default()
        }
    }

    /// libp2p settings derived from the network settings.
    pub fn p2p_config(&self) -> Result<P2pConfig, ConfigError> {
        let settings = &self.network;
        let mut config = P2pConfig {
            enable_mdns: settings.enable_mdns,
            enable_dht: settings.enable_dht,
            ..P2pConfig::default()
        };

        let listen_addrs = config
            .listen_addrs
            .iter()
            .map(|addr| {
                addr.iter()
                    .map(|p| match p {
                        Protocol::Udp(_) => Protocol::Udp(settings.listen_port),
                        other => other,
                    })
                    .collect()
            })
            .collect();
        config.listen_addrs = listen_addrs;

        config.bootstrap_nodes = settings
            .bootstrap_nodes
            .iter()
            .map(|raw| {
                raw.parse::<Multiaddr>().map_err(|e| ConfigError::Validation {
                    field: "network.bootstrap_nodes".into(),
                    reason: format!("{raw}: {e}"),
                })
            })
            .collect::<Result<_, _>>()?;

        Ok(config)
    }
}

// ── Paths ───────────────────────────────────────────────────────────

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "tandem", "tandem")
}

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    project_dirs().map_or_else(
        || PathBuf::from(".tandem").join("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

/// Default data directory via XDG / platform conventions.
pub fn default_data_dir() -> PathBuf {
    project_dirs().map_or_else(
        || PathBuf::from(".tandem"),
        |dirs| dirs.data_dir().to_path_buf(),
    )
}

// ── Loading ─────────────────────────────────────────────────────────

/// Load the config from the default path and the environment.
pub fn load_config() -> Result<TandemConfig, ConfigError> {
    load_config_from(&config_path())
}

/// Load the config from `path` and the environment. A missing file is not
/// an error.
pub fn load_config_from(path: &Path) -> Result<TandemConfig, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(TandemConfig::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("TANDEM_").split("__"));

    let config: TandemConfig = figment.extract()?;
    Ok(config)
}
