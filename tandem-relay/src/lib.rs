//! Shared types, device-record admission and the HTTP API for the Tandem relay.

use std::{fs, path::Path, sync::Arc};

use anyhow::{Context, Result};
use axum::{Router, extract::State, response::Json, routing::get};
use libp2p::{identity::Keypair, kad};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Identify protocol version announced by the relay.
pub const RELAY_PROTOCOL: &str = "/tandem/relay/1.0.0";

/// Identify agent version announced by the relay.
pub const RELAY_AGENT: &str = concat!("tandem-relay/", env!("CARGO_PKG_VERSION"));

/// DHT key prefix under which devices register.
pub const DEVICE_KEY_PREFIX: &[u8] = b"/tandem/device/";

/// Largest device record the relay will hold.
pub const MAX_RECORD_SIZE: usize = 4096;

/// Response body of `GET /api/v1/identity`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct IdentityResponse {
    pub peer_id: String,
    pub addresses: Vec<String>,
    pub protocol_version: String,
    pub agent_version: String,
}

impl IdentityResponse {
    /// Identity of a relay listening for QUIC on `port`.
    pub fn for_relay(peer_id: impl ToString, port: u16) -> Self {
        Self {
            peer_id: peer_id.to_string(),
            addresses: listen_addresses(port),
            protocol_version: RELAY_PROTOCOL.to_string(),
            agent_version: RELAY_AGENT.to_string(),
        }
    }
}

/// QUIC listen addresses (IPv4 and IPv6) for `port`.
pub fn listen_addresses(port: u16) -> Vec<String> {
    vec![
        format!("/ip4/0.0.0.0/udp/{port}/quic-v1"),
        format!("/ip6/::/udp/{port}/quic-v1"),
    ]
}

async fn identity_handler(
    State(identity): State<Arc<IdentityResponse>>,
) -> Json<IdentityResponse> {
    Json((*identity).clone())
}

/// Build the HTTP API router with the given identity state.
pub fn build_router(identity: Arc<IdentityResponse>) -> Router {
    Router::new()
        .route("/api/v1/identity", get(identity_handler))
        .with_state(identity)
}

/// Why an inbound DHT record was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordRejection {
    /// The key is not under [`DEVICE_KEY_PREFIX`].
    ForeignKey,
    /// The value exceeds [`MAX_RECORD_SIZE`].
    TooLarge,
    /// The value is not a JSON object with an `addresses` array.
    Malformed,
}

impl std::fmt::Display for RecordRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            Self::ForeignKey => "key outside the device namespace",
            Self::TooLarge => "record too large",
            Self::Malformed => "record is not a device registration",
        };
        f.write_str(reason)
    }
}

/// Checks that a record is a device registration the relay should store.
pub fn validate_device_record(record: &kad::Record) -> Result<(), RecordRejection> {
    if !record.key.as_ref().starts_with(DEVICE_KEY_PREFIX) {
        return Err(RecordRejection::ForeignKey);
    }
    if record.value.len() > MAX_RECORD_SIZE {
        return Err(RecordRejection::TooLarge);
    }
    let value: serde_json::Value =
        serde_json::from_slice(&record.value).map_err(|_| RecordRejection::Malformed)?;
    match value.get("addresses") {
        Some(serde_json::Value::Array(_)) => Ok(()),
        _ => Err(RecordRejection::Malformed),
    }
}

/// Loads the relay's ed25519 identity, creating and persisting one if absent.
pub fn load_or_generate_keypair(path: &Path) -> Result<Keypair> {
    if path.exists() {
        info!("Loading identity from {:?}", path);
        let bytes = fs::read(path).context("Failed to read identity file")?;
        Keypair::from_protobuf_encoding(&bytes).context("Failed to decode identity key")
    } else {
        info!("Generating new identity at {:?}", path);
        let keypair = Keypair::generate_ed25519();
        fs::write(path, keypair.to_protobuf_encoding()?)
            .context("Failed to write identity file")?;
        Ok(keypair)
    }
}
