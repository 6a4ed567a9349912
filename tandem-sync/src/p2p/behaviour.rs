//! Network behaviour combining discovery, identity and frame delivery.

use crate::error::{SyncError, SyncResult};
use crate::p2p::codec::FrameCodec;
use libp2p::{
    identify, kad, mdns,
    request_response::{self, ProtocolSupport},
    swarm::{NetworkBehaviour, behaviour::toggle::Toggle},
    Multiaddr,
};
use sha2::{Digest, Sha256};
use std::iter;
use std::time::Duration;
use tandem_types::{DeviceId, Timestamp};
use tracing::{debug, info, warn};

/// The frame protocol identifier.
pub const SYNC_PROTOCOL: &str = "/tandem/sync/1.0.0";

/// Identify agent prefix; the device ID follows it.
pub const AGENT_PREFIX: &str = "tandem/";

/// DHT record key prefix for device registrations.
const DEVICE_DHT_PREFIX: &[u8] = b"/tandem/device/";

/// Combined network behaviour for device-addressed sync.
#[derive(NetworkBehaviour)]
pub struct SyncBehaviour {
    /// mDNS for local network discovery (optional).
    pub mdns: Toggle<mdns::tokio::Behaviour>,
    /// Kademlia DHT, used as the device-ID signaling registry.
    pub kademlia: kad::Behaviour<kad::store::MemoryStore>,
    /// Identify; carries the device ID in the agent version.
    pub identify: identify::Behaviour,
    /// Request-response carrying envelope frames.
    pub frames: request_response::Behaviour<FrameCodec>,
}

impl SyncBehaviour {
    /// Creates the behaviour for `device_id`.
    pub fn new(
        keypair: &libp2p::identity::Keypair,
        bootstrap_nodes: &[Multiaddr],
        enable_mdns: bool,
        device_id: DeviceId,
    ) -> SyncResult<Self> {
        let local_peer_id = keypair.public().to_peer_id();

        let mdns = if enable_mdns {
            let behaviour = mdns::tokio::Behaviour::new(mdns::Config::default(), local_peer_id)
                .map_err(|e| SyncError::Unsupported(format!("mDNS unavailable: {e}")))?;
            Toggle::from(Some(behaviour))
        } else {
            debug!("mDNS disabled");
            Toggle::from(None)
        };

        let store = kad::store::MemoryStore::new(local_peer_id);
        let mut kademlia_config = kad::Config::new(kad::PROTOCOL_NAME);
        kademlia_config.set_query_timeout(Duration::from_secs(30));
        let mut kademlia = kad::Behaviour::with_config(local_peer_id, store, kademlia_config);

        for addr in bootstrap_nodes {
            if let Some(peer_id) = extract_peer_id(addr) {
                kademlia.add_address(&peer_id, remove_peer_id_suffix(addr));
                info!("Added bootstrap node: {peer_id}");
            } else {
                warn!("Bootstrap address missing peer ID: {addr}");
            }
        }
        kademlia.set_mode(Some(kad::Mode::Server));
        if !bootstrap_nodes.is_empty() {
            if let Err(e) = kademlia.bootstrap() {
                warn!("Failed to trigger Kademlia bootstrap: {e:?}");
            }
        }

        let identify = identify::Behaviour::new(
            identify::Config::new(SYNC_PROTOCOL.to_string(), keypair.public())
                .with_agent_version(format!("{AGENT_PREFIX}{device_id}")),
        );

        let frames = request_response::Behaviour::new(
            iter::once((SYNC_PROTOCOL, ProtocolSupport::Full)),
            request_response::Config::default().with_request_timeout(Duration::from_secs(60)),
        );

        Ok(Self {
            mdns,
            kademlia,
            identify,
            frames,
        })
    }

    /// Publishes `device_id` with its listen addresses to the DHT.
    pub fn publish_device(
        &mut self,
        device_id: DeviceId,
        addresses: &[Multiaddr],
    ) -> SyncResult<kad::QueryId> {
        let value = serde_json::json!({
            "deviceId": device_id,
            "addresses": addresses.iter().map(ToString::to_string).collect::<Vec<_>>(),
            "timestamp": Timestamp::now(),
        });
        let record = kad::Record {
            key: device_key(&device_id),
            value: value.to_string().into_bytes(),
            publisher: None,
            expires: None,
        };

        debug!("Publishing device {device_id} to DHT");
        self.kademlia
            .put_record(record, kad::Quorum::One)
            .map_err(|e| SyncError::Network(format!("DHT publish failed: {e:?}")))
    }

    /// Looks up a device's registration in the DHT.
    pub fn lookup_device(&mut self, device_id: &DeviceId) -> kad::QueryId {
        debug!("Looking up device {device_id} in DHT");
        self.kademlia.get_record(device_key(device_id))
    }
}

/// The DHT key for a device: prefix plus the SHA-256 of its ID, hex encoded.
pub fn device_key(device_id: &DeviceId) -> kad::RecordKey {
    let digest = Sha256::digest(device_id.to_string().as_bytes());
    let mut key = DEVICE_DHT_PREFIX.to_vec();
    key.extend_from_slice(hex::encode(digest).as_bytes());
    kad::RecordKey::new(&key)
}

/// Extracts the device ID from an identify agent version.
pub fn device_from_agent(agent_version: &str) -> Option<DeviceId> {
    agent_version
        .strip_prefix(AGENT_PREFIX)
        .and_then(|id| DeviceId::parse(id).ok())
}

/// Addresses listed in a DHT device record.
pub fn record_addresses(value: &[u8]) -> Vec<Multiaddr> {
    serde_json::from_slice::<serde_json::Value>(value)
        .ok()
        .and_then(|v| {
            v.get("addresses").and_then(|a| a.as_array()).map(|arr| {
                arr.iter()
                    .filter_map(|a| a.as_str()?.parse().ok())
                    .collect()
            })
        })
        .unwrap_or_default()
}

/// Extract the PeerId from a multiaddr like /ip4/.../p2p/12D3KooW...
fn extract_peer_id(addr: &Multiaddr) -> Option<libp2p::PeerId> {
    addr.iter().find_map(|proto| {
        if let libp2p::multiaddr::Protocol::P2p(peer_id) = proto {
            Some(peer_id)
        } else {
            None
        }
    })
}

/// Remove the /p2p/... suffix from a multiaddr.
fn remove_peer_id_suffix(addr: &Multiaddr) -> Multiaddr {
    addr.iter()
        .filter(|proto| !matches!(proto, libp2p::multiaddr::Protocol::P2p(_)))
        .collect()
}
