//! libp2p-based peer network.
//!
//! Provides device discovery via mDNS (local network) and a Kademlia DHT
//! registry keyed by device ID (WAN, through a relay), with encrypted QUIC
//! connections.

mod behaviour;
pub mod codec;
mod network;

pub use behaviour::{AGENT_PREFIX, SYNC_PROTOCOL, device_from_agent, device_key};
pub use codec::{FrameAck, FrameCodec, FrameRequest, MAX_FRAME_SIZE};
pub use libp2p::identity::Keypair;
pub use network::{P2pConfig, P2pNetwork};
