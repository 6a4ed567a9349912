//! Tandem bootstrap, signaling and relay node
//!
//! This binary runs on a public server to help Tandem devices:
//! 1. Find each other by device ID through Kademlia device records
//! 2. Relay traffic when a direct connection fails (NAT traversal)
//!
//! Usage:
//!   tandem-relay --port 4001
//!
//! The relay keeps device registrations in memory only and never sees
//! synced data.

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Result;
use clap::Parser;
use futures::StreamExt;
use libp2p::{
    PeerId, identify,
    kad::{self, store::RecordStore},
    relay,
    swarm::{NetworkBehaviour, SwarmEvent},
};
use tandem_relay::{
    IdentityResponse, RELAY_AGENT, RELAY_PROTOCOL, build_router, listen_addresses,
    load_or_generate_keypair, validate_device_record,
};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tandem-relay", version)]
#[command(about = "Tandem bootstrap, signaling and relay node")]
struct Args {
    /// Port to listen on (UDP/QUIC)
    #[arg(short, long, default_value = "4001")]
    port: u16,

    /// Path to identity key file
    #[arg(short, long, default_value = "relay-identity.key")]
    identity: PathBuf,

    /// HTTP API port for identity endpoint
    #[arg(long, default_value = "4002")]
    http_port: u16,

    /// How long device registrations are kept without a republish, in seconds
    #[arg(long, default_value = "3600")]
    record_ttl: u64,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(NetworkBehaviour)]
struct RelayBehaviour {
    relay: relay::Behaviour,
    kademlia: kad::Behaviour<kad::store::MemoryStore>,
    identify: identify::Behaviour,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .compact()
        .init();

    info!("Tandem relay starting...");
    let keypair = load_or_generate_keypair(&args.identity)?;
    let local_peer_id = PeerId::from(keypair.public());
    info!("Relay PeerId: {}", local_peer_id);

    let record_ttl = Duration::from_secs(args.record_ttl);
    let mut swarm = libp2p::SwarmBuilder::with_existing_identity(keypair)
        .with_tokio()
        .with_quic()
        .with_behaviour(|key| {
            let relay = relay::Behaviour::new(key.public().to_peer_id(), relay::Config::default());

            // Inbound records are checked before they are stored.
            let mut kad_config = kad::Config::new(kad::PROTOCOL_NAME);
            kad_config.set_query_timeout(Duration::from_secs(60));
            kad_config.set_record_ttl(Some(record_ttl));
            kad_config.set_record_filtering(kad::StoreInserts::FilterBoth);
            let mut kademlia = kad::Behaviour::with_config(
                key.public().to_peer_id(),
                kad::store::MemoryStore::new(key.public().to_peer_id()),
                kad_config,
            );
            // Server mode so devices can publish and look up registrations.
            kademlia.set_mode(Some(kad::Mode::Server));

            let identify = identify::Behaviour::new(
                identify::Config::new(RELAY_PROTOCOL.into(), key.public())
                    .with_agent_version(RELAY_AGENT.into()),
            );

            RelayBehaviour {
                relay,
                kademlia,
                identify,
            }
        })?
        .with_swarm_config(|c| c.with_idle_connection_timeout(Duration::from_secs(300)))
        .build();

    for addr in listen_addresses(args.port) {
        swarm.listen_on(addr.parse()?)?;
    }

    let identity_state = Arc::new(IdentityResponse::for_relay(local_peer_id, args.port));
    let http_port = args.http_port;
    tokio::spawn(async move {
        let app = build_router(identity_state);
        let listener = match tokio::net::TcpListener::bind(format!("0.0.0.0:{http_port}")).await {
            Ok(listener) => listener,
            Err(e) => {
                warn!("Failed to bind HTTP port {}: {}", http_port, e);
                return;
            }
        };
        info!("HTTP identity endpoint listening on port {}", http_port);
        if let Err(e) = axum::serve(listener, app).await {
            warn!("HTTP server failed: {}", e);
        }
    });

    println!("\n========================================");
    println!("  Tandem Relay Running");
    println!("========================================");
    println!("  PeerId:    {}", local_peer_id);
    println!("  P2P Port:  {}", args.port);
    println!("  HTTP Port: {}", http_port);
    println!("\n  Bootstrap address:");
    println!("  /ip4/YOUR_PUBLIC_IP/udp/{}/quic-v1/p2p/{}", args.port, local_peer_id);
    println!("========================================\n");

    let mut peers_served: u64 = 0;
    let mut relayed_connections: u64 = 0;
    let mut registrations: u64 = 0;

    loop {
        let event = tokio::select! {
            event = swarm.select_next_some() => event,
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down (served {} peers, {} registrations)", peers_served, registrations);
                return Ok(());
            }
        };

        match event {
            SwarmEvent::NewListenAddr { address, .. } => {
                info!("Listening on {}/p2p/{}", address, local_peer_id);
            }
            SwarmEvent::ConnectionEstablished { peer_id, endpoint, .. } => {
                peers_served += 1;
                info!("Peer connected: {} (total served: {})", peer_id, peers_served);
                swarm
                    .behaviour_mut()
                    .kademlia
                    .add_address(&peer_id, endpoint.get_remote_address().clone());
            }
            SwarmEvent::ConnectionClosed { peer_id, .. } => {
                debug!("Peer disconnected: {}", peer_id);
            }
            SwarmEvent::Behaviour(RelayBehaviourEvent::Relay(event)) => match event {
                relay::Event::ReservationReqAccepted { src_peer_id, .. } => {
                    info!("Relay reservation accepted for {}", src_peer_id);
                }
                relay::Event::CircuitReqAccepted {
                    src_peer_id,
                    dst_peer_id,
                    ..
                } => {
                    relayed_connections += 1;
                    info!(
                        "Relaying circuit: {} <-> {} (total relayed: {})",
                        src_peer_id, dst_peer_id, relayed_connections
                    );
                }
                relay::Event::CircuitClosed {
                    src_peer_id,
                    dst_peer_id,
                    ..
                } => {
                    debug!("Circuit closed: {} <-> {}", src_peer_id, dst_peer_id);
                }
                _ => debug!("Relay event: {:?}", event),
            },
            SwarmEvent::Behaviour(RelayBehaviourEvent::Kademlia(event)) => match event {
                kad::Event::InboundRequest {
                    request:
                        kad::InboundRequest::PutRecord {
                            source,
                            record: Some(record),
                            ..
                        },
                } => match validate_device_record(&record) {
                    Ok(()) => match swarm.behaviour_mut().kademlia.store_mut().put(record) {
                        Ok(()) => {
                            registrations += 1;
                            debug!("Stored device registration from {}", source);
                        }
                        Err(e) => warn!("Failed to store registration from {}: {:?}", source, e),
                    },
                    Err(reason) => warn!("Rejected record from {}: {}", source, reason),
                },
                kad::Event::RoutingUpdated { peer, .. } => {
                    debug!("Kademlia routing updated for peer: {}", peer);
                }
                kad::Event::OutboundQueryProgressed { result, .. } => match result {
                    kad::QueryResult::Bootstrap(Ok(_)) => {
                        info!("Kademlia bootstrap completed");
                    }
                    kad::QueryResult::Bootstrap(Err(e)) => {
                        warn!("Kademlia bootstrap failed: {:?}", e);
                    }
                    other => debug!("Kademlia query result: {:?}", other),
                },
                other => debug!("Kademlia event: {:?}", other),
            },
            SwarmEvent::Behaviour(RelayBehaviourEvent::Identify(event)) => {
                if let identify::Event::Received { peer_id, info, .. } = event {
                    debug!(
                        "Identified peer {}: {} ({})",
                        peer_id, info.agent_version, info.protocol_version
                    );
                    for addr in info.listen_addrs {
                        swarm.behaviour_mut().kademlia.add_address(&peer_id, addr);
                    }
                }
            }
            SwarmEvent::IncomingConnectionError { error, .. } => {
                warn!("Incoming connection error: {}", error);
            }
            _ => {}
        }
    }
}
