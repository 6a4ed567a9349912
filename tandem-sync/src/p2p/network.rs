//! [`PeerNetwork`] over a libp2p swarm.
//!
//! Devices are found by ID through identify (on the LAN, via mDNS) or
//! through their DHT registration (via the relay's Kademlia node). A channel
//! counts as open once a connection exists to the libp2p peer that
//! announced the device ID.

use crate::error::{SyncError, SyncResult};
use crate::p2p::behaviour::{
    SyncBehaviour, SyncBehaviourEvent, device_from_agent, record_addresses,
};
use crate::p2p::codec::{FrameAck, FrameRequest};
use crate::transport::{NetworkEvent, NetworkEvents, PeerNetwork};
use async_trait::async_trait;
use futures::StreamExt;
use libp2p::{
    identify,
    identity::Keypair,
    kad, mdns,
    multiaddr::Protocol,
    request_response::{self, OutboundRequestId},
    swarm::SwarmEvent,
    Multiaddr, PeerId as Libp2pPeerId, Swarm,
};
use std::collections::{HashMap, HashSet};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tandem_types::DeviceId;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Configuration for the libp2p network.
#[derive(Debug, Clone)]
pub struct P2pConfig {
    /// Listen addresses.
    pub listen_addrs: Vec<Multiaddr>,
    /// Bootstrap nodes (relays) for the DHT.
    pub bootstrap_nodes: Vec<Multiaddr>,
    /// Enable mDNS discovery on the local network.
    pub enable_mdns: bool,
    /// Publish and look up devices in the DHT.
    pub enable_dht: bool,
    /// Connection idle timeout.
    pub idle_timeout: Duration,
    /// How often the device registration is republished.
    pub publish_interval: Duration,
}

impl Default for P2pConfig {
    fn default() -> Self {
        Self {
            listen_addrs: vec![
                Multiaddr::empty()
                    .with(Protocol::Ip4(Ipv4Addr::UNSPECIFIED))
                    .with(Protocol::Udp(0))
                    .with(Protocol::QuicV1),
                Multiaddr::empty()
                    .with(Protocol::Ip6(Ipv6Addr::UNSPECIFIED))
                    .with(Protocol::Udp(0))
                    .with(Protocol::QuicV1),
            ],
            bootstrap_nodes: Vec::new(),
            enable_mdns: true,
            enable_dht: true,
            idle_timeout: Duration::from_secs(60),
            publish_interval: Duration::from_secs(30),
        }
    }
}

/// Command sent to the swarm event loop.
enum SwarmCommand {
    Dial {
        device: DeviceId,
    },
    Send {
        device: DeviceId,
        body: Vec<u8>,
        result_tx: oneshot::Sender<SyncResult<()>>,
    },
    Close {
        device: DeviceId,
    },
    Shutdown,
}

/// Peer network using libp2p.
pub struct P2pNetwork {
    keypair: Keypair,
    config: P2pConfig,
    command_tx: Mutex<Option<mpsc::Sender<SwarmCommand>>>,
}

impl P2pNetwork {
    /// Creates a network with a fresh keypair.
    pub fn new(config: P2pConfig) -> Self {
        Self::with_keypair(Keypair::generate_ed25519(), config)
    }

    /// Creates a network with a specific keypair.
    pub fn with_keypair(keypair: Keypair, config: P2pConfig) -> Self {
        Self {
            keypair,
            config,
            command_tx: Mutex::new(None),
        }
    }

    /// Returns our libp2p peer ID.
    pub fn libp2p_peer_id(&self) -> Libp2pPeerId {
        self.keypair.public().to_peer_id()
    }

    /// Returns the configuration.
    pub fn config(&self) -> &P2pConfig {
        &self.config
    }

    fn create_swarm(&self, device_id: DeviceId) -> SyncResult<Swarm<SyncBehaviour>> {
        let behaviour = SyncBehaviour::new(
            &self.keypair,
            &self.config.bootstrap_nodes,
            self.config.enable_mdns,
            device_id,
        )?;

        let swarm = libp2p::SwarmBuilder::with_existing_identity(self.keypair.clone())
            .with_tokio()
            .with_quic()
            .with_behaviour(|_| behaviour)
            .map_err(|e| SyncError::Unsupported(format!("failed to create behaviour: {e}")))?
            .with_swarm_config(|cfg| cfg.with_idle_connection_timeout(self.config.idle_timeout))
            .build();

        Ok(swarm)
    }

    fn command_tx(&self) -> SyncResult<mpsc::Sender<SwarmCommand>> {
        self.command_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(SyncError::NotInitialized)
    }

    async fn command(&self, command: SwarmCommand) -> SyncResult<()> {
        self.command_tx()?
            .send(command)
            .await
            .map_err(|_| SyncError::Network("command channel closed".to_string()))
    }
}

#[async_trait]
impl PeerNetwork for P2pNetwork {
    async fn register(&self, local: DeviceId) -> SyncResult<NetworkEvents> {
        let mut swarm = self.create_swarm(local)?;
        for addr in &self.config.listen_addrs {
            swarm
                .listen_on(addr.clone())
                .map_err(|e| SyncError::Unsupported(format!("failed to listen on {addr}: {e}")))?;
        }

        let (command_tx, command_rx) = mpsc::channel(32);
        let (event_tx, event_rx) = mpsc::channel(64);
        let (ready_tx, ready_rx) = oneshot::channel();

        let driver = SwarmDriver {
            await_dht: self.config.enable_dht && !self.config.bootstrap_nodes.is_empty(),
            enable_dht: self.config.enable_dht,
            local_device: local,
            local_peer: self.libp2p_peer_id(),
            swarm,
            commands: command_rx,
            events: event_tx,
            ready: Some(ready_tx),
            listen_addresses: Vec::new(),
            devices: HashMap::new(),
            peers: HashMap::new(),
            pending_dials: HashSet::new(),
            open: HashSet::new(),
            pending_lookups: HashMap::new(),
            pending_sends: HashMap::new(),
        };
        tokio::spawn(driver.run(self.config.publish_interval));

        ready_rx
            .await
            .map_err(|_| SyncError::Network("swarm stopped before registration".to_string()))?;
        *self.command_tx.lock().unwrap_or_else(PoisonError::into_inner) = Some(command_tx);

        info!(
            "P2P network registered {local}, libp2p peer ID: {}",
            self.libp2p_peer_id()
        );
        Ok(event_rx)
    }

    async fn dial(&self, peer: DeviceId) -> SyncResult<()> {
        self.command(SwarmCommand::Dial { device: peer }).await
    }

    async fn send(&self, peer: DeviceId, frame: Vec<u8>) -> SyncResult<()> {
        let (result_tx, result_rx) = oneshot::channel();
        self.command(SwarmCommand::Send {
            device: peer,
            body: frame,
            result_tx,
        })
        .await?;
        result_rx.await.map_err(|_| SyncError::ChannelClosed)?
    }

    async fn close(&self, peer: DeviceId) -> SyncResult<()> {
        self.command(SwarmCommand::Close { device: peer }).await
    }

    async fn unregister(&self) -> SyncResult<()> {
        let command_tx = self
            .command_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tx) = command_tx {
            let _ = tx.send(SwarmCommand::Shutdown).await;
            info!("P2P network stopped");
        }
        Ok(())
    }
}

/// Owns the swarm and the device/peer bookkeeping.
struct SwarmDriver {
    await_dht: bool,
    enable_dht: bool,
    local_device: DeviceId,
    local_peer: Libp2pPeerId,
    swarm: Swarm<SyncBehaviour>,
    commands: mpsc::Receiver<SwarmCommand>,
    events: mpsc::Sender<NetworkEvent>,
    ready: Option<oneshot::Sender<()>>,
    listen_addresses: Vec<Multiaddr>,
    devices: HashMap<Libp2pPeerId, DeviceId>,
    peers: HashMap<DeviceId, Libp2pPeerId>,
    pending_dials: HashSet<DeviceId>,
    open: HashSet<DeviceId>,
    pending_lookups: HashMap<kad::QueryId, DeviceId>,
    pending_sends: HashMap<OutboundRequestId, oneshot::Sender<SyncResult<()>>>,
}

impl SwarmDriver {
    async fn run(mut self, publish_every: Duration) {
        let mut publish_interval = tokio::time::interval(publish_every);

        loop {
            tokio::select! {
                event = self.swarm.select_next_some() => self.handle_swarm_event(event).await,
                command = self.commands.recv() => match command {
                    Some(SwarmCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                _ = publish_interval.tick() => self.publish(),
                () = self.events.closed() => {
                    debug!("Event receiver dropped, stopping swarm");
                    break;
                }
            }
        }
        debug!("Swarm event loop for {} ended", self.local_device);
    }

    async fn emit(&mut self, event: NetworkEvent) {
        if self.events.send(event).await.is_err() {
            debug!("Network event dropped, receiver gone");
        }
    }

    fn mark_ready(&mut self) {
        if let Some(ready) = self.ready.take() {
            let _ = ready.send(());
        }
    }

    fn publish(&mut self) {
        if !self.enable_dht || self.listen_addresses.is_empty() {
            return;
        }
        let addresses = self.listen_addresses.clone();
        if let Err(e) = self
            .swarm
            .behaviour_mut()
            .publish_device(self.local_device, &addresses)
        {
            warn!("{e}");
        }
    }

    async fn open_channel(&mut self, device: DeviceId) {
        self.pending_dials.remove(&device);
        if self.open.insert(device) {
            info!("Channel open with {device}");
            self.emit(NetworkEvent::ChannelOpened { peer: device }).await;
        }
    }

    fn learn_device(&mut self, peer: Libp2pPeerId, device: DeviceId) {
        self.devices.insert(peer, device);
        self.peers.insert(device, peer);
    }

    async fn handle_command(&mut self, command: SwarmCommand) {
        match command {
            SwarmCommand::Dial { device } => {
                if self.open.contains(&device) {
                    self.emit(NetworkEvent::ChannelOpened { peer: device }).await;
                    return;
                }
                self.pending_dials.insert(device);
                match self.peers.get(&device).copied() {
                    Some(peer) if self.swarm.is_connected(&peer) => self.open_channel(device).await,
                    Some(peer) => {
                        if let Err(e) = self.swarm.dial(peer) {
                            self.pending_dials.remove(&device);
                            self.emit(NetworkEvent::DialFailed {
                                peer: device,
                                reason: e.to_string(),
                            })
                            .await;
                        }
                    }
                    None if self.enable_dht => {
                        let query = self.swarm.behaviour_mut().lookup_device(&device);
                        self.pending_lookups.insert(query, device);
                    }
                    None => debug!("Waiting for {device} to appear on the local network"),
                }
            }
            SwarmCommand::Send {
                device,
                body,
                result_tx,
            } => {
                let Some(peer) = self.peers.get(&device).copied() else {
                    let _ = result_tx.send(Err(SyncError::PeerNotFound(device.to_string())));
                    return;
                };
                let request_id = self.swarm.behaviour_mut().frames.send_request(
                    &peer,
                    FrameRequest {
                        sender: self.local_device,
                        body,
                    },
                );
                self.pending_sends.insert(request_id, result_tx);
            }
            SwarmCommand::Close { device } => {
                self.pending_dials.remove(&device);
                self.open.remove(&device);
                if let Some(peer) = self.peers.get(&device) {
                    let _ = self.swarm.disconnect_peer_id(*peer);
                }
            }
            SwarmCommand::Shutdown => {}
        }
    }

    async fn handle_swarm_event(&mut self, event: SwarmEvent<SyncBehaviourEvent>) {
        match event {
            SwarmEvent::NewListenAddr { address, .. } => {
                info!("Listening on {address}");
                self.listen_addresses.push(address);
                if self.await_dht {
                    self.publish();
                } else {
                    self.mark_ready();
                }
            }
            SwarmEvent::ConnectionEstablished { peer_id, .. } => {
                debug!("Connection established with {peer_id}");
                if let Some(device) = self.devices.get(&peer_id).copied() {
                    if self.pending_dials.contains(&device) {
                        self.open_channel(device).await;
                    }
                }
            }
            SwarmEvent::ConnectionClosed {
                peer_id,
                num_established,
                cause,
                ..
            } => {
                debug!("Connection closed with {peer_id}: {cause:?}");
                if num_established > 0 {
                    return;
                }
                if let Some(device) = self.devices.get(&peer_id).copied() {
                    if self.open.remove(&device) {
                        self.emit(NetworkEvent::ChannelClosed {
                            peer: device,
                            reason: cause.map(|c| c.to_string()),
                        })
                        .await;
                    }
                }
            }
            SwarmEvent::OutgoingConnectionError {
                peer_id: Some(peer_id),
                error,
                ..
            } => {
                if let Some(device) = self.devices.get(&peer_id).copied() {
                    if self.pending_dials.remove(&device) {
                        self.emit(NetworkEvent::DialFailed {
                            peer: device,
                            reason: error.to_string(),
                        })
                        .await;
                    }
                }
            }
            SwarmEvent::Behaviour(SyncBehaviourEvent::Mdns(mdns::Event::Discovered(found))) => {
                for (peer_id, addr) in found {
                    if peer_id == self.local_peer {
                        continue;
                    }
                    debug!("mDNS discovered peer: {peer_id} at {addr}");
                    self.swarm.add_peer_address(peer_id, addr.clone());
                    self.swarm
                        .behaviour_mut()
                        .kademlia
                        .add_address(&peer_id, addr);
                    if !self.swarm.is_connected(&peer_id) {
                        if let Err(e) = self.swarm.dial(peer_id) {
                            debug!("Dial to mDNS peer {peer_id} failed: {e}");
                        }
                    }
                }
            }
            SwarmEvent::Behaviour(SyncBehaviourEvent::Identify(identify::Event::Received {
                peer_id,
                info,
                ..
            })) => {
                for addr in &info.listen_addrs {
                    self.swarm.add_peer_address(peer_id, addr.clone());
                }
                let Some(device) = device_from_agent(&info.agent_version) else {
                    debug!("Peer {peer_id} is not a device: {:?}", info.agent_version);
                    return;
                };
                info!("Identified device {device} at {peer_id}");
                self.learn_device(peer_id, device);
                if self.pending_dials.contains(&device) {
                    self.open_channel(device).await;
                }
            }
            SwarmEvent::Behaviour(SyncBehaviourEvent::Kademlia(
                kad::Event::OutboundQueryProgressed { id, result, .. },
            )) => self.handle_query_result(id, result).await,
            SwarmEvent::Behaviour(SyncBehaviourEvent::Frames(event)) => {
                self.handle_frame_event(event).await;
            }
            _ => {}
        }
    }

    async fn handle_query_result(&mut self, id: kad::QueryId, result: kad::QueryResult) {
        match result {
            kad::QueryResult::GetRecord(Ok(kad::GetRecordOk::FoundRecord(peer_record))) => {
                let Some(device) = self.pending_lookups.remove(&id) else {
                    return;
                };
                let Some(publisher) = peer_record.record.publisher else {
                    warn!("DHT record for {device} has no publisher");
                    return;
                };
                if publisher == self.local_peer {
                    return;
                }
                info!("DHT resolved device {device} to {publisher}");
                for addr in record_addresses(&peer_record.record.value) {
                    self.swarm.add_peer_address(publisher, addr);
                }
                self.learn_device(publisher, device);
                if self.swarm.is_connected(&publisher) {
                    self.open_channel(device).await;
                } else if let Err(e) = self.swarm.dial(publisher) {
                    self.pending_dials.remove(&device);
                    self.emit(NetworkEvent::DialFailed {
                        peer: device,
                        reason: e.to_string(),
                    })
                    .await;
                }
            }
            kad::QueryResult::GetRecord(Err(e)) => {
                if let Some(device) = self.pending_lookups.remove(&id) {
                    debug!("DHT lookup for {device} failed: {e:?}");
                }
            }
            kad::QueryResult::PutRecord(Ok(_)) => {
                debug!("Published device {} to DHT", self.local_device);
                self.mark_ready();
            }
            kad::QueryResult::PutRecord(Err(e)) => {
                warn!("Failed to publish device to DHT: {e:?}");
            }
            kad::QueryResult::Bootstrap(Ok(_)) => {
                info!("Kademlia bootstrap completed");
                self.publish();
            }
            kad::QueryResult::Bootstrap(Err(e)) => {
                warn!("Kademlia bootstrap failed: {e:?}");
            }
            _ => {}
        }
    }

    async fn handle_frame_event(&mut self, event: request_response::Event<FrameRequest, FrameAck>) {
        match event {
            request_response::Event::Message { peer, message, .. } => match message {
                request_response::Message::Request {
                    request, channel, ..
                } => {
                    if self
                        .swarm
                        .behaviour_mut()
                        .frames
                        .send_response(channel, FrameAck)
                        .is_err()
                    {
                        debug!("Could not acknowledge frame from {peer}");
                    }
                    let device = request.sender;
                    match self.devices.get(&peer) {
                        Some(known) if *known != device => {
                            warn!("Dropping frame from {peer}: bound to {known}, claims {device}");
                            return;
                        }
                        Some(_) => {}
                        None => match self.peers.get(&device) {
                            Some(owner) if *owner != peer && self.swarm.is_connected(owner) => {
                                warn!("Dropping frame from {peer}: {device} is connected as {owner}");
                                return;
                            }
                            _ => self.learn_device(peer, device),
                        },
                    }
                    self.open.insert(device);
                    self.emit(NetworkEvent::Frame {
                        peer: device,
                        bytes: request.body,
                    })
                    .await;
                }
                request_response::Message::Response { request_id, .. } => {
                    if let Some(result_tx) = self.pending_sends.remove(&request_id) {
                        let _ = result_tx.send(Ok(()));
                    }
                }
            },
            request_response::Event::OutboundFailure {
                request_id, error, ..
            } => {
                if let Some(result_tx) = self.pending_sends.remove(&request_id) {
                    let _ = result_tx.send(Err(SyncError::Network(format!(
                        "frame delivery failed: {error}"
                    ))));
                }
            }
            request_response::Event::InboundFailure { peer, error, .. } => {
                warn!("Inbound frame from {peer} failed: {error}");
            }
            request_response::Event::ResponseSent { .. } => {}
        }
    }
}
