//! Transport session: per-peer channel bookkeeping over a [`PeerNetwork`].
//!
//! The session owns the connection map (at most one entry per remote
//! device), pumps network events in a background task, decodes inbound
//! frames into [`SyncEnvelope`]s, and exposes them through
//! [`TransportSession::recv`].
//!
//! Connection lifecycle per peer:
//! - absent → connecting on [`TransportSession::connect_to_device`]
//! - connecting → open when the network reports the channel
//! - connecting → absent on dial failure or timeout
//! - open → absent when the channel closes or the session disconnects
//!
//! A frame from a peer with no entry is recorded as an inbound open channel.
//! An envelope whose `deviceId` is not the channel's peer is dropped.

use crate::error::{SyncError, SyncResult};
use crate::protocol::SyncEnvelope;
use crate::transport::{NetworkEvent, NetworkEvents, PeerNetwork};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tandem_types::DeviceId;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Timeouts and buffer sizes for a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long network registration may take.
    pub initialize_timeout: Duration,
    /// How long a dial may take before the attempt is abandoned.
    pub connect_timeout: Duration,
    /// Capacity of the inbound envelope queue.
    pub inbound_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            initialize_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(15),
            inbound_buffer: 64,
        }
    }
}

/// One entry in the connection map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionState {
    pub peer_id: DeviceId,
    pub channel_open: bool,
}

/// An envelope received from a peer.
#[derive(Debug, Clone)]
pub struct InboundEnvelope {
    /// The channel the envelope came in on; replies go back here.
    pub peer_id: DeviceId,
    pub envelope: SyncEnvelope,
}

/// What the session delivers to its consumer.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// An envelope arrived.
    Envelope(InboundEnvelope),
    /// The channel to `peer_id` closed, from either side.
    ChannelClosed { peer_id: DeviceId },
}

type Waiter = oneshot::Sender<SyncResult<()>>;

#[derive(Default)]
struct Connections {
    states: HashMap<DeviceId, ConnectionState>,
    waiters: HashMap<DeviceId, Vec<Waiter>>,
}

impl Connections {
    fn settle(&mut self, peer: &DeviceId, result: impl Fn() -> SyncResult<()>) {
        if let Some(waiters) = self.waiters.remove(peer) {
            for waiter in waiters {
                let _ = waiter.send(result());
            }
        }
    }

    fn settle_all(&mut self, result: impl Fn() -> SyncResult<()>) {
        for (_, waiters) in self.waiters.drain() {
            for waiter in waiters {
                let _ = waiter.send(result());
            }
        }
    }
}

fn lock(connections: &Mutex<Connections>) -> MutexGuard<'_, Connections> {
    connections.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Manages channels to remote devices for the local device.
pub struct TransportSession {
    local_id: DeviceId,
    config: SessionConfig,
    network: Arc<dyn PeerNetwork>,
    connections: Arc<Mutex<Connections>>,
    inbound: tokio::sync::Mutex<Option<mpsc::Receiver<SessionEvent>>>,
    pump: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl TransportSession {
    /// Creates a session with default timeouts.
    pub fn new(local_id: DeviceId, network: Arc<dyn PeerNetwork>) -> Self {
        Self::with_config(local_id, network, SessionConfig::default())
    }

    /// Creates a session with explicit timeouts.
    pub fn with_config(
        local_id: DeviceId,
        network: Arc<dyn PeerNetwork>,
        config: SessionConfig,
    ) -> Self {
        Self {
            local_id,
            config,
            network,
            connections: Arc::new(Mutex::new(Connections::default())),
            inbound: tokio::sync::Mutex::new(None),
            pump: tokio::sync::Mutex::new(None),
        }
    }

    /// The local device ID this session registers under.
    pub fn local_id(&self) -> DeviceId {
        self.local_id
    }

    /// Registers with the network. Idempotent while registered.
    pub async fn initialize(&self) -> SyncResult<()> {
        let mut pump = self.pump.lock().await;
        if pump.as_ref().is_some_and(|handle| !handle.is_finished()) {
            debug!("Transport session already initialized");
            return Ok(());
        }

        let registration = timeout(
            self.config.initialize_timeout,
            self.network.register(self.local_id),
        )
        .await;
        let events = match registration {
            Ok(Ok(events)) => events,
            Ok(Err(e)) => {
                error!("Failed to register device {}: {e}", self.local_id);
                return Err(e);
            }
            Err(_) => {
                error!(
                    "Registration of device {} timed out after {:?}",
                    self.local_id, self.config.initialize_timeout
                );
                return Err(SyncError::Timeout {
                    operation: "initialize",
                });
            }
        };

        let (tx, rx) = mpsc::channel(self.config.inbound_buffer);
        *self.inbound.lock().await = Some(rx);
        *pump = Some(tokio::spawn(pump_events(
            events,
            Arc::clone(&self.connections),
            tx,
        )));

        info!("Transport session registered as {}", self.local_id);
        Ok(())
    }

    /// Whether the session is registered with the network.
    pub async fn is_initialized(&self) -> bool {
        self.pump
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Opens a channel to `peer` and, as the dialing side, sends
    /// `SYNC_REQUEST` once it is open.
    ///
    /// Returns immediately when a channel is already open. A concurrent call
    /// for a peer that is still connecting waits on the same attempt.
    pub async fn connect_to_device(&self, peer: DeviceId) -> SyncResult<()> {
        if !self.is_initialized().await {
            return Err(SyncError::NotInitialized);
        }
        if peer == self.local_id {
            return Err(SyncError::Network("cannot connect to own device".into()));
        }

        let (tx, rx) = oneshot::channel();
        let dialer = {
            let mut connections = lock(&self.connections);
            match connections.states.get(&peer) {
                Some(state) if state.channel_open => {
                    debug!("Reusing open channel to {peer}");
                    return Ok(());
                }
                Some(_) => {
                    connections.waiters.entry(peer).or_default().push(tx);
                    false
                }
                None => {
                    connections.states.insert(
                        peer,
                        ConnectionState {
                            peer_id: peer,
                            channel_open: false,
                        },
                    );
                    connections.waiters.entry(peer).or_default().push(tx);
                    true
                }
            }
        };

        if dialer {
            info!("Connecting to device {peer}");
            if let Err(e) = self.network.dial(peer).await {
                let message = e.to_string();
                self.abandon(peer, || Err(SyncError::Network(message.clone())));
                return Err(e);
            }
        }

        match timeout(self.config.connect_timeout, rx).await {
            Ok(Ok(result)) => result?,
            Ok(Err(_)) => return Err(SyncError::ChannelClosed),
            Err(_) => {
                if dialer {
                    warn!(
                        "Connection to {peer} timed out after {:?}",
                        self.config.connect_timeout
                    );
                    self.abandon(peer, || {
                        Err(SyncError::Timeout {
                            operation: "connect",
                        })
                    });
                    if let Err(e) = self.network.close(peer).await {
                        debug!("Closing timed-out channel to {peer}: {e}");
                    }
                }
                return Err(SyncError::Timeout {
                    operation: "connect",
                });
            }
        }

        if dialer {
            self.send(peer, &SyncEnvelope::request(self.local_id))
                .await?;
        }
        Ok(())
    }

    /// Sends an envelope over the open channel to `peer`.
    pub async fn send(&self, peer: DeviceId, envelope: &SyncEnvelope) -> SyncResult<()> {
        if !self.is_open(&peer) {
            return Err(SyncError::PeerNotFound(peer.to_string()));
        }
        let frame = envelope.encode()?;
        debug!("Sending {} to {peer} ({} bytes)", envelope.kind, frame.len());
        self.network.send(peer, frame).await
    }

    /// Waits for the next inbound envelope, skipping channel closes.
    /// Returns `None` once the session is disconnected or was never
    /// initialized.
    pub async fn recv(&self) -> Option<InboundEnvelope> {
        loop {
            match self.next_event().await? {
                SessionEvent::Envelope(inbound) => return Some(inbound),
                SessionEvent::ChannelClosed { .. } => continue,
            }
        }
    }

    /// Waits for the next envelope or channel close. Returns `None` once the
    /// session is disconnected or was never initialized.
    pub async fn next_event(&self) -> Option<SessionEvent> {
        let mut inbound = self.inbound.lock().await;
        match inbound.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    /// Whether a channel to `peer` is open.
    pub fn is_open(&self, peer: &DeviceId) -> bool {
        lock(&self.connections)
            .states
            .get(peer)
            .is_some_and(|state| state.channel_open)
    }

    /// The connection entry for `peer`, if any.
    pub fn connection(&self, peer: &DeviceId) -> Option<ConnectionState> {
        lock(&self.connections).states.get(peer).copied()
    }

    /// All connection entries.
    pub fn connections(&self) -> Vec<ConnectionState> {
        lock(&self.connections).states.values().copied().collect()
    }

    /// Closes every channel and releases the registration.
    ///
    /// Pending connection attempts fail with [`SyncError::ChannelClosed`].
    /// Safe to call repeatedly.
    pub async fn disconnect(&self) {
        let handle = self.pump.lock().await.take();
        // Stop the pump first so no event re-adds an entry after the drain.
        let registered = match handle {
            Some(handle) => {
                handle.abort();
                let _ = handle.await;
                true
            }
            None => false,
        };

        let peers: Vec<DeviceId> = {
            let mut connections = lock(&self.connections);
            connections.settle_all(|| Err(SyncError::ChannelClosed));
            connections.states.drain().map(|(peer, _)| peer).collect()
        };
        for peer in peers {
            if let Err(e) = self.network.close(peer).await {
                debug!("Closing channel to {peer}: {e}");
            }
        }

        if registered {
            if let Err(e) = self.network.unregister().await {
                warn!("Failed to release registration: {e}");
            }
            info!("Transport session for {} disconnected", self.local_id);
        }
    }

    /// Drops a connecting entry and settles its waiters.
    fn abandon(&self, peer: DeviceId, result: impl Fn() -> SyncResult<()>) {
        let mut connections = lock(&self.connections);
        if connections
            .states
            .get(&peer)
            .is_some_and(|state| !state.channel_open)
        {
            connections.states.remove(&peer);
        }
        connections.settle(&peer, result);
    }
}

async fn pump_events(
    mut events: NetworkEvents,
    connections: Arc<Mutex<Connections>>,
    inbound: mpsc::Sender<SessionEvent>,
) {
    while let Some(event) = events.recv().await {
        match event {
            NetworkEvent::ChannelOpened { peer } => {
                let mut connections = lock(&connections);
                connections.states.insert(
                    peer,
                    ConnectionState {
                        peer_id: peer,
                        channel_open: true,
                    },
                );
                connections.settle(&peer, || Ok(()));
                info!("Channel open with {peer}");
            }
            NetworkEvent::ChannelClosed { peer, reason } => {
                {
                    let mut connections = lock(&connections);
                    connections.states.remove(&peer);
                    connections.settle(&peer, || Err(SyncError::ChannelClosed));
                }
                info!(
                    "Channel with {peer} closed: {}",
                    reason.as_deref().unwrap_or("no reason given")
                );
                if inbound
                    .send(SessionEvent::ChannelClosed { peer_id: peer })
                    .await
                    .is_err()
                {
                    debug!("Inbound queue closed, dropping close of {peer}");
                }
            }
            NetworkEvent::DialFailed { peer, reason } => {
                let mut connections = lock(&connections);
                connections.states.remove(&peer);
                connections.settle(&peer, || Err(SyncError::Network(reason.clone())));
                warn!("Dial to {peer} failed: {reason}");
            }
            NetworkEvent::Frame { peer, bytes } => {
                let envelope = match SyncEnvelope::decode(&bytes) {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        warn!("Dropping malformed frame from {peer}: {e}");
                        continue;
                    }
                };
                if envelope.device_id != peer {
                    warn!(
                        "Dropping {} from {peer} claiming to be {}",
                        envelope.kind, envelope.device_id
                    );
                    continue;
                }
                {
                    let mut connections = lock(&connections);
                    if !connections.states.contains_key(&peer) {
                        debug!("Recording inbound channel from {peer}");
                        connections.states.insert(
                            peer,
                            ConnectionState {
                                peer_id: peer,
                                channel_open: true,
                            },
                        );
                    }
                }
                debug!("Received {} from {peer}", envelope.kind);
                if inbound
                    .send(SessionEvent::Envelope(InboundEnvelope {
                        peer_id: peer,
                        envelope,
                    }))
                    .await
                    .is_err()
                {
                    debug!("Inbound queue closed, dropping envelope from {peer}");
                }
            }
        }
    }

    let mut connections = lock(&connections);
    connections.settle_all(|| Err(SyncError::ChannelClosed));
    connections.states.clear();
    info!("Network event stream ended");
}
