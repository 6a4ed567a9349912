//! Peer network abstraction.
//!
//! A [`PeerNetwork`] registers the local device under its device ID, opens
//! ordered reliable channels to other devices by ID, and carries opaque
//! frames over them. Everything it observes arrives on the event stream
//! returned by [`PeerNetwork::register`].

use crate::error::SyncResult;
use async_trait::async_trait;
use tandem_types::DeviceId;
use tokio::sync::mpsc;

/// Something that happened on the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkEvent {
    /// A channel to `peer` is open, whichever side dialed.
    ChannelOpened { peer: DeviceId },
    /// The channel to `peer` went away.
    ChannelClosed {
        peer: DeviceId,
        reason: Option<String>,
    },
    /// A frame arrived from `peer`.
    Frame { peer: DeviceId, bytes: Vec<u8> },
    /// A dial to `peer` failed before a channel opened.
    DialFailed { peer: DeviceId, reason: String },
}

/// Receiving half of a network's event stream.
pub type NetworkEvents = mpsc::Receiver<NetworkEvent>;

/// A device-addressed peer-to-peer network.
#[async_trait]
pub trait PeerNetwork: Send + Sync {
    /// Registers the local device and starts delivering events.
    ///
    /// Fails with [`SyncError::Unsupported`](crate::SyncError::Unsupported)
    /// when the runtime cannot do peer-to-peer networking.
    async fn register(&self, local: DeviceId) -> SyncResult<NetworkEvents>;

    /// Starts opening a channel to `peer`. The outcome is reported as
    /// [`NetworkEvent::ChannelOpened`] or [`NetworkEvent::DialFailed`].
    async fn dial(&self, peer: DeviceId) -> SyncResult<()>;

    /// Sends one frame over the open channel to `peer`.
    async fn send(&self, peer: DeviceId, frame: Vec<u8>) -> SyncResult<()>;

    /// Closes the channel to `peer`, if any.
    async fn close(&self, peer: DeviceId) -> SyncResult<()>;

    /// Releases the registration. Events stop after this.
    async fn unregister(&self) -> SyncResult<()>;
}

/// In-process network for tests and local demos.
pub mod mock {
    use super::*;
    use crate::error::SyncError;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

    const EVENT_BUFFER: usize = 64;

    fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
        mutex.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[derive(Default)]
    struct HubState {
        devices: HashMap<DeviceId, mpsc::Sender<NetworkEvent>>,
        silent: HashSet<DeviceId>,
    }

    /// A signaling hub connecting [`MemoryNetwork`]s by device ID.
    #[derive(Clone, Default)]
    pub struct MemoryHub {
        state: Arc<Mutex<HubState>>,
    }

    impl MemoryHub {
        /// Creates an empty hub.
        pub fn new() -> Self {
            Self::default()
        }

        /// A network attached to this hub.
        pub fn network(&self) -> MemoryNetwork {
            MemoryNetwork::new(self.clone(), true)
        }

        /// A network whose registration always fails as unsupported.
        pub fn unsupported_network(&self) -> MemoryNetwork {
            MemoryNetwork::new(self.clone(), false)
        }

        /// Makes dials to `device` hang forever without an answer.
        pub fn set_silent(&self, device: DeviceId, silent: bool) {
            let mut state = lock(&self.state);
            if silent {
                state.silent.insert(device);
            } else {
                state.silent.remove(&device);
            }
        }

        /// Whether `device` is currently registered.
        pub fn is_registered(&self, device: &DeviceId) -> bool {
            lock(&self.state).devices.contains_key(device)
        }

        /// Delivers raw bytes to `to` as if `from` had sent them.
        /// Returns false when `to` is not registered.
        pub async fn inject_frame(&self, from: DeviceId, to: DeviceId, bytes: Vec<u8>) -> bool {
            let Some(tx) = self.sender(&to) else {
                return false;
            };
            tx.send(NetworkEvent::Frame { peer: from, bytes }).await.is_ok()
        }

        fn sender(&self, device: &DeviceId) -> Option<mpsc::Sender<NetworkEvent>> {
            lock(&self.state).devices.get(device).cloned()
        }

        fn is_silent(&self, device: &DeviceId) -> bool {
            lock(&self.state).silent.contains(device)
        }
    }

    /// One device's view of a [`MemoryHub`].
    pub struct MemoryNetwork {
        hub: MemoryHub,
        supported: bool,
        local: Mutex<Option<DeviceId>>,
        sent: Mutex<Vec<(DeviceId, Vec<u8>)>>,
        dials: AtomicUsize,
    }

    impl MemoryNetwork {
        fn new(hub: MemoryHub, supported: bool) -> Self {
            Self {
                hub,
                supported,
                local: Mutex::new(None),
                sent: Mutex::new(Vec::new()),
                dials: AtomicUsize::new(0),
            }
        }

        /// Every frame sent so far, with its destination.
        pub fn sent_frames(&self) -> Vec<(DeviceId, Vec<u8>)> {
            lock(&self.sent).clone()
        }

        /// Number of dials issued.
        pub fn dial_count(&self) -> usize {
            self.dials.load(Ordering::SeqCst)
        }

        fn local(&self) -> SyncResult<DeviceId> {
            (*lock(&self.local)).ok_or(SyncError::NotInitialized)
        }
    }

    #[async_trait]
    impl PeerNetwork for MemoryNetwork {
        async fn register(&self, local: DeviceId) -> SyncResult<NetworkEvents> {
            if !self.supported {
                return Err(SyncError::Unsupported(
                    "in-memory network built without peer support".into(),
                ));
            }
            let (tx, rx) = mpsc::channel(EVENT_BUFFER);
            lock(&self.hub.state).devices.insert(local, tx);
            *lock(&self.local) = Some(local);
            Ok(rx)
        }

        async fn dial(&self, peer: DeviceId) -> SyncResult<()> {
            let local = self.local()?;
            self.dials.fetch_add(1, Ordering::SeqCst);
            if self.hub.is_silent(&peer) {
                return Ok(());
            }
            let own = self.hub.sender(&local).ok_or(SyncError::NotInitialized)?;
            match self.hub.sender(&peer) {
                Some(remote) => {
                    // The answering side learns about the channel first.
                    let _ = remote.send(NetworkEvent::ChannelOpened { peer: local }).await;
                    let _ = own.send(NetworkEvent::ChannelOpened { peer }).await;
                }
                None => {
                    let _ = own
                        .send(NetworkEvent::DialFailed {
                            peer,
                            reason: "device not registered".into(),
                        })
                        .await;
                }
            }
            Ok(())
        }

        async fn send(&self, peer: DeviceId, frame: Vec<u8>) -> SyncResult<()> {
            let local = self.local()?;
            let remote = self
                .hub
                .sender(&peer)
                .ok_or_else(|| SyncError::PeerNotFound(peer.to_string()))?;
            lock(&self.sent).push((peer, frame.clone()));
            remote
                .send(NetworkEvent::Frame {
                    peer: local,
                    bytes: frame,
                })
                .await
                .map_err(|_| SyncError::ChannelClosed)
        }

        async fn close(&self, peer: DeviceId) -> SyncResult<()> {
            let local = self.local()?;
            if let Some(remote) = self.hub.sender(&peer) {
                let _ = remote
                    .send(NetworkEvent::ChannelClosed {
                        peer: local,
                        reason: Some("closed by peer".into()),
                    })
                    .await;
            }
            Ok(())
        }

        async fn unregister(&self) -> SyncResult<()> {
            if let Some(local) = lock(&self.local).take() {
                lock(&self.hub.state).devices.remove(&local);
            }
            Ok(())
        }
    }
}
