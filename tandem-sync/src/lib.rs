//! Peer-to-peer snapshot sync engine for Tandem.
//!
//! Devices sync directly with each other, addressed by a persisted device
//! ID. There is no server-side copy of user data: a relay only helps devices
//! find each other.
//!
//! # Architecture
//!
//! - **Identity**: a UUID generated once per install and kept in key-value
//!   storage
//! - **Transport**: a [`PeerNetwork`] (libp2p in production, in-memory in
//!   tests) wrapped by a [`TransportSession`] that tracks one channel per peer
//! - **Snapshots**: the [`SnapshotExporter`] serializes every registered
//!   store, withholding data the user did not opt in to sync
//! - **Merge**: the [`SnapshotMerger`] applies each incoming slice under its
//!   store's [`SyncPolicy`]
//! - **Orchestration**: the [`SyncOrchestrator`] runs the exchange and
//!   publishes a coarse [`SyncStatus`](tandem_types::SyncStatus)
//!
//! ## Sync Process
//!
//! 1. **Connect**: the initiator opens a channel to the peer's device ID
//! 2. **Request**: the initiator sends `SYNC_REQUEST`
//! 3. **Data**: the responder answers with `SYNC_DATA` carrying its snapshot
//! 4. **Merge**: the initiator merges and answers `SYNC_COMPLETE`
//!
//! Sync is one-directional per exchange: only the initiator's stores change.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use tandem_storage::DomainStore;
//! use tandem_sync::transport::mock::MemoryHub;
//! use tandem_sync::{StoreRegistry, SyncOrchestrator, TransportSession};
//! use tandem_types::{DeviceId, StoreName};
//!
//! let mut registry = StoreRegistry::new();
//! registry
//!     .register_default(StoreName::Bills, Arc::new(DomainStore::in_memory(StoreName::Bills)))
//!     .unwrap();
//!
//! let hub = MemoryHub::new();
//! let session = Arc::new(TransportSession::new(DeviceId::generate(), Arc::new(hub.network())));
//! let orchestrator = SyncOrchestrator::new(session, Arc::new(registry));
//! assert_eq!(orchestrator.status(), tandem_types::SyncStatus::Idle);
//! ```

mod error;
pub mod identity;
pub mod merge;
mod orchestrator;
pub mod p2p;
pub mod protocol;
pub mod registry;
mod session;
pub mod snapshot;
pub mod transport;

pub use error::{SyncError, SyncResult};
pub use identity::{DEVICE_ID_KEY, get_or_create_device_id, reset_device_id};
pub use merge::{MergeFailure, MergeReport, RecordMerge, SnapshotMerger};
pub use orchestrator::{SyncOrchestrator, SyncPhase};
pub use protocol::{EnvelopeKind, SyncEnvelope};
pub use registry::{RegisteredStore, SliceMerge, StoreRegistry, SyncPolicy, SyncStore};
pub use session::{
    ConnectionState, InboundEnvelope, SessionConfig, SessionEvent, TransportSession,
};
pub use snapshot::{Snapshot, SnapshotExporter, StoreSlice};
pub use transport::{NetworkEvent, NetworkEvents, PeerNetwork};
