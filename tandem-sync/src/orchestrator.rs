//! Sync orchestrator: drives the request/data/complete exchange.
//!
//! The orchestrator consumes envelopes from a [`TransportSession`], answers
//! requests with exported snapshots, merges snapshots it receives, and
//! publishes a coarse [`SyncStatus`] for the UI through a watch channel.
//!
//! Store reads and writes run on the blocking pool, as they may hit SQLite.

use crate::error::{SyncError, SyncResult};
use crate::merge::{MergeReport, SnapshotMerger};
use crate::protocol::{EnvelopeKind, SyncEnvelope};
use crate::registry::StoreRegistry;
use crate::session::{InboundEnvelope, SessionEvent, TransportSession};
use crate::snapshot::{Snapshot, SnapshotExporter};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tandem_types::{DeviceId, SyncStatus};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Where the local device is in an exchange.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SyncPhase {
    #[default]
    Idle,
    /// Connecting and sending `SYNC_REQUEST`.
    Requesting,
    /// Waiting for the peer's `SYNC_DATA`.
    AwaitingData,
    /// Applying a received snapshot.
    Merging,
}

#[derive(Default)]
struct Progress {
    phase: SyncPhase,
    /// The device the current exchange is with, on either side.
    peer: Option<DeviceId>,
    started: Option<Instant>,
    last_report: Option<MergeReport>,
}

/// Coordinates sync exchanges for one device.
pub struct SyncOrchestrator {
    local_id: DeviceId,
    session: Arc<TransportSession>,
    exporter: Arc<SnapshotExporter>,
    merger: Arc<SnapshotMerger>,
    status: watch::Sender<SyncStatus>,
    progress: Mutex<Progress>,
}

impl SyncOrchestrator {
    /// Creates an orchestrator over a session and the registered stores.
    pub fn new(session: Arc<TransportSession>, registry: Arc<StoreRegistry>) -> Self {
        let (status, _) = watch::channel(SyncStatus::Idle);
        Self {
            local_id: session.local_id(),
            exporter: Arc::new(SnapshotExporter::new(Arc::clone(&registry))),
            merger: Arc::new(SnapshotMerger::new(registry)),
            session,
            status,
            progress: Mutex::new(Progress::default()),
        }
    }

    /// The session this orchestrator drives.
    pub fn session(&self) -> &Arc<TransportSession> {
        &self.session
    }

    /// Current coarse status.
    pub fn status(&self) -> SyncStatus {
        *self.status.borrow()
    }

    /// Subscribes to status changes.
    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    /// Current phase.
    pub fn phase(&self) -> SyncPhase {
        self.progress().phase
    }

    /// Report of the most recent merge, if any.
    pub fn last_report(&self) -> Option<MergeReport> {
        self.progress().last_report.clone()
    }

    /// Starts a sync with `peer`: connects (which sends `SYNC_REQUEST`) or,
    /// when a channel is already open, sends a fresh `SYNC_REQUEST` on it.
    ///
    /// On failure the status becomes [`SyncStatus::Error`] and the error is
    /// returned. No retry is attempted.
    pub async fn sync_with(&self, peer: DeviceId) -> SyncResult<()> {
        self.set_status(SyncStatus::Syncing);
        {
            let mut progress = self.progress();
            progress.phase = SyncPhase::Requesting;
            progress.peer = Some(peer);
            progress.started = Some(Instant::now());
        }
        info!("Starting sync with {peer}");

        let result = if self.session.is_open(&peer) {
            self.session
                .send(peer, &SyncEnvelope::request(self.local_id))
                .await
        } else {
            self.session.connect_to_device(peer).await
        };

        match result {
            Ok(()) => {
                self.set_phase(SyncPhase::AwaitingData);
                Ok(())
            }
            Err(e) => {
                error!("Sync with {peer} failed: {e}");
                {
                    let mut progress = self.progress();
                    progress.phase = SyncPhase::Idle;
                    progress.peer = None;
                    progress.started = None;
                }
                self.set_status(SyncStatus::Error);
                Err(e)
            }
        }
    }

    /// Handles one inbound envelope. Errors are logged and reset the status
    /// to idle.
    pub async fn handle_envelope(&self, inbound: InboundEnvelope) {
        let InboundEnvelope { peer_id, envelope } = inbound;
        let kind = envelope.kind;
        if let Err(e) = self.dispatch(peer_id, envelope).await {
            warn!("Handling {kind} from {peer_id} failed: {e}");
            {
                let mut progress = self.progress();
                progress.phase = SyncPhase::Idle;
                progress.peer = None;
            }
            self.set_status(SyncStatus::Idle);
        }
    }

    /// A channel closed. If it carried the current exchange, the exchange is
    /// over and the status returns to idle.
    pub fn handle_channel_closed(&self, peer: DeviceId) {
        let interrupted = {
            let mut progress = self.progress();
            if progress.peer != Some(peer) {
                return;
            }
            progress.phase = SyncPhase::Idle;
            progress.peer = None;
            progress.started.take().is_some()
        };
        if interrupted || self.status() == SyncStatus::Syncing {
            warn!("Channel to {peer} closed mid-sync");
        }
        self.set_status(SyncStatus::Idle);
    }

    /// Processes session events until the session disconnects.
    pub async fn run(&self) {
        while let Some(event) = self.session.next_event().await {
            match event {
                SessionEvent::Envelope(inbound) => self.handle_envelope(inbound).await,
                SessionEvent::ChannelClosed { peer_id } => self.handle_channel_closed(peer_id),
            }
        }
        debug!("Orchestrator for {} stopped", self.local_id);
    }

    /// Runs [`Self::run`] on a background task.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run().await })
    }

    /// Disconnects the session and returns to idle.
    pub async fn shutdown(&self) {
        self.session.disconnect().await;
        {
            let mut progress = self.progress();
            progress.phase = SyncPhase::Idle;
            progress.peer = None;
        }
        self.set_status(SyncStatus::Idle);
    }

    async fn dispatch(&self, peer: DeviceId, envelope: SyncEnvelope) -> SyncResult<()> {
        match envelope.kind {
            EnvelopeKind::SyncRequest => self.on_request(peer).await,
            EnvelopeKind::SyncData => {
                let snapshot = envelope
                    .payload
                    .ok_or_else(|| SyncError::Protocol("SYNC_DATA without payload".into()))?;
                self.on_data(peer, snapshot).await
            }
            EnvelopeKind::SyncComplete => {
                info!("Device {peer} finished merging our snapshot");
                self.finish();
                Ok(())
            }
        }
    }

    async fn on_request(&self, peer: DeviceId) -> SyncResult<()> {
        info!("Sync requested by {peer}");
        self.progress().peer = Some(peer);
        self.set_status(SyncStatus::Syncing);

        let exporter = Arc::clone(&self.exporter);
        let snapshot = tokio::task::spawn_blocking(move || exporter.export_snapshot())
            .await
            .map_err(|e| SyncError::Task(format!("snapshot export: {e}")))?;

        debug!("Sending {} store slices to {peer}", snapshot.len());
        self.session
            .send(peer, &SyncEnvelope::data(self.local_id, snapshot))
            .await
    }

    async fn on_data(&self, peer: DeviceId, snapshot: Snapshot) -> SyncResult<()> {
        info!("Received snapshot from {peer} ({} stores)", snapshot.len());
        {
            let mut progress = self.progress();
            if progress.phase != SyncPhase::AwaitingData || progress.peer != Some(peer) {
                debug!("Snapshot from {peer} was not requested, merging anyway");
            }
            progress.phase = SyncPhase::Merging;
            progress.peer = Some(peer);
        }

        let merger = Arc::clone(&self.merger);
        let report = tokio::task::spawn_blocking(move || merger.merge_snapshot(&snapshot))
            .await
            .map_err(|e| SyncError::Task(format!("snapshot merge: {e}")))?;

        if !report.is_clean() {
            warn!("Snapshot from {peer} merged with {} errors", report.errors.len());
        }
        self.progress().last_report = Some(report);

        self.session
            .send(peer, &SyncEnvelope::complete(self.local_id))
            .await?;
        self.finish();
        Ok(())
    }

    fn finish(&self) {
        let started = {
            let mut progress = self.progress();
            progress.phase = SyncPhase::Idle;
            progress.peer = None;
            progress.started.take()
        };
        if let Some(started) = started {
            info!("Sync finished in {:?}", started.elapsed());
        }
        self.set_status(SyncStatus::Idle);
    }

    fn set_status(&self, status: SyncStatus) {
        let previous = self.status.send_replace(status);
        if previous != status {
            debug!("Sync status: {previous} -> {status}");
        }
    }

    fn set_phase(&self, phase: SyncPhase) {
        self.progress().phase = phase;
    }

    fn progress(&self) -> MutexGuard<'_, Progress> {
        self.progress.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
