//! Long-running commands: answering peers and syncing with one.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tandem_sync::{MergeReport, PeerNetwork, SessionConfig, SyncOrchestrator, TransportSession};
use tandem_types::{DeviceId, SyncStatus};
use tracing::info;

use crate::device::LocalDevice;

async fn start(
    device: &LocalDevice,
    network: Arc<dyn PeerNetwork>,
    session_config: SessionConfig,
) -> Result<Arc<SyncOrchestrator>> {
    let session = Arc::new(TransportSession::with_config(
        device.device_id(),
        network,
        session_config,
    ));
    session
        .initialize()
        .await
        .context("joining the peer network")?;
    let registry = Arc::new(device.registry()?);
    Ok(Arc::new(SyncOrchestrator::new(session, registry)))
}

/// Answers sync requests until `shutdown` resolves, then disconnects.
pub async fn serve(
    device: &LocalDevice,
    network: Arc<dyn PeerNetwork>,
    session_config: SessionConfig,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    let orchestrator = start(device, network, session_config).await?;
    let handle = orchestrator.spawn();
    info!("Serving as {}", device.device_id());

    shutdown.await;

    orchestrator.shutdown().await;
    handle.await.context("sync task failed")?;
    Ok(())
}

/// Pulls `peer`'s snapshot into the local stores and returns the merge
/// report. Gives up if no data arrives within `wait`.
pub async fn sync_once(
    device: &LocalDevice,
    network: Arc<dyn PeerNetwork>,
    session_config: SessionConfig,
    peer: DeviceId,
    wait: Duration,
) -> Result<MergeReport> {
    let orchestrator = start(device, network, session_config).await?;
    let handle = orchestrator.spawn();
    let mut status = orchestrator.subscribe_status();

    let outcome = async {
        orchestrator
            .sync_with(peer)
            .await
            .with_context(|| format!("connecting to {peer}"))?;

        let settled = tokio::time::timeout(wait, status.wait_for(|s| *s != SyncStatus::Syncing))
            .await
            .with_context(|| format!("no data from {peer} within {wait:?}"))?
            .map(|s| *s)
            .context("sync status channel closed")?;

        if settled == SyncStatus::Error {
            bail!("sync with {peer} failed");
        }
        orchestrator
            .last_report()
            .with_context(|| format!("sync with {peer} ended without a merge"))
    }
    .await;

    orchestrator.shutdown().await;
    handle.await.context("sync task failed")?;
    outcome
}
