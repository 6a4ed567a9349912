use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::time::Duration;
use tandem_storage::{DomainStore, StoreState};
use tandem_sync::transport::mock::{MemoryHub, MemoryNetwork};
use tandem_sync::{
    EnvelopeKind, SessionConfig, Snapshot, StoreRegistry, StoreSlice, SyncEnvelope, SyncError,
    SyncOrchestrator, SyncPhase, TransportSession,
};
use tandem_types::{DeviceId, StoreName, SyncStatus, Timestamp};

struct Device {
    orchestrator: Arc<SyncOrchestrator>,
    network: Arc<MemoryNetwork>,
    stores: Vec<Arc<DomainStore>>,
}

impl Device {
    fn id(&self) -> DeviceId {
        self.orchestrator.session().local_id()
    }

    fn store(&self, name: StoreName) -> &Arc<DomainStore> {
        self.stores.iter().find(|s| s.name() == name).unwrap()
    }
}

fn fields(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

fn domain(name: StoreName, enabled: bool, last_updated: u64, data: Value) -> Arc<DomainStore> {
    Arc::new(DomainStore::with_state(
        name,
        StoreState {
            is_sync_enabled: enabled,
            last_updated: Some(Timestamp::from_millis(last_updated)),
            fields: fields(data),
        },
    ))
}

async fn device(hub: &MemoryHub, stores: Vec<Arc<DomainStore>>) -> Device {
    let mut registry = StoreRegistry::new();
    for store in &stores {
        registry.register_default(store.name(), Arc::clone(store) as _).unwrap();
    }
    let network = Arc::new(hub.network());
    let session = Arc::new(TransportSession::with_config(
        DeviceId::generate(),
        Arc::clone(&network) as _,
        SessionConfig {
            connect_timeout: Duration::from_millis(200),
            ..SessionConfig::default()
        },
    ));
    session.initialize().await.unwrap();
    let orchestrator = Arc::new(SyncOrchestrator::new(session, Arc::new(registry)));
    orchestrator.spawn();
    Device {
        orchestrator,
        network,
        stores,
    }
}

async fn until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached");
}

fn sent(device: &Device, kind: EnvelopeKind) -> Vec<SyncEnvelope> {
    device
        .network
        .sent_frames()
        .iter()
        .filter_map(|(_, bytes)| SyncEnvelope::decode(bytes).ok())
        .filter(|envelope| envelope.kind == kind)
        .collect()
}

// ── End to end ──────────────────────────────────────────────────

#[tokio::test]
async fn initiator_pulls_newer_data() {
    let hub = MemoryHub::new();
    let a = device(&hub, vec![domain(StoreName::Bills, true, 100, json!({"bills": {"a": 1}}))]).await;
    let b = device(&hub, vec![domain(StoreName::Bills, true, 200, json!({"bills": {"b": 2}}))]).await;

    a.orchestrator.sync_with(b.id()).await.unwrap();
    until(|| a.orchestrator.last_report().is_some()).await;

    let report = a.orchestrator.last_report().unwrap();
    assert_eq!(report.updated, ["bills"]);
    assert_eq!(
        a.store(StoreName::Bills).fields().unwrap(),
        fields(json!({"bills": {"b": 2}}))
    );
    // One-directional: the responder keeps its own data.
    assert_eq!(
        b.store(StoreName::Bills).fields().unwrap(),
        fields(json!({"bills": {"b": 2}}))
    );

    until(|| b.orchestrator.status() == SyncStatus::Idle).await;
    until(|| a.orchestrator.status() == SyncStatus::Idle).await;
    assert_eq!(a.orchestrator.phase(), SyncPhase::Idle);
    assert_eq!(sent(&a, EnvelopeKind::SyncComplete).len(), 1);
}

#[tokio::test]
async fn opted_out_store_is_never_transmitted() {
    let hub = MemoryHub::new();
    let a = device(&hub, vec![domain(StoreName::Vault, true, 1, json!({"vault": {}}))]).await;
    let b = device(&hub, vec![domain(StoreName::Vault, false, 999, json!({"vault": {"pin": "1234"}}))]).await;

    a.orchestrator.sync_with(b.id()).await.unwrap();
    until(|| a.orchestrator.last_report().is_some()).await;

    let data = sent(&b, EnvelopeKind::SyncData);
    assert_eq!(data.len(), 1);
    let wire = serde_json::to_value(data[0].payload.as_ref().unwrap()).unwrap();
    assert_eq!(wire, json!({"vault": {"isSyncEnabled": false}}));
    assert_eq!(a.store(StoreName::Vault).fields().unwrap(), fields(json!({"vault": {}})));
}

#[tokio::test]
async fn habits_merge_across_devices() {
    let hub = MemoryHub::new();
    let a = device(
        &hub,
        vec![domain(
            StoreName::Habits,
            true,
            1,
            json!({"habits": {"h": {"updatedAt": 5, "completionHistory": {"mon": true}}}}),
        )],
    )
    .await;
    let b = device(
        &hub,
        vec![domain(
            StoreName::Habits,
            true,
            1,
            json!({"habits": {"h": {"updatedAt": 5, "completionHistory": {"tue": true}}}}),
        )],
    )
    .await;

    a.orchestrator.sync_with(b.id()).await.unwrap();
    until(|| a.orchestrator.last_report().is_some()).await;

    let habits = a.store(StoreName::Habits).fields().unwrap();
    assert_eq!(
        habits["habits"]["h"]["completionHistory"],
        json!({"mon": true, "tue": true})
    );
}

#[tokio::test]
async fn repeat_sync_reuses_channel_with_fresh_request() {
    let hub = MemoryHub::new();
    let a = device(&hub, vec![domain(StoreName::Bills, true, 1, json!({}))]).await;
    let b = device(&hub, vec![domain(StoreName::Bills, true, 1, json!({}))]).await;

    a.orchestrator.sync_with(b.id()).await.unwrap();
    until(|| sent(&a, EnvelopeKind::SyncComplete).len() == 1).await;
    a.orchestrator.sync_with(b.id()).await.unwrap();
    until(|| sent(&a, EnvelopeKind::SyncComplete).len() == 2).await;

    assert_eq!(a.network.dial_count(), 1);
    assert_eq!(sent(&a, EnvelopeKind::SyncRequest).len(), 2);
    assert_eq!(sent(&b, EnvelopeKind::SyncData).len(), 2);
}

// ── Status ──────────────────────────────────────────────────────

#[tokio::test]
async fn failed_connect_sets_error_status() {
    let hub = MemoryHub::new();
    let a = device(&hub, vec![]).await;
    let silent = DeviceId::generate();
    hub.set_silent(silent, true);

    let mut status = a.orchestrator.subscribe_status();
    let err = a.orchestrator.sync_with(silent).await.unwrap_err();

    assert!(matches!(err, SyncError::Timeout { .. }));
    assert_eq!(a.orchestrator.status(), SyncStatus::Error);
    assert!(status.has_changed().unwrap());
    assert_eq!(*status.borrow_and_update(), SyncStatus::Error);
    assert_eq!(a.orchestrator.phase(), SyncPhase::Idle);
}

#[tokio::test]
async fn handler_failure_resets_to_idle() {
    let hub = MemoryHub::new();
    let b = device(&hub, vec![domain(StoreName::Bills, true, 1, json!({}))]).await;
    let stranger = DeviceId::generate();

    // The stranger is not registered, so the reply cannot be delivered.
    let request = SyncEnvelope::request(stranger).encode().unwrap();
    hub.inject_frame(stranger, b.id(), request).await;

    until(|| b.orchestrator.session().connection(&stranger).is_some()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(b.orchestrator.status(), SyncStatus::Idle);
    assert!(sent(&b, EnvelopeKind::SyncData).is_empty());
}

#[tokio::test]
async fn requester_hanging_up_returns_responder_to_idle() {
    let hub = MemoryHub::new();
    let b = device(&hub, vec![domain(StoreName::Bills, true, 1, json!({"bills": {}}))]).await;
    let a = TransportSession::new(DeviceId::generate(), Arc::new(hub.network()));
    a.initialize().await.unwrap();

    a.connect_to_device(b.id()).await.unwrap();
    let reply = tokio::time::timeout(Duration::from_secs(2), a.recv())
        .await
        .expect("no reply arrived")
        .unwrap();
    assert_eq!(reply.envelope.kind, EnvelopeKind::SyncData);
    // The requester never sends SYNC_COMPLETE.
    a.disconnect().await;

    until(|| b.orchestrator.status() == SyncStatus::Idle).await;
    assert_eq!(b.orchestrator.phase(), SyncPhase::Idle);
    assert!(!b.orchestrator.session().is_open(&a.local_id()));
}

#[tokio::test]
async fn responder_hanging_up_returns_initiator_to_idle() {
    let hub = MemoryHub::new();
    let a = device(&hub, vec![]).await;
    let b = TransportSession::new(DeviceId::generate(), Arc::new(hub.network()));
    b.initialize().await.unwrap();

    a.orchestrator.sync_with(b.local_id()).await.unwrap();
    assert_eq!(a.orchestrator.phase(), SyncPhase::AwaitingData);
    b.disconnect().await;

    until(|| a.orchestrator.status() == SyncStatus::Idle).await;
    assert_eq!(a.orchestrator.phase(), SyncPhase::Idle);
    assert!(a.orchestrator.last_report().is_none());
}

#[tokio::test]
async fn unrelated_channel_closing_leaves_exchange_alone() {
    let hub = MemoryHub::new();
    let a = device(&hub, vec![]).await;
    let b = TransportSession::new(DeviceId::generate(), Arc::new(hub.network()));
    b.initialize().await.unwrap();
    let c = TransportSession::new(DeviceId::generate(), Arc::new(hub.network()));
    c.initialize().await.unwrap();

    c.connect_to_device(a.id()).await.unwrap();
    tokio::time::timeout(Duration::from_secs(2), c.recv())
        .await
        .expect("no reply arrived")
        .unwrap();
    a.orchestrator.sync_with(b.local_id()).await.unwrap();
    c.disconnect().await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(a.orchestrator.phase(), SyncPhase::AwaitingData);
    assert_eq!(a.orchestrator.status(), SyncStatus::Syncing);
}

#[tokio::test]
async fn unsolicited_snapshot_is_still_merged() {
    let hub = MemoryHub::new();
    let a = device(&hub, vec![domain(StoreName::Bills, true, 1, json!({"bills": {}}))]).await;
    let stranger = TransportSession::new(DeviceId::generate(), Arc::new(hub.network()));
    stranger.initialize().await.unwrap();

    let mut snapshot = Snapshot::new();
    snapshot.insert(
        StoreName::Bills,
        StoreSlice::enabled(Timestamp::from_millis(50), fields(json!({"bills": {"x": 1}}))),
    );
    let data = SyncEnvelope::data(stranger.local_id(), snapshot).encode().unwrap();
    assert!(hub.inject_frame(stranger.local_id(), a.id(), data).await);

    until(|| a.orchestrator.last_report().is_some()).await;
    assert_eq!(a.orchestrator.last_report().unwrap().updated, ["bills"]);
    assert_eq!(
        a.store(StoreName::Bills).fields().unwrap(),
        fields(json!({"bills": {"x": 1}}))
    );
    until(|| a.orchestrator.status() == SyncStatus::Idle).await;
}

#[tokio::test]
async fn shutdown_stops_the_run_loop() {
    let hub = MemoryHub::new();
    let mut registry = StoreRegistry::new();
    registry
        .register_default(StoreName::Bills, domain(StoreName::Bills, true, 1, json!({})))
        .unwrap();
    let session = Arc::new(TransportSession::new(DeviceId::generate(), Arc::new(hub.network())));
    session.initialize().await.unwrap();
    let orchestrator = Arc::new(SyncOrchestrator::new(Arc::clone(&session), Arc::new(registry)));
    let handle = orchestrator.spawn();

    orchestrator.shutdown().await;

    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("run loop did not stop")
        .unwrap();
    assert_eq!(orchestrator.status(), SyncStatus::Idle);
    assert!(!hub.is_registered(&session.local_id()));
}
