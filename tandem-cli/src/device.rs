//! The local device: its identity, its syncable stores and the registry the
//! sync engine runs over.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use serde_json::{Map, Value};
use tandem_storage::{DomainStore, KvStore};
use tandem_sync::{
    Snapshot, SnapshotExporter, StoreRegistry, get_or_create_device_id, reset_device_id,
};
use tandem_types::{DeviceId, StoreName, Timestamp};
use tracing::info;

/// Database file inside the data directory.
pub const DATABASE_FILE: &str = "tandem.db";

/// One row of `tandem stores`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSummary {
    pub name: StoreName,
    pub is_sync_enabled: bool,
    pub last_updated: Option<Timestamp>,
}

/// Identity and stores of this device, persisted under one data directory.
pub struct LocalDevice {
    kv: Arc<KvStore>,
    device_id: DeviceId,
    stores: Vec<Arc<DomainStore>>,
}

impl LocalDevice {
    /// Opens (or creates) the device's database in `data_dir`.
    pub fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("creating data directory {}", data_dir.display()))?;
        let path = Self::database_path(data_dir);
        let kv = Arc::new(
            KvStore::open(&path).with_context(|| format!("opening {}", path.display()))?,
        );
        let device_id = get_or_create_device_id(kv.as_ref());

        let stores = StoreName::SYNCABLE
            .iter()
            .map(|&name| {
                DomainStore::open(name, Arc::clone(&kv) as _)
                    .map(Arc::new)
                    .with_context(|| format!("loading store {name}"))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            kv,
            device_id,
            stores,
        })
    }

    pub fn database_path(data_dir: &Path) -> PathBuf {
        data_dir.join(DATABASE_FILE)
    }

    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    /// Forgets the persisted device ID; a new one is generated on next open.
    pub fn reset_identity(&self) -> Result<()> {
        reset_device_id(self.kv.as_ref()).context("resetting device ID")
    }

    /// Looks up a syncable store. Device-local stores are never opened here.
    pub fn store(&self, name: StoreName) -> Result<&Arc<DomainStore>> {
        if name.is_device_local() {
            bail!("{name} is device-local and never syncs");
        }
        self.stores
            .iter()
            .find(|s| s.name() == name)
            .with_context(|| format!("store {name} is not available"))
    }

    pub fn summaries(&self) -> Vec<StoreSummary> {
        self.stores
            .iter()
            .map(|s| StoreSummary {
                name: s.name(),
                is_sync_enabled: s.is_sync_enabled(),
                last_updated: s.last_updated(),
            })
            .collect()
    }

    /// Opts a store in or out of sync.
    pub fn set_sync_enabled(&self, name: StoreName, enabled: bool) -> Result<()> {
        self.store(name)?
            .set_sync_enabled(enabled)
            .with_context(|| format!("updating store {name}"))?;
        info!("Sync {} for {name}", if enabled { "enabled" } else { "disabled" });
        Ok(())
    }

    /// Replaces a store's domain fields with the JSON object in `file`.
    pub fn import(&self, name: StoreName, file: &Path) -> Result<()> {
        let raw = std::fs::read_to_string(file)
            .with_context(|| format!("reading {}", file.display()))?;
        let value: Value =
            serde_json::from_str(&raw).with_context(|| format!("parsing {}", file.display()))?;
        self.import_value(name, value)
    }

    /// Replaces a store's domain fields with `value`, which must be an object.
    /// The reserved `isSyncEnabled` and `lastUpdated` keys are ignored.
    pub fn import_value(&self, name: StoreName, value: Value) -> Result<()> {
        let Value::Object(mut fields) = value else {
            bail!("{name} data must be a JSON object");
        };
        fields.remove("isSyncEnabled");
        fields.remove("lastUpdated");
        self.store(name)?
            .replace_fields(fields, Some(Timestamp::now()))
            .with_context(|| format!("writing store {name}"))?;
        info!("Imported data into {name}");
        Ok(())
    }

    /// Builds the registry the sync engine runs over, with each store's
    /// default policy.
    pub fn registry(&self) -> Result<StoreRegistry> {
        let mut registry = StoreRegistry::new();
        for store in &self.stores {
            registry
                .register_default(store.name(), Arc::clone(store) as _)
                .with_context(|| format!("registering store {}", store.name()))?;
        }
        Ok(registry)
    }

    /// The snapshot a peer would receive from this device.
    pub fn export(&self) -> Result<Snapshot> {
        Ok(SnapshotExporter::new(Arc::new(self.registry()?)).export_snapshot())
    }

    /// Domain fields of one store.
    pub fn fields(&self, name: StoreName) -> Result<Map<String, Value>> {
        self.store(name)?
            .fields()
            .with_context(|| format!("reading store {name}"))
    }
}
