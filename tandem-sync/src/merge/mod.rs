//! Applying a remote snapshot to local stores.
//!
//! Each slice is handled independently under its store's [`SyncPolicy`];
//! a failing store lands in [`MergeReport::errors`] and the rest continue.

mod records;

pub use records::RecordMerge;

use crate::error::SyncResult;
use crate::registry::{RegisteredStore, StoreRegistry, SyncPolicy, SyncStore};
use crate::snapshot::{Snapshot, StoreSlice};
use serde::Serialize;
use std::sync::Arc;
use tandem_types::{StoreName, Timestamp};
use tracing::{debug, info, warn};

/// Outcome of merging one snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    /// Stores whose local data changed.
    pub updated: Vec<String>,
    /// Stores left untouched, including unknown and device-local keys.
    pub skipped: Vec<String>,
    /// Stores whose merge failed.
    pub errors: Vec<MergeFailure>,
}

impl MergeReport {
    /// Whether every store merged without error.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// One store's merge failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeFailure {
    pub store: String,
    pub message: String,
}

enum Outcome {
    Updated,
    Skipped(&'static str),
}

/// Merges remote snapshots into the registered stores.
pub struct SnapshotMerger {
    registry: Arc<StoreRegistry>,
}

impl SnapshotMerger {
    pub fn new(registry: Arc<StoreRegistry>) -> Self {
        Self { registry }
    }

    /// Applies every slice of `remote` and reports what happened.
    pub fn merge_snapshot(&self, remote: &Snapshot) -> MergeReport {
        let mut report = MergeReport::default();

        for (key, slice) in remote.iter() {
            let name = match key.parse::<StoreName>() {
                Ok(name) => name,
                Err(_) => {
                    warn!("Ignoring unknown store {key:?} in snapshot");
                    report.skipped.push(key.clone());
                    continue;
                }
            };
            if name.is_device_local() {
                debug!("Ignoring device-local store {name} in snapshot");
                report.skipped.push(key.clone());
                continue;
            }
            let Some(entry) = self.registry.get(name) else {
                debug!("Store {name} is not registered here, skipping");
                report.skipped.push(key.clone());
                continue;
            };

            match merge_store(entry, slice) {
                Ok(Outcome::Updated) => {
                    debug!("Updated {name} from remote snapshot");
                    report.updated.push(key.clone());
                }
                Ok(Outcome::Skipped(reason)) => {
                    debug!("Skipped {name}: {reason}");
                    report.skipped.push(key.clone());
                }
                Err(e) => {
                    warn!("Merge failed for {name}: {e}");
                    report.errors.push(MergeFailure {
                        store: key.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }

        for key in remote.invalid_slices() {
            report.errors.push(MergeFailure {
                store: key.clone(),
                message: "malformed slice".to_string(),
            });
        }

        info!(
            "Merged snapshot: {} updated, {} skipped, {} failed",
            report.updated.len(),
            report.skipped.len(),
            report.errors.len()
        );
        report
    }
}

fn merge_store(entry: &RegisteredStore, slice: &StoreSlice) -> SyncResult<Outcome> {
    let store = entry.store.as_ref();
    match &entry.policy {
        SyncPolicy::AlwaysReplace => {
            if slice.fields.is_empty() {
                return Ok(Outcome::Skipped("remote slice carries no data"));
            }
            let stamp = slice.last_updated.or_else(|| store.last_updated());
            store.hydrate_from_sync(slice.fields.clone(), stamp)?;
            Ok(Outcome::Updated)
        }
        SyncPolicy::GatedReplace => {
            if let Some(reason) = opt_in_gate(store, slice) {
                return Ok(Outcome::Skipped(reason));
            }
            let local = store.last_updated().unwrap_or(Timestamp::ZERO);
            let remote = slice.last_updated.unwrap_or(Timestamp::ZERO);
            if remote <= local {
                return Ok(Outcome::Skipped("local data is as new or newer"));
            }
            store.hydrate_from_sync(slice.fields.clone(), Some(remote))?;
            Ok(Outcome::Updated)
        }
        SyncPolicy::CustomMerge(merger) => {
            if let Some(reason) = opt_in_gate(store, slice) {
                return Ok(Outcome::Skipped(reason));
            }
            let local = store.domain_fields()?;
            let merged = merger.merge(&local, &slice.fields)?;
            if merged == local {
                return Ok(Outcome::Skipped("nothing newer in remote"));
            }
            let stamp = store.last_updated().max(slice.last_updated);
            store.hydrate_from_sync(merged, stamp)?;
            Ok(Outcome::Updated)
        }
    }
}

fn opt_in_gate(store: &dyn SyncStore, slice: &StoreSlice) -> Option<&'static str> {
    if !slice.is_sync_enabled {
        Some("remote has sync disabled")
    } else if !store.is_sync_enabled() {
        Some("local has sync disabled")
    } else {
        None
    }
}
