//! Persistent device identity.
//!
//! The device ID is generated once, stored under [`DEVICE_ID_KEY`], and reused
//! on every launch. Storage trouble never blocks startup: the caller gets an
//! ephemeral ID for this process instead.

use tandem_storage::KeyValueStore;
use tandem_types::DeviceId;
use tracing::{debug, info, warn};

/// Storage key holding the device ID.
pub const DEVICE_ID_KEY: &str = "tandem.device_id";

/// Returns the persisted device ID, creating and persisting one on first use.
pub fn get_or_create_device_id(store: &dyn KeyValueStore) -> DeviceId {
    match store.get(DEVICE_ID_KEY) {
        Ok(Some(raw)) => match DeviceId::parse(&raw) {
            Ok(id) => {
                debug!("Loaded device ID {id}");
                return id;
            }
            Err(e) => warn!("Stored device ID {raw:?} is invalid ({e}), generating a new one"),
        },
        Ok(None) => {}
        Err(e) => {
            let id = DeviceId::generate();
            warn!("Device ID storage unavailable ({e}), using ephemeral ID {id}");
            return id;
        }
    }

    let id = DeviceId::generate();
    match store.put(DEVICE_ID_KEY, &id.to_string()) {
        Ok(()) => info!("Generated device ID {id}"),
        Err(e) => warn!("Failed to persist device ID ({e}), using ephemeral ID {id}"),
    }
    id
}

/// Forgets the persisted device ID. The next call to
/// [`get_or_create_device_id`] generates a new one.
pub fn reset_device_id(store: &dyn KeyValueStore) -> crate::SyncResult<()> {
    store.delete(DEVICE_ID_KEY)?;
    info!("Device ID reset");
    Ok(())
}
