//! SQLite storage layer for Tandem.
//!
//! Provides the two persistence primitives the sync subsystem touches:
//!
//! - [`KvStore`]: a durable string key-value table (device identity lives here)
//! - [`DomainStore`]: one domain store's JSON state, including its
//!   `isSyncEnabled` preference and `lastUpdated` timestamp, persisted as a
//!   single blob under `store/<name>`
//!
//! Domain stores deliberately know nothing about sync policies; the sync crate
//! decides how remote data is merged and hands the result back through
//! [`DomainStore::replace_fields`].

mod domain;
mod error;
mod kv;

pub use domain::{DomainStore, StoreState};
pub use error::{StorageError, StorageResult};
pub use kv::{KeyValueStore, KvStore};
