//! Device-side driver for Tandem sync.
//!
//! The `tandem` binary is a thin clap front end over these modules:
//! [`config`] loads layered settings, [`logging`] installs tracing,
//! [`device`] owns the local identity and stores, and [`run`] drives the
//! sync engine for `serve` and `sync`.

pub mod config;
pub mod device;
pub mod logging;
pub mod run;

pub use config::{ConfigError, NetworkSettings, TandemConfig, load_config, load_config_from};
pub use device::{LocalDevice, StoreSummary};
