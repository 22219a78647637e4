//! # Core Runtime Module
//!
//! Foundational runtime infrastructure shared by the synchronization crates:
//! - Logging and tracing initialisation
//! - Sync configuration (`SyncOptions`, `SyncConfig`)
//! - Event bus for broadcasting sync progress to UI consumers

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use config::{SyncConfig, SyncConfigBuilder, SyncOptions, SyncOptionsBuilder};
pub use error::{Error, Result};
