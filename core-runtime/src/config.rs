//! # Sync Configuration
//!
//! Two configuration records drive the synchronization core:
//!
//! - [`SyncOptions`]: user-facing switches that change *what* gets
//!   downloaded (note thumbnails, ink note images).
//! - [`SyncConfig`]: engine tuning that changes *how* downloads run
//!   (concurrency, chunk size, retries).
//!
//! Both use a builder that enforces fail-fast validation, and both are
//! serde-serializable so hosts can persist them next to account settings.
//!
//! ## Usage
//!
//! ```
//! use core_runtime::config::{SyncConfig, SyncOptions};
//!
//! let options = SyncOptions::builder()
//!     .download_note_thumbnails(true)
//!     .ink_note_images_storage_dir("/tmp/ink")
//!     .build();
//!
//! let config = SyncConfig::builder()
//!     .max_in_flight_downloads(16)
//!     .build()?;
//! # Ok::<(), core_runtime::Error>(())
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_MAX_IN_FLIGHT_DOWNLOADS: usize = 100;
pub const DEFAULT_MAX_SYNC_CHUNK_ENTRIES: i32 = 50;
pub const DEFAULT_NOTE_THUMBNAIL_SIZE: u32 = 300;
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

const MAX_IN_FLIGHT_DOWNLOADS_LIMIT: usize = 10_000;
const MAX_NOTE_THUMBNAIL_SIZE: u32 = 1_024;

/// Options controlling optional download steps of note processing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncOptions {
    /// Download a rendered thumbnail for every processed note.
    pub download_note_thumbnails: bool,

    /// Directory receiving `<resourceGuid>.png` images of ink notes.
    ///
    /// When unset, ink note images are not downloaded.
    pub ink_note_images_storage_dir: Option<PathBuf>,
}

impl SyncOptions {
    pub fn builder() -> SyncOptionsBuilder {
        SyncOptionsBuilder::default()
    }

    pub fn ink_note_images_storage_dir(&self) -> Option<&Path> {
        self.ink_note_images_storage_dir.as_deref()
    }
}

#[derive(Debug, Default)]
pub struct SyncOptionsBuilder {
    download_note_thumbnails: bool,
    ink_note_images_storage_dir: Option<PathBuf>,
}

impl SyncOptionsBuilder {
    pub fn download_note_thumbnails(mut self, enabled: bool) -> Self {
        self.download_note_thumbnails = enabled;
        self
    }

    pub fn ink_note_images_storage_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.ink_note_images_storage_dir = Some(dir.into());
        self
    }

    pub fn build(self) -> SyncOptions {
        SyncOptions {
            download_note_thumbnails: self.download_note_thumbnails,
            ink_note_images_storage_dir: self
                .ink_note_images_storage_dir
                .filter(|dir| !dir.as_os_str().is_empty()),
        }
    }
}

/// Engine tuning for the synchronization core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Upper bound on concurrently running full-data downloads.
    pub max_in_flight_downloads: usize,

    /// `maxEntries` requested per sync chunk.
    pub max_sync_chunk_entries: i32,

    /// Edge length in pixels of downloaded note thumbnails.
    pub note_thumbnail_size: u32,

    /// Attempts per remote call before a retryable error is reported.
    pub retry_attempts: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_in_flight_downloads: DEFAULT_MAX_IN_FLIGHT_DOWNLOADS,
            max_sync_chunk_entries: DEFAULT_MAX_SYNC_CHUNK_ENTRIES,
            note_thumbnail_size: DEFAULT_NOTE_THUMBNAIL_SIZE,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
        }
    }
}

impl SyncConfig {
    pub fn builder() -> SyncConfigBuilder {
        SyncConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - At least one download may run, and not an absurd number
    /// - Sync chunks request at least one entry
    /// - Thumbnail size is within what the service renders
    /// - At least one attempt is made per remote call
    pub fn validate(&self) -> Result<()> {
        if self.max_in_flight_downloads == 0 {
            return Err(Error::Config(
                "max_in_flight_downloads must be greater than 0".to_string(),
            ));
        }

        if self.max_in_flight_downloads > MAX_IN_FLIGHT_DOWNLOADS_LIMIT {
            return Err(Error::Config(format!(
                "max_in_flight_downloads exceeds maximum of {}",
                MAX_IN_FLIGHT_DOWNLOADS_LIMIT
            )));
        }

        if self.max_sync_chunk_entries <= 0 {
            return Err(Error::Config(
                "max_sync_chunk_entries must be greater than 0".to_string(),
            ));
        }

        if self.note_thumbnail_size == 0 || self.note_thumbnail_size > MAX_NOTE_THUMBNAIL_SIZE {
            return Err(Error::Config(format!(
                "note_thumbnail_size must be in 1..={}",
                MAX_NOTE_THUMBNAIL_SIZE
            )));
        }

        if self.retry_attempts == 0 {
            return Err(Error::Config(
                "retry_attempts must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct SyncConfigBuilder {
    max_in_flight_downloads: Option<usize>,
    max_sync_chunk_entries: Option<i32>,
    note_thumbnail_size: Option<u32>,
    retry_attempts: Option<u32>,
}

impl SyncConfigBuilder {
    pub fn max_in_flight_downloads(mut self, value: usize) -> Self {
        self.max_in_flight_downloads = Some(value);
        self
    }

    pub fn max_sync_chunk_entries(mut self, value: i32) -> Self {
        self.max_sync_chunk_entries = Some(value);
        self
    }

    pub fn note_thumbnail_size(mut self, value: u32) -> Self {
        self.note_thumbnail_size = Some(value);
        self
    }

    pub fn retry_attempts(mut self, value: u32) -> Self {
        self.retry_attempts = Some(value);
        self
    }

    /// Builds the configuration, applying defaults for unset fields.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when any value fails [`SyncConfig::validate`].
    pub fn build(self) -> Result<SyncConfig> {
        let config = SyncConfig {
            max_in_flight_downloads: self
                .max_in_flight_downloads
                .unwrap_or(DEFAULT_MAX_IN_FLIGHT_DOWNLOADS),
            max_sync_chunk_entries: self
                .max_sync_chunk_entries
                .unwrap_or(DEFAULT_MAX_SYNC_CHUNK_ENTRIES),
            note_thumbnail_size: self
                .note_thumbnail_size
                .unwrap_or(DEFAULT_NOTE_THUMBNAIL_SIZE),
            retry_attempts: self.retry_attempts.unwrap_or(DEFAULT_RETRY_ATTEMPTS),
        };

        config.validate()?;

        Ok(config)
    }
}
