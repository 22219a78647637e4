//! # Note Store Library
//!
//! Owns the local note store consumed by the synchronization core.
//!
//! ## Overview
//!
//! This crate provides:
//! - Domain models for notes, resources, notebooks, tags, saved searches,
//!   linked notebooks and sync chunks
//! - The [`LocalStorage`] capability trait
//! - [`InMemoryLocalStorage`] for tests and ephemeral sessions
//! - [`SqliteLocalStorage`] backed by `sqlx` (feature `sqlite`)

#[cfg(feature = "sqlite")]
pub mod db;
pub mod error;
pub mod memory;
pub mod models;
#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod storage;

pub use error::{LibraryError, Result};
pub use memory::InMemoryLocalStorage;
pub use models::{
    Guid, LinkedNotebook, LocalId, Note, Notebook, Resource, ResourceData, SavedSearch,
    SyncChunk, SyncEntity, Tag, Timestamp, Usn,
};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteLocalStorage;
pub use storage::{FetchNoteOptions, FetchResourceOptions, LocalStorage};
