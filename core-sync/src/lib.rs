//! # Sync Module
//!
//! Downloads remote changes of a note store account and applies them to
//! local storage.
//!
//! ## Overview
//!
//! A sync run pages through the account's sync chunks and hands them to the
//! entity processors:
//! - Durable entities first (linked notebooks, notebooks, tags, saved
//!   searches), processed one at a time
//! - Notes next, each through its own concurrent download pipeline
//! - Resources that changed without their note last
//!
//! Each processor reports per-entity outcomes through a callback trait and
//! returns an aggregated status. A rate limit or expired authentication
//! stops the remaining downloads of a run.
//!
//! ## Components
//!
//! - **Sync Chunks** (`sync_chunks`): chunk paging and chunk utilities
//! - **Note Store Provider** (`note_store_provider`): resolves the note store
//!   serving a notebook's scope
//! - **Downloaders** (`downloader`): bounded full-data downloads with retries
//! - **Conflict Resolver** (`conflict_resolver`): decides between local and
//!   remote versions
//! - **Processors** (`processors`): reconcile sync chunk contents with local
//!   storage
//! - **Events** (`events`): callback adapters for the event bus

pub mod conflict_resolver;
pub mod downloader;
pub mod error;
pub mod events;
pub mod note_store_provider;
pub mod processors;
pub mod status;
pub mod sync_chunks;

pub use conflict_resolver::{
    ConflictPolicy, ConflictResolution, SimpleSyncConflictResolver, SyncConflictResolver,
};
pub use downloader::{
    NoteFullDataDownloader, NoteFullDataDownloaderImpl, ResourceFullDataDownloader,
    ResourceFullDataDownloaderImpl,
};
pub use error::{Result, StopSynchronizationError, SyncError};
pub use events::{
    emit_stop, EventBusEntitiesCallback, EventBusNotesCallback, EventBusResourcesCallback,
};
pub use note_store_provider::{NoteStoreProvider, NoteStoreProviderImpl};
pub use processors::{
    EntitiesProcessorCallback, LinkedNotebooksProcessor, NotebooksProcessor, NotesProcessor,
    NotesProcessorBuilder, NotesProcessorCallback, ResourcesProcessor, ResourcesProcessorBuilder,
    ResourcesProcessorCallback, SavedSearchesProcessor, TagsProcessor,
};
pub use status::{
    AuxiliaryDownloadFailure, AuxiliaryDownloadKind, DownloadNotesStatus, DownloadResourcesStatus,
    EntitiesProcessingStatus, EntityFailure, GuidWithError, NoteWithError, ResourceWithError,
};
pub use sync_chunks::{SyncChunksProvider, SyncChunksProviderImpl, SyncChunksResult};
