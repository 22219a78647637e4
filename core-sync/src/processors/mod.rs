//! Entity processors.
//!
//! Each processor consumes the entities of one kind from a batch of sync
//! chunks, reconciles them against local storage and reports the outcome
//! both through a callback and an aggregated status.

pub mod entities;
pub mod notes;
pub mod resources;

pub use entities::{
    DurableEntityKind, DurableEntityProcessor, EntitiesProcessorCallback, LinkedNotebooksProcessor,
    NotebookKind, NotebooksProcessor, SavedSearchKind, SavedSearchesProcessor, TagKind,
    TagsProcessor,
};
pub use notes::{NotesProcessor, NotesProcessorBuilder, NotesProcessorCallback};
pub use resources::{ResourcesProcessor, ResourcesProcessorBuilder, ResourcesProcessorCallback};

use crate::error::{Result, SyncError};
use core_async::sync::Mutex;
use std::sync::Arc;

/// Fails builder validation when a required collaborator is missing.
pub(crate) fn required<T>(value: Option<T>, processor: &str, dependency: &str) -> Result<T> {
    value.ok_or_else(|| {
        SyncError::InvalidArgument(format!("{} requires {}", processor, dependency))
    })
}

/// How a remote entity landed in local storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EntityChange {
    New,
    Updated,
}

/// Takes the final status out of its lock once every pipeline has finished.
pub(crate) async fn into_final_status<S: Clone>(status: Arc<Mutex<S>>) -> Arc<S> {
    match Arc::try_unwrap(status) {
        Ok(status) => Arc::new(status.into_inner()),
        Err(shared) => Arc::new(shared.lock().await.clone()),
    }
}
