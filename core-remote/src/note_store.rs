//! Note store RPC surface consumed by the synchronization core.
//!
//! One note store serves one scope: the user's own account, or a single
//! linked notebook. USNs returned by a store are only comparable with USNs
//! from the same store.

use crate::error::Result;
use crate::request_context::RequestContext;
use async_trait::async_trait;
use core_library::{Guid, LinkedNotebook, Note, Resource, SyncChunk, Usn};
use std::sync::Arc;

/// Which parts of a note `get_note_with_result_spec` returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NoteResultSpec {
    pub include_content: bool,
    pub include_resources_data: bool,
    pub include_resources_recognition: bool,
    pub include_resources_alternate_data: bool,
}

impl NoteResultSpec {
    /// Content plus every resource body.
    pub fn full() -> Self {
        Self {
            include_content: true,
            include_resources_data: true,
            include_resources_recognition: true,
            include_resources_alternate_data: true,
        }
    }
}

/// Entity kinds requested from `get_filtered_sync_chunk`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncChunkFilter {
    pub include_notes: bool,
    /// Resource metadata embedded in each note.
    pub include_note_resources: bool,
    pub include_notebooks: bool,
    pub include_tags: bool,
    pub include_searches: bool,
    /// Standalone resources updated without their note.
    pub include_resources: bool,
    pub include_linked_notebooks: bool,
    pub include_expunged: bool,
}

impl SyncChunkFilter {
    pub fn all() -> Self {
        Self {
            include_notes: true,
            include_note_resources: true,
            include_notebooks: true,
            include_tags: true,
            include_searches: true,
            include_resources: true,
            include_linked_notebooks: true,
            include_expunged: true,
        }
    }
}

impl Default for SyncChunkFilter {
    fn default() -> Self {
        Self::all()
    }
}

#[async_trait]
pub trait NoteStore: Send + Sync {
    /// Linked notebook scope of this store, `None` for the user's own data.
    fn linked_notebook_guid(&self) -> Option<&Guid>;

    fn note_store_url(&self) -> &str;

    async fn get_note_with_result_spec(
        &self,
        guid: &Guid,
        spec: NoteResultSpec,
        ctx: &RequestContext,
    ) -> Result<Note>;

    async fn get_resource(
        &self,
        guid: &Guid,
        with_data: bool,
        ctx: &RequestContext,
    ) -> Result<Resource>;

    /// Entities with USN in `(after_usn, chunk_high_usn]`, at most `max_entries` of them.
    async fn get_filtered_sync_chunk(
        &self,
        after_usn: Usn,
        max_entries: i32,
        filter: &SyncChunkFilter,
        ctx: &RequestContext,
    ) -> Result<SyncChunk>;

    async fn get_linked_notebook_sync_chunk(
        &self,
        linked_notebook: &LinkedNotebook,
        after_usn: Usn,
        max_entries: i32,
        full_sync_only: bool,
        ctx: &RequestContext,
    ) -> Result<SyncChunk>;
}

pub trait NoteStoreFactory: Send + Sync {
    fn create_note_store(
        &self,
        note_store_url: &str,
        linked_notebook_guid: Option<Guid>,
        ctx: &RequestContext,
    ) -> Arc<dyn NoteStore>;
}
