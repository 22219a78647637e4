//! Scope resolution: which note store serves a given notebook or note.
//!
//! A notebook belongs either to the user's own account or to one linked
//! notebook; each scope has its own note store URL. Store handles are cached
//! per scope.

use crate::error::{Result, SyncError};
use async_trait::async_trait;
use core_async::sync::Mutex;
use core_library::{FetchNoteOptions, Guid, LocalId, LocalStorage, Notebook};
use core_remote::{NoteStore, NoteStoreFactory, RequestContext};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::debug;

pub const DEFAULT_NOTE_STORE_CACHE_CAPACITY: usize = 16;

#[async_trait]
pub trait NoteStoreProvider: Send + Sync {
    async fn note_store_for_notebook(
        &self,
        notebook_local_id: LocalId,
        ctx: &RequestContext,
    ) -> Result<Arc<dyn NoteStore>>;

    async fn note_store_for_notebook_guid(
        &self,
        notebook_guid: &Guid,
        ctx: &RequestContext,
    ) -> Result<Arc<dyn NoteStore>>;

    async fn note_store_for_note(
        &self,
        note_local_id: LocalId,
        ctx: &RequestContext,
    ) -> Result<Arc<dyn NoteStore>>;

    async fn user_own_note_store(&self, ctx: &RequestContext) -> Result<Arc<dyn NoteStore>>;

    async fn linked_notebook_note_store(
        &self,
        linked_notebook_guid: &Guid,
        ctx: &RequestContext,
    ) -> Result<Arc<dyn NoteStore>>;
}

pub struct NoteStoreProviderImpl {
    local_storage: Arc<dyn LocalStorage>,
    note_store_factory: Arc<dyn NoteStoreFactory>,
    user_own_note_store_url: String,
    /// Keyed by linked notebook guid; `None` is the user's own store.
    cache: Mutex<LruCache<Option<Guid>, Arc<dyn NoteStore>>>,
}

impl NoteStoreProviderImpl {
    pub fn new(
        local_storage: Arc<dyn LocalStorage>,
        note_store_factory: Arc<dyn NoteStoreFactory>,
        user_own_note_store_url: impl Into<String>,
    ) -> Result<Self> {
        Self::with_cache_capacity(
            local_storage,
            note_store_factory,
            user_own_note_store_url,
            DEFAULT_NOTE_STORE_CACHE_CAPACITY,
        )
    }

    pub fn with_cache_capacity(
        local_storage: Arc<dyn LocalStorage>,
        note_store_factory: Arc<dyn NoteStoreFactory>,
        user_own_note_store_url: impl Into<String>,
        cache_capacity: usize,
    ) -> Result<Self> {
        let user_own_note_store_url = user_own_note_store_url.into();
        if user_own_note_store_url.is_empty() {
            return Err(SyncError::InvalidArgument(
                "user own note store url is empty".to_string(),
            ));
        }
        let capacity = NonZeroUsize::new(cache_capacity).ok_or_else(|| {
            SyncError::InvalidArgument("note store cache capacity must be non-zero".to_string())
        })?;

        Ok(Self {
            local_storage,
            note_store_factory,
            user_own_note_store_url,
            cache: Mutex::new(LruCache::new(capacity)),
        })
    }

    /// Drops every cached store, e.g. after re-authentication.
    pub async fn clear_cache(&self) {
        self.cache.lock().await.clear();
    }

    async fn store_for_scope(
        &self,
        linked_notebook_guid: Option<&Guid>,
        ctx: &RequestContext,
    ) -> Result<Arc<dyn NoteStore>> {
        let key = linked_notebook_guid.cloned();
        if let Some(store) = self.cache.lock().await.get(&key) {
            return Ok(store.clone());
        }

        let url = match linked_notebook_guid {
            None => self.user_own_note_store_url.clone(),
            Some(guid) => {
                let linked_notebook = self
                    .local_storage
                    .find_linked_notebook_by_guid(guid)
                    .await?
                    .ok_or_else(|| SyncError::not_found("linked notebook", guid))?;
                linked_notebook.note_store_url.ok_or_else(|| {
                    SyncError::InvalidArgument(format!(
                        "linked notebook {} has no note store url",
                        guid
                    ))
                })?
            }
        };

        debug!(linked_notebook_guid = ?key, url = %url, "Creating note store");
        let store = self
            .note_store_factory
            .create_note_store(&url, key.clone(), ctx);
        self.cache.lock().await.put(key, store.clone());
        Ok(store)
    }

    async fn store_for(&self, notebook: Notebook, ctx: &RequestContext) -> Result<Arc<dyn NoteStore>> {
        self.store_for_scope(notebook.linked_notebook_guid.as_ref(), ctx)
            .await
    }
}

#[async_trait]
impl NoteStoreProvider for NoteStoreProviderImpl {
    async fn note_store_for_notebook(
        &self,
        notebook_local_id: LocalId,
        ctx: &RequestContext,
    ) -> Result<Arc<dyn NoteStore>> {
        let notebook = self
            .local_storage
            .find_notebook_by_local_id(notebook_local_id)
            .await?
            .ok_or_else(|| SyncError::not_found("notebook", notebook_local_id))?;
        self.store_for(notebook, ctx).await
    }

    async fn note_store_for_notebook_guid(
        &self,
        notebook_guid: &Guid,
        ctx: &RequestContext,
    ) -> Result<Arc<dyn NoteStore>> {
        let notebook = self
            .local_storage
            .find_notebook_by_guid(notebook_guid)
            .await?
            .ok_or_else(|| SyncError::not_found("notebook", notebook_guid))?;
        self.store_for(notebook, ctx).await
    }

    async fn note_store_for_note(
        &self,
        note_local_id: LocalId,
        ctx: &RequestContext,
    ) -> Result<Arc<dyn NoteStore>> {
        let note = self
            .local_storage
            .find_note_by_local_id(note_local_id, FetchNoteOptions::NOTE_ONLY)
            .await?
            .ok_or_else(|| SyncError::not_found("note", note_local_id))?;

        match (note.notebook_local_id, note.notebook_guid.as_ref()) {
            (Some(notebook_local_id), _) => {
                self.note_store_for_notebook(notebook_local_id, ctx).await
            }
            (None, Some(notebook_guid)) => {
                self.note_store_for_notebook_guid(notebook_guid, ctx).await
            }
            (None, None) => Err(SyncError::InvalidArgument(format!(
                "note {} has no notebook",
                note_local_id
            ))),
        }
    }

    async fn user_own_note_store(&self, ctx: &RequestContext) -> Result<Arc<dyn NoteStore>> {
        self.store_for_scope(None, ctx).await
    }

    async fn linked_notebook_note_store(
        &self,
        linked_notebook_guid: &Guid,
        ctx: &RequestContext,
    ) -> Result<Arc<dyn NoteStore>> {
        self.store_for_scope(Some(linked_notebook_guid), ctx).await
    }
}
