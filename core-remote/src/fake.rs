//! In-memory note store double.
//!
//! Entities are held in hash maps keyed by guid; a `BTreeMap` ordered by USN
//! records which item (or expunge) each USN was assigned to, which is all
//! that is needed to answer sync chunk requests for `(after_usn, max_entries)`.

use crate::downloaders::{
    DownloaderFactory, ImageFormat, ImageSize, InkNoteImageDownloader, NoteThumbnailDownloader,
};
use crate::error::{EdamErrorCode, RemoteError, Result};
use crate::note_store::{NoteResultSpec, NoteStore, NoteStoreFactory, SyncChunkFilter};
use crate::request_context::RequestContext;
use async_trait::async_trait;
use bytes::Bytes;
use core_library::{
    Guid, LinkedNotebook, LocalId, Note, Notebook, Resource, SavedSearch, SyncChunk, Tag, Usn,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ItemKind {
    Note,
    Notebook,
    Tag,
    SavedSearch,
    Resource,
    LinkedNotebook,
}

#[derive(Debug, Clone)]
enum LogEntry {
    Updated(ItemKind, Guid),
    Expunged(ItemKind, Guid),
}

#[derive(Default)]
struct FakeState {
    notes: HashMap<Guid, Note>,
    notebooks: HashMap<Guid, Notebook>,
    tags: HashMap<Guid, Tag>,
    saved_searches: HashMap<Guid, SavedSearch>,
    resources: HashMap<Guid, Resource>,
    linked_notebooks: HashMap<Guid, LinkedNotebook>,
    usn_log: BTreeMap<Usn, LogEntry>,
    max_usn: Usn,
    note_errors: HashMap<Guid, RemoteError>,
    resource_errors: HashMap<Guid, RemoteError>,
    sync_chunk_error: Option<(Usn, RemoteError)>,
    note_requests: HashMap<Guid, usize>,
    sync_chunk_requests: usize,
}

impl FakeState {
    fn next_usn(&mut self) -> Usn {
        self.max_usn += 1;
        self.max_usn
    }

    fn record(&mut self, previous_usn: Option<Usn>, entry: LogEntry) -> Usn {
        if let Some(previous) = previous_usn {
            self.usn_log.remove(&previous);
        }
        let usn = self.next_usn();
        self.usn_log.insert(usn, entry);
        usn
    }
}

pub struct FakeNoteStore {
    note_store_url: String,
    linked_notebook_guid: Option<Guid>,
    state: Mutex<FakeState>,
}

impl FakeNoteStore {
    /// Store serving the user's own account.
    pub fn new(note_store_url: impl Into<String>) -> Self {
        Self {
            note_store_url: note_store_url.into(),
            linked_notebook_guid: None,
            state: Mutex::new(FakeState::default()),
        }
    }

    pub fn for_linked_notebook(note_store_url: impl Into<String>, linked_notebook_guid: Guid) -> Self {
        Self {
            linked_notebook_guid: Some(linked_notebook_guid),
            ..Self::new(note_store_url)
        }
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn max_usn(&self) -> Usn {
        self.state().max_usn
    }

    /// Stores the note and its resources under a freshly assigned USN.
    /// Missing guids are generated. Returns the stored note.
    pub fn put_note(&self, mut note: Note) -> Note {
        let mut state = self.state();
        let guid = note.guid.get_or_insert_with(Guid::generate).clone();
        let previous = state.notes.get(&guid).and_then(|n| n.update_sequence_num);
        let usn = state.record(previous, LogEntry::Updated(ItemKind::Note, guid.clone()));
        note.update_sequence_num = Some(usn);

        for resource in &mut note.resources {
            let resource_guid = resource.guid.get_or_insert_with(Guid::generate).clone();
            resource.note_guid = Some(guid.clone());
            resource.update_sequence_num.get_or_insert(usn);
            state.resources.insert(resource_guid, resource.clone());
        }

        state.notes.insert(guid, note.clone());
        note
    }

    /// Updates a resource on its own, as happens when only an attachment changes.
    pub fn put_resource(&self, mut resource: Resource) -> Resource {
        let mut state = self.state();
        let guid = resource.guid.get_or_insert_with(Guid::generate).clone();
        let previous = state.resources.get(&guid).and_then(|r| r.update_sequence_num);
        let previous = previous.filter(|usn| {
            matches!(state.usn_log.get(usn), Some(LogEntry::Updated(ItemKind::Resource, _)))
        });
        let usn = state.record(previous, LogEntry::Updated(ItemKind::Resource, guid.clone()));
        resource.update_sequence_num = Some(usn);

        if let Some(note) = resource
            .note_guid
            .as_ref()
            .and_then(|note_guid| state.notes.get_mut(note_guid))
        {
            match note.resources.iter_mut().find(|r| r.guid.as_ref() == Some(&guid)) {
                Some(existing) => *existing = resource.clone(),
                None => note.resources.push(resource.clone()),
            }
        }

        state.resources.insert(guid, resource.clone());
        resource
    }

    pub fn put_notebook(&self, mut notebook: Notebook) -> Notebook {
        let mut state = self.state();
        let guid = notebook.guid.get_or_insert_with(Guid::generate).clone();
        let previous = state.notebooks.get(&guid).and_then(|n| n.update_sequence_num);
        let usn = state.record(previous, LogEntry::Updated(ItemKind::Notebook, guid.clone()));
        notebook.update_sequence_num = Some(usn);
        if notebook.linked_notebook_guid.is_none() {
            notebook.linked_notebook_guid = self.linked_notebook_guid.clone();
        }
        state.notebooks.insert(guid, notebook.clone());
        notebook
    }

    pub fn put_tag(&self, mut tag: Tag) -> Tag {
        let mut state = self.state();
        let guid = tag.guid.get_or_insert_with(Guid::generate).clone();
        let previous = state.tags.get(&guid).and_then(|t| t.update_sequence_num);
        let usn = state.record(previous, LogEntry::Updated(ItemKind::Tag, guid.clone()));
        tag.update_sequence_num = Some(usn);
        if tag.linked_notebook_guid.is_none() {
            tag.linked_notebook_guid = self.linked_notebook_guid.clone();
        }
        state.tags.insert(guid, tag.clone());
        tag
    }

    pub fn put_saved_search(&self, mut search: SavedSearch) -> SavedSearch {
        let mut state = self.state();
        let guid = search.guid.get_or_insert_with(Guid::generate).clone();
        let previous = state.saved_searches.get(&guid).and_then(|s| s.update_sequence_num);
        let usn = state.record(previous, LogEntry::Updated(ItemKind::SavedSearch, guid.clone()));
        search.update_sequence_num = Some(usn);
        state.saved_searches.insert(guid, search.clone());
        search
    }

    pub fn put_linked_notebook(&self, mut linked_notebook: LinkedNotebook) -> LinkedNotebook {
        let mut state = self.state();
        let guid = linked_notebook.guid.get_or_insert_with(Guid::generate).clone();
        let previous = state
            .linked_notebooks
            .get(&guid)
            .and_then(|l| l.update_sequence_num);
        let usn = state.record(
            previous,
            LogEntry::Updated(ItemKind::LinkedNotebook, guid.clone()),
        );
        linked_notebook.update_sequence_num = Some(usn);
        state.linked_notebooks.insert(guid, linked_notebook.clone());
        linked_notebook
    }

    /// Removes the note and its resources. Returns the expunge USN, or
    /// `None` when the guid is unknown.
    pub fn expunge_note(&self, guid: &Guid) -> Option<Usn> {
        let mut state = self.state();
        let note = state.notes.remove(guid)?;
        for resource in &note.resources {
            if let Some(resource_guid) = &resource.guid {
                state.resources.remove(resource_guid);
            }
        }
        Some(state.record(
            note.update_sequence_num,
            LogEntry::Expunged(ItemKind::Note, guid.clone()),
        ))
    }

    pub fn expunge_notebook(&self, guid: &Guid) -> Option<Usn> {
        let mut state = self.state();
        let notebook = state.notebooks.remove(guid)?;
        Some(state.record(
            notebook.update_sequence_num,
            LogEntry::Expunged(ItemKind::Notebook, guid.clone()),
        ))
    }

    pub fn expunge_tag(&self, guid: &Guid) -> Option<Usn> {
        let mut state = self.state();
        let tag = state.tags.remove(guid)?;
        Some(state.record(
            tag.update_sequence_num,
            LogEntry::Expunged(ItemKind::Tag, guid.clone()),
        ))
    }

    pub fn expunge_saved_search(&self, guid: &Guid) -> Option<Usn> {
        let mut state = self.state();
        let search = state.saved_searches.remove(guid)?;
        Some(state.record(
            search.update_sequence_num,
            LogEntry::Expunged(ItemKind::SavedSearch, guid.clone()),
        ))
    }

    pub fn expunge_linked_notebook(&self, guid: &Guid) -> Option<Usn> {
        let mut state = self.state();
        let linked_notebook = state.linked_notebooks.remove(guid)?;
        Some(state.record(
            linked_notebook.update_sequence_num,
            LogEntry::Expunged(ItemKind::LinkedNotebook, guid.clone()),
        ))
    }

    /// Makes every full-data request for `guid` fail with `error`.
    pub fn set_note_error(&self, guid: Guid, error: RemoteError) {
        self.state().note_errors.insert(guid, error);
    }

    pub fn clear_note_error(&self, guid: &Guid) {
        self.state().note_errors.remove(guid);
    }

    pub fn set_resource_error(&self, guid: Guid, error: RemoteError) {
        self.state().resource_errors.insert(guid, error);
    }

    /// Makes sync chunk requests with `after_usn >= from_usn` fail.
    pub fn set_sync_chunk_error(&self, from_usn: Usn, error: RemoteError) {
        self.state().sync_chunk_error = Some((from_usn, error));
    }

    pub fn clear_sync_chunk_error(&self) {
        self.state().sync_chunk_error = None;
    }

    /// Number of `get_note_with_result_spec` calls made for `guid`.
    pub fn note_request_count(&self, guid: &Guid) -> usize {
        self.state().note_requests.get(guid).copied().unwrap_or(0)
    }

    pub fn sync_chunk_request_count(&self) -> usize {
        self.state().sync_chunk_requests
    }

    pub fn note(&self, guid: &Guid) -> Option<Note> {
        self.state().notes.get(guid).cloned()
    }

    fn sync_chunk(
        &self,
        after_usn: Usn,
        max_entries: i32,
        filter: &SyncChunkFilter,
    ) -> Result<SyncChunk> {
        let mut state = self.state();
        state.sync_chunk_requests += 1;

        if let Some((from_usn, error)) = &state.sync_chunk_error {
            if after_usn >= *from_usn {
                return Err(error.clone());
            }
        }

        let mut chunk = SyncChunk {
            current_time: core_async::time::now_millis() as i64,
            update_count: state.max_usn,
            ..Default::default()
        };

        let mut taken = 0;
        for (usn, entry) in state.usn_log.range(after_usn.saturating_add(1)..) {
            if taken >= max_entries.max(1) {
                break;
            }
            chunk.chunk_high_usn = Some(*usn);

            let included = match entry {
                LogEntry::Updated(kind, guid) => push_updated(&state, &mut chunk, *kind, guid, filter),
                LogEntry::Expunged(kind, guid) => {
                    filter.include_expunged && push_expunged(&mut chunk, *kind, guid, filter)
                }
            };
            if included {
                taken += 1;
            }
        }

        Ok(chunk)
    }
}

fn kind_included(kind: ItemKind, filter: &SyncChunkFilter) -> bool {
    match kind {
        ItemKind::Note => filter.include_notes,
        ItemKind::Notebook => filter.include_notebooks,
        ItemKind::Tag => filter.include_tags,
        ItemKind::SavedSearch => filter.include_searches,
        ItemKind::Resource => filter.include_resources,
        ItemKind::LinkedNotebook => filter.include_linked_notebooks,
    }
}

fn push_updated(
    state: &FakeState,
    chunk: &mut SyncChunk,
    kind: ItemKind,
    guid: &Guid,
    filter: &SyncChunkFilter,
) -> bool {
    if !kind_included(kind, filter) {
        return false;
    }

    match kind {
        ItemKind::Note => {
            let Some(note) = state.notes.get(guid) else {
                return false;
            };
            let mut metadata = note.clone();
            metadata.content = None;
            if filter.include_note_resources {
                metadata.resources.iter_mut().for_each(strip_body);
            } else {
                metadata.resources.clear();
            }
            chunk.notes.push(metadata);
        }
        ItemKind::Resource => {
            let Some(resource) = state.resources.get(guid) else {
                return false;
            };
            let mut metadata = resource.clone();
            strip_body(&mut metadata);
            chunk.resources.push(metadata);
        }
        ItemKind::Notebook => match state.notebooks.get(guid) {
            Some(notebook) => chunk.notebooks.push(notebook.clone()),
            None => return false,
        },
        ItemKind::Tag => match state.tags.get(guid) {
            Some(tag) => chunk.tags.push(tag.clone()),
            None => return false,
        },
        ItemKind::SavedSearch => match state.saved_searches.get(guid) {
            Some(search) => chunk.searches.push(search.clone()),
            None => return false,
        },
        ItemKind::LinkedNotebook => match state.linked_notebooks.get(guid) {
            Some(linked_notebook) => chunk.linked_notebooks.push(linked_notebook.clone()),
            None => return false,
        },
    }
    true
}

fn push_expunged(chunk: &mut SyncChunk, kind: ItemKind, guid: &Guid, filter: &SyncChunkFilter) -> bool {
    if !kind_included(kind, filter) {
        return false;
    }

    let list = match kind {
        ItemKind::Note => &mut chunk.expunged_notes,
        ItemKind::Notebook => &mut chunk.expunged_notebooks,
        ItemKind::Tag => &mut chunk.expunged_tags,
        ItemKind::SavedSearch => &mut chunk.expunged_searches,
        ItemKind::LinkedNotebook => &mut chunk.expunged_linked_notebooks,
        ItemKind::Resource => return false,
    };
    list.push(guid.clone());
    true
}

fn strip_body(resource: &mut Resource) {
    if let Some(data) = resource.data.as_mut() {
        data.body = None;
    }
}

#[async_trait]
impl NoteStore for FakeNoteStore {
    fn linked_notebook_guid(&self) -> Option<&Guid> {
        self.linked_notebook_guid.as_ref()
    }

    fn note_store_url(&self) -> &str {
        &self.note_store_url
    }

    async fn get_note_with_result_spec(
        &self,
        guid: &Guid,
        spec: NoteResultSpec,
        _ctx: &RequestContext,
    ) -> Result<Note> {
        let mut state = self.state();
        *state.note_requests.entry(guid.clone()).or_default() += 1;

        if let Some(error) = state.note_errors.get(guid) {
            return Err(error.clone());
        }

        let mut note = state
            .notes
            .get(guid)
            .cloned()
            .ok_or_else(|| RemoteError::not_found("Note.guid", guid.as_str()))?;

        if !spec.include_content {
            note.content = None;
        }
        if !spec.include_resources_data {
            note.resources.iter_mut().for_each(strip_body);
        }
        Ok(note)
    }

    async fn get_resource(
        &self,
        guid: &Guid,
        with_data: bool,
        _ctx: &RequestContext,
    ) -> Result<Resource> {
        let state = self.state();
        if let Some(error) = state.resource_errors.get(guid) {
            return Err(error.clone());
        }

        let mut resource = state
            .resources
            .get(guid)
            .cloned()
            .ok_or_else(|| RemoteError::not_found("Resource.guid", guid.as_str()))?;
        if !with_data {
            strip_body(&mut resource);
        }
        Ok(resource)
    }

    async fn get_filtered_sync_chunk(
        &self,
        after_usn: Usn,
        max_entries: i32,
        filter: &SyncChunkFilter,
        _ctx: &RequestContext,
    ) -> Result<SyncChunk> {
        if self.linked_notebook_guid.is_some() {
            return Err(RemoteError::User {
                code: EdamErrorCode::PermissionDenied,
                parameter: Some("getFilteredSyncChunk".to_string()),
            });
        }
        self.sync_chunk(after_usn, max_entries, filter)
    }

    async fn get_linked_notebook_sync_chunk(
        &self,
        linked_notebook: &LinkedNotebook,
        after_usn: Usn,
        max_entries: i32,
        full_sync_only: bool,
        _ctx: &RequestContext,
    ) -> Result<SyncChunk> {
        if linked_notebook.guid.is_none() || linked_notebook.guid != self.linked_notebook_guid {
            return Err(RemoteError::NotFound {
                identifier: "LinkedNotebook.guid".to_string(),
                key: linked_notebook.guid.as_ref().map(|g| g.to_string()),
            });
        }

        let filter = SyncChunkFilter {
            include_searches: false,
            include_linked_notebooks: false,
            include_expunged: !full_sync_only,
            ..SyncChunkFilter::all()
        };
        self.sync_chunk(after_usn, max_entries, &filter)
    }
}

/// Hands out registered fake stores by scope, creating empty ones on demand.
#[derive(Default)]
pub struct FakeNoteStoreFactory {
    stores: Mutex<HashMap<Option<Guid>, Arc<FakeNoteStore>>>,
    created: Mutex<usize>,
}

impl FakeNoteStoreFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, store: Arc<FakeNoteStore>) {
        self.stores
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(store.linked_notebook_guid.clone(), store);
    }

    /// Number of `create_note_store` calls so far.
    pub fn created_count(&self) -> usize {
        *self.created.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl NoteStoreFactory for FakeNoteStoreFactory {
    fn create_note_store(
        &self,
        note_store_url: &str,
        linked_notebook_guid: Option<Guid>,
        _ctx: &RequestContext,
    ) -> Arc<dyn NoteStore> {
        *self.created.lock().unwrap_or_else(PoisonError::into_inner) += 1;

        let mut stores = self.stores.lock().unwrap_or_else(PoisonError::into_inner);
        let store: Arc<dyn NoteStore> = stores
            .entry(linked_notebook_guid.clone())
            .or_insert_with(|| {
                Arc::new(match linked_notebook_guid {
                    Some(guid) => FakeNoteStore::for_linked_notebook(note_store_url, guid),
                    None => FakeNoteStore::new(note_store_url),
                })
            })
            .clone();
        store
    }
}

/// Kind of image a [`FakeDownloaderFactory`] was asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageRequest {
    Thumbnail { size: u32 },
    InkImage(ImageSize),
}

struct FakeImages {
    thumbnail: std::result::Result<Bytes, RemoteError>,
    ink_image: std::result::Result<Bytes, RemoteError>,
    requests: Mutex<Vec<(ImageRequest, Guid)>>,
}

impl FakeImages {
    fn serve(&self, request: ImageRequest, guid: &Guid) -> Result<Bytes> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((request, guid.clone()));
        match request {
            ImageRequest::Thumbnail { .. } => self.thumbnail.clone(),
            ImageRequest::InkImage(_) => self.ink_image.clone(),
        }
    }
}

/// Serves fixed images, or a fixed error, for every thumbnail and ink request.
pub struct FakeDownloaderFactory {
    images: Arc<FakeImages>,
}

impl FakeDownloaderFactory {
    pub fn new(thumbnail: impl Into<Bytes>, ink_image: impl Into<Bytes>) -> Self {
        Self::with_results(Ok(thumbnail.into()), Ok(ink_image.into()))
    }

    pub fn failing(error: RemoteError) -> Self {
        Self::with_results(Err(error.clone()), Err(error))
    }

    fn with_results(
        thumbnail: std::result::Result<Bytes, RemoteError>,
        ink_image: std::result::Result<Bytes, RemoteError>,
    ) -> Self {
        Self {
            images: Arc::new(FakeImages {
                thumbnail,
                ink_image,
                requests: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Every image request made so far, in order.
    pub fn requests(&self) -> Vec<(ImageRequest, Guid)> {
        self.images
            .requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

struct FakeDownloader(Arc<FakeImages>);

#[async_trait]
impl NoteThumbnailDownloader for FakeDownloader {
    async fn download_note_thumbnail(
        &self,
        note_guid: &Guid,
        size: u32,
        _format: ImageFormat,
        _ctx: &RequestContext,
    ) -> Result<Bytes> {
        self.0.serve(ImageRequest::Thumbnail { size }, note_guid)
    }
}

#[async_trait]
impl InkNoteImageDownloader for FakeDownloader {
    async fn download(
        &self,
        resource_guid: &Guid,
        size: ImageSize,
        _ctx: &RequestContext,
    ) -> Result<Bytes> {
        self.0.serve(ImageRequest::InkImage(size), resource_guid)
    }
}

#[async_trait]
impl DownloaderFactory for FakeDownloaderFactory {
    async fn create_note_thumbnail_downloader(
        &self,
        _notebook_local_id: LocalId,
        _ctx: &RequestContext,
    ) -> Result<Arc<dyn NoteThumbnailDownloader>> {
        Ok(Arc::new(FakeDownloader(self.images.clone())))
    }

    async fn create_ink_note_image_downloader(
        &self,
        _notebook_local_id: LocalId,
        _ctx: &RequestContext,
    ) -> Result<Arc<dyn InkNoteImageDownloader>> {
        Ok(Arc::new(FakeDownloader(self.images.clone())))
    }
}
