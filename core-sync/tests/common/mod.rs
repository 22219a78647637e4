//! Shared fixtures for the sync integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use core_async::sync::Notify;
use core_library::{
    FetchNoteOptions, FetchResourceOptions, Guid, InMemoryLocalStorage, LibraryError,
    LinkedNotebook, LocalId, LocalStorage, Note, Notebook, Resource, SavedSearch, SyncChunk, Tag, Usn,
};
use core_remote::fake::{FakeDownloaderFactory, FakeNoteStore, FakeNoteStoreFactory};
use core_remote::{ExponentialRetryPolicy, NoteStore, RequestContext, RetryPolicy};
use core_runtime::{SyncConfig, SyncOptions};
use core_sync::{
    AuxiliaryDownloadKind, ConflictPolicy, NoteFullDataDownloader, NoteFullDataDownloaderImpl,
    NoteStoreProviderImpl, NotesProcessor, NotesProcessorCallback, SimpleSyncConflictResolver,
    SyncConflictResolver, SyncError,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const USER_STORE_URL: &str = "https://example.com/shard/s1/notestore";
pub const NOTEBOOK_GUID: &str = "notebook-1";

pub fn fast_retry() -> Option<Arc<dyn RetryPolicy>> {
    Some(Arc::new(
        ExponentialRetryPolicy::new(3).with_initial_delay(Duration::ZERO),
    ))
}

/// Local storage, the user's own remote store and the collaborators wired
/// between them.
pub struct Harness {
    pub storage: Arc<InMemoryLocalStorage>,
    pub remote: Arc<FakeNoteStore>,
    pub factory: Arc<FakeNoteStoreFactory>,
    pub provider: Arc<NoteStoreProviderImpl>,
    pub notebook: Notebook,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_storage(Arc::new(InMemoryLocalStorage::new())).await
    }

    pub async fn with_storage(storage: Arc<InMemoryLocalStorage>) -> Self {
        let remote = Arc::new(FakeNoteStore::new(USER_STORE_URL));
        let factory = Arc::new(FakeNoteStoreFactory::new());
        factory.register(remote.clone());

        let notebook = Notebook {
            guid: Some(Guid::new(NOTEBOOK_GUID)),
            update_sequence_num: Some(1),
            name: Some("Inbox".to_string()),
            default_notebook: true,
            ..Default::default()
        };
        storage.put_notebook(notebook.clone()).await.unwrap();

        let provider = Arc::new(
            NoteStoreProviderImpl::new(storage.clone(), factory.clone(), USER_STORE_URL).unwrap(),
        );

        Self {
            storage,
            remote,
            factory,
            provider,
            notebook,
        }
    }

    pub fn downloader(&self) -> Arc<dyn NoteFullDataDownloader> {
        Arc::new(NoteFullDataDownloaderImpl::new(&SyncConfig::default(), fast_retry()).unwrap())
    }

    /// Puts a note into the remote store and returns it as a sync chunk would list it.
    pub fn remote_note(&self, title: &str) -> Note {
        let mut stored = self.remote.put_note(Note {
            title: Some(title.to_string()),
            content: Some(format!("<en-note>{}</en-note>", title)),
            notebook_guid: Some(Guid::new(NOTEBOOK_GUID)),
            active: true,
            ..Default::default()
        });
        stored.content = None;
        stored
    }

    pub fn processor(
        &self,
        storage: Arc<dyn LocalStorage>,
        resolver: Arc<dyn SyncConflictResolver>,
        downloader: Arc<dyn NoteFullDataDownloader>,
        options: SyncOptions,
        images: FakeDownloaderFactory,
    ) -> NotesProcessor {
        NotesProcessor::builder()
            .local_storage(storage)
            .conflict_resolver(resolver)
            .note_full_data_downloader(downloader)
            .note_store_provider(self.provider.clone())
            .downloader_factory(Arc::new(images))
            .options(Arc::new(options))
            .build()
            .unwrap()
    }

    pub fn default_processor(&self) -> NotesProcessor {
        self.processor(
            self.storage.clone(),
            Arc::new(SimpleSyncConflictResolver::new(ConflictPolicy::PreferRemote)),
            self.downloader(),
            SyncOptions::default(),
            FakeDownloaderFactory::new(&b"thumb"[..], &b"ink"[..]),
        )
    }
}

pub fn chunk_with_notes(notes: Vec<Note>) -> SyncChunk {
    let high = notes.iter().filter_map(|n| n.update_sequence_num).max();
    SyncChunk {
        chunk_high_usn: high,
        update_count: high.unwrap_or(0),
        notes,
        ..Default::default()
    }
}

/// Records every callback invocation.
#[derive(Default)]
pub struct RecordingCallback {
    pub processed: Mutex<Vec<(Guid, Usn)>>,
    pub expunged: Mutex<Vec<Guid>>,
    pub expunge_failures: Mutex<Vec<Guid>>,
    pub download_failures: Mutex<Vec<Option<Guid>>>,
    pub process_failures: Mutex<Vec<Option<Guid>>>,
    pub cancelled: Mutex<Vec<Option<Guid>>>,
    pub auxiliary_failures: Mutex<Vec<(Option<Guid>, AuxiliaryDownloadKind)>>,
}

impl NotesProcessorCallback for RecordingCallback {
    fn on_processed_note(&self, guid: &Guid, usn: Usn) {
        self.processed.lock().unwrap().push((guid.clone(), usn));
    }

    fn on_expunged_note(&self, guid: &Guid) {
        self.expunged.lock().unwrap().push(guid.clone());
    }

    fn on_failed_to_expunge_note(&self, guid: &Guid, _error: &SyncError) {
        self.expunge_failures.lock().unwrap().push(guid.clone());
    }

    fn on_note_failed_to_download(&self, note: &Note, _error: &SyncError) {
        self.download_failures.lock().unwrap().push(note.guid.clone());
    }

    fn on_note_failed_to_process(&self, note: &Note, _error: &SyncError) {
        self.process_failures.lock().unwrap().push(note.guid.clone());
    }

    fn on_note_processing_cancelled(&self, note: &Note) {
        self.cancelled.lock().unwrap().push(note.guid.clone());
    }

    fn on_note_auxiliary_download_failed(
        &self,
        note: &Note,
        kind: AuxiliaryDownloadKind,
        _error: &SyncError,
    ) {
        self.auxiliary_failures
            .lock()
            .unwrap()
            .push((note.guid.clone(), kind));
    }
}

/// A released-once gate. Releasing before anyone waits is remembered.
#[derive(Default)]
pub struct Gates {
    gates: Mutex<HashMap<Guid, Arc<Notify>>>,
}

impl Gates {
    fn gate(&self, guid: &Guid) -> Arc<Notify> {
        self.gates
            .lock()
            .unwrap()
            .entry(guid.clone())
            .or_default()
            .clone()
    }

    pub fn release(&self, guid: &Guid) {
        self.gate(guid).notify_one();
    }

    pub async fn wait(&self, guid: &Guid) {
        self.gate(guid).notified().await;
    }
}

/// Local storage whose note lookups by guid wait for the test to release
/// them. Note expunges fail for guids passed to `fail_expunge`.
pub struct GatedLocalStorage {
    pub inner: Arc<InMemoryLocalStorage>,
    pub lookups: Gates,
    failing_expunges: Mutex<HashSet<Guid>>,
}

impl GatedLocalStorage {
    pub fn new(inner: Arc<InMemoryLocalStorage>) -> Self {
        Self {
            inner,
            lookups: Gates::default(),
            failing_expunges: Mutex::new(HashSet::new()),
        }
    }

    pub fn fail_expunge(&self, guid: &Guid) {
        self.failing_expunges.lock().unwrap().insert(guid.clone());
    }
}

#[async_trait]
impl LocalStorage for GatedLocalStorage {
    async fn find_note_by_guid(
        &self,
        guid: &Guid,
        options: FetchNoteOptions,
    ) -> core_library::Result<Option<Note>> {
        self.lookups.wait(guid).await;
        self.inner.find_note_by_guid(guid, options).await
    }

    async fn find_note_by_local_id(
        &self,
        local_id: LocalId,
        options: FetchNoteOptions,
    ) -> core_library::Result<Option<Note>> {
        self.inner.find_note_by_local_id(local_id, options).await
    }

    async fn put_note(&self, note: Note) -> core_library::Result<()> {
        self.inner.put_note(note).await
    }

    async fn expunge_note_by_guid(&self, guid: &Guid) -> core_library::Result<()> {
        if self.failing_expunges.lock().unwrap().contains(guid) {
            return Err(LibraryError::InvalidInput {
                field: "guid".to_string(),
                message: format!("note {} is locked", guid),
            });
        }
        self.inner.expunge_note_by_guid(guid).await
    }

    async fn list_notes(&self, options: FetchNoteOptions) -> core_library::Result<Vec<Note>> {
        self.inner.list_notes(options).await
    }

    async fn note_count(&self) -> core_library::Result<usize> {
        self.inner.note_count().await
    }

    async fn find_resource_by_guid(
        &self,
        guid: &Guid,
        options: FetchResourceOptions,
    ) -> core_library::Result<Option<Resource>> {
        self.inner.find_resource_by_guid(guid, options).await
    }

    async fn put_resource(&self, resource: Resource) -> core_library::Result<()> {
        self.inner.put_resource(resource).await
    }

    async fn expunge_resource_by_guid(&self, guid: &Guid) -> core_library::Result<()> {
        self.inner.expunge_resource_by_guid(guid).await
    }

    async fn find_notebook_by_guid(&self, guid: &Guid) -> core_library::Result<Option<Notebook>> {
        self.inner.find_notebook_by_guid(guid).await
    }

    async fn find_notebook_by_local_id(
        &self,
        local_id: LocalId,
    ) -> core_library::Result<Option<Notebook>> {
        self.inner.find_notebook_by_local_id(local_id).await
    }

    async fn find_notebook_by_name(
        &self,
        name: &str,
        linked_notebook_guid: Option<&Guid>,
    ) -> core_library::Result<Option<Notebook>> {
        self.inner.find_notebook_by_name(name, linked_notebook_guid).await
    }

    async fn put_notebook(&self, notebook: Notebook) -> core_library::Result<()> {
        self.inner.put_notebook(notebook).await
    }

    async fn expunge_notebook_by_guid(&self, guid: &Guid) -> core_library::Result<()> {
        self.inner.expunge_notebook_by_guid(guid).await
    }

    async fn list_notebooks(&self) -> core_library::Result<Vec<Notebook>> {
        self.inner.list_notebooks().await
    }

    async fn find_tag_by_guid(&self, guid: &Guid) -> core_library::Result<Option<Tag>> {
        self.inner.find_tag_by_guid(guid).await
    }

    async fn find_tag_by_name(
        &self,
        name: &str,
        linked_notebook_guid: Option<&Guid>,
    ) -> core_library::Result<Option<Tag>> {
        self.inner.find_tag_by_name(name, linked_notebook_guid).await
    }

    async fn put_tag(&self, tag: Tag) -> core_library::Result<()> {
        self.inner.put_tag(tag).await
    }

    async fn expunge_tag_by_guid(&self, guid: &Guid) -> core_library::Result<()> {
        self.inner.expunge_tag_by_guid(guid).await
    }

    async fn list_tags(&self) -> core_library::Result<Vec<Tag>> {
        self.inner.list_tags().await
    }

    async fn find_saved_search_by_guid(
        &self,
        guid: &Guid,
    ) -> core_library::Result<Option<SavedSearch>> {
        self.inner.find_saved_search_by_guid(guid).await
    }

    async fn find_saved_search_by_name(
        &self,
        name: &str,
    ) -> core_library::Result<Option<SavedSearch>> {
        self.inner.find_saved_search_by_name(name).await
    }

    async fn put_saved_search(&self, search: SavedSearch) -> core_library::Result<()> {
        self.inner.put_saved_search(search).await
    }

    async fn expunge_saved_search_by_guid(&self, guid: &Guid) -> core_library::Result<()> {
        self.inner.expunge_saved_search_by_guid(guid).await
    }

    async fn list_saved_searches(&self) -> core_library::Result<Vec<SavedSearch>> {
        self.inner.list_saved_searches().await
    }

    async fn find_linked_notebook_by_guid(
        &self,
        guid: &Guid,
    ) -> core_library::Result<Option<LinkedNotebook>> {
        self.inner.find_linked_notebook_by_guid(guid).await
    }

    async fn put_linked_notebook(&self, linked_notebook: LinkedNotebook) -> core_library::Result<()> {
        self.inner.put_linked_notebook(linked_notebook).await
    }

    async fn expunge_linked_notebook_by_guid(&self, guid: &Guid) -> core_library::Result<()> {
        self.inner.expunge_linked_notebook_by_guid(guid).await
    }

    async fn list_linked_notebooks(&self) -> core_library::Result<Vec<LinkedNotebook>> {
        self.inner.list_linked_notebooks().await
    }
}

/// Downloader whose downloads of gated guids wait for the test to release
/// them. Announces every download it starts.
pub struct GatedDownloader {
    pub inner: Arc<dyn NoteFullDataDownloader>,
    pub gated: Vec<Guid>,
    pub downloads: Gates,
    pub started: Gates,
}

impl GatedDownloader {
    pub fn new(inner: Arc<dyn NoteFullDataDownloader>, gated: Vec<Guid>) -> Self {
        Self {
            inner,
            gated,
            downloads: Gates::default(),
            started: Gates::default(),
        }
    }
}

#[async_trait]
impl NoteFullDataDownloader for GatedDownloader {
    async fn download_full_note_data(
        &self,
        note_guid: &Guid,
        note_store: Arc<dyn NoteStore>,
        ctx: &RequestContext,
    ) -> core_sync::Result<Note> {
        self.started.release(note_guid);
        if self.gated.contains(note_guid) {
            self.downloads.wait(note_guid).await;
        }
        self.inner
            .download_full_note_data(note_guid, note_store, ctx)
            .await
    }
}
