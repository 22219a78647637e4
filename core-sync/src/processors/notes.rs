//! # Notes Processor
//!
//! Reconciles the notes listed in a batch of sync chunks with local storage.
//!
//! ## Pipeline
//!
//! Every note runs through its own pipeline, concurrently with the others:
//!
//! ```text
//! Pending ─> lookup by guid ─> [conflict resolution] ─> download full data
//!         ─> [thumbnail / ink images] ─> store
//! ```
//!
//! Terminal states are Cancelled, DownloadFailed, ProcessFailed and Stored.
//! Failures are recorded per note and never abort the batch. A rate limit
//! or expired authentication observed while downloading additionally sets
//! the run's stop reason and cancels the shared token, so notes that have
//! not reached their download step yet end up cancelled.
//!
//! Expunged guids are processed alongside the notes; a note whose guid is
//! also expunged in the same batch is only expunged.

use super::{into_final_status, required, EntityChange};
use crate::conflict_resolver::{ConflictResolution, SyncConflictResolver};
use crate::downloader::NoteFullDataDownloader;
use crate::error::{Result, StopSynchronizationError, SyncError};
use crate::note_store_provider::NoteStoreProvider;
use crate::status::{
    AuxiliaryDownloadFailure, AuxiliaryDownloadKind, DownloadNotesStatus, GuidWithError,
    NoteWithError,
};
use crate::sync_chunks::{collect_expunged_note_guids, collect_notes, filter_out_expunged};
use bytes::Bytes;
use core_async::future::when_all;
use core_async::sync::{CancellationToken, Mutex};
use core_library::{
    FetchNoteOptions, Guid, LocalId, LocalStorage, Note, Notebook, SyncChunk, Usn,
};
use core_remote::{DownloaderFactory, ImageFormat, ImageSize, RequestContext};
use core_runtime::logging::strip_path;
use core_runtime::{SyncConfig, SyncOptions};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Per-note outcomes of a processing run.
///
/// Invoked from whichever task finishes a pipeline step, always under the
/// run's status lock, so implementations see one event at a time.
pub trait NotesProcessorCallback: Send + Sync {
    fn on_processed_note(&self, guid: &Guid, usn: Usn);

    fn on_expunged_note(&self, guid: &Guid);

    fn on_failed_to_expunge_note(&self, guid: &Guid, error: &SyncError);

    fn on_note_failed_to_download(&self, note: &Note, error: &SyncError);

    fn on_note_failed_to_process(&self, note: &Note, error: &SyncError);

    fn on_note_processing_cancelled(&self, note: &Note);

    /// The note was stored, but its thumbnail or ink image was not.
    fn on_note_auxiliary_download_failed(
        &self,
        _note: &Note,
        _kind: AuxiliaryDownloadKind,
        _error: &SyncError,
    ) {
    }
}

enum NoteFailure {
    Download(SyncError),
    Process(SyncError),
}

/// Successful pipeline outcome.
enum NoteOutcome {
    Stored(EntityChange),
    /// Local version kept; the remote change was consumed without a write.
    KeptLocal,
    /// The run was cancelled before the download step.
    Cancelled,
}

struct NotesRun {
    status: Arc<Mutex<DownloadNotesStatus>>,
    callback: Option<Arc<dyn NotesProcessorCallback>>,
    canceler: CancellationToken,
}

#[derive(Clone)]
pub struct NotesProcessor {
    local_storage: Arc<dyn LocalStorage>,
    conflict_resolver: Arc<dyn SyncConflictResolver>,
    note_full_data_downloader: Arc<dyn NoteFullDataDownloader>,
    note_store_provider: Arc<dyn NoteStoreProvider>,
    downloader_factory: Arc<dyn DownloaderFactory>,
    options: Arc<SyncOptions>,
    note_thumbnail_size: u32,
    ctx: RequestContext,
}

#[derive(Default)]
pub struct NotesProcessorBuilder {
    local_storage: Option<Arc<dyn LocalStorage>>,
    conflict_resolver: Option<Arc<dyn SyncConflictResolver>>,
    note_full_data_downloader: Option<Arc<dyn NoteFullDataDownloader>>,
    note_store_provider: Option<Arc<dyn NoteStoreProvider>>,
    downloader_factory: Option<Arc<dyn DownloaderFactory>>,
    options: Option<Arc<SyncOptions>>,
    config: Option<SyncConfig>,
    ctx: Option<RequestContext>,
}

impl NotesProcessorBuilder {
    pub fn local_storage(mut self, local_storage: Arc<dyn LocalStorage>) -> Self {
        self.local_storage = Some(local_storage);
        self
    }

    pub fn conflict_resolver(mut self, resolver: Arc<dyn SyncConflictResolver>) -> Self {
        self.conflict_resolver = Some(resolver);
        self
    }

    pub fn note_full_data_downloader(mut self, downloader: Arc<dyn NoteFullDataDownloader>) -> Self {
        self.note_full_data_downloader = Some(downloader);
        self
    }

    pub fn note_store_provider(mut self, provider: Arc<dyn NoteStoreProvider>) -> Self {
        self.note_store_provider = Some(provider);
        self
    }

    pub fn downloader_factory(mut self, factory: Arc<dyn DownloaderFactory>) -> Self {
        self.downloader_factory = Some(factory);
        self
    }

    pub fn options(mut self, options: Arc<SyncOptions>) -> Self {
        self.options = Some(options);
        self
    }

    /// Optional; defaults to [`SyncConfig::default`].
    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Optional; defaults to an empty context.
    pub fn request_context(mut self, ctx: RequestContext) -> Self {
        self.ctx = Some(ctx);
        self
    }

    pub fn build(self) -> Result<NotesProcessor> {
        const NAME: &str = "notes processor";

        let config = self.config.unwrap_or_default();
        config.validate()?;

        Ok(NotesProcessor {
            local_storage: required(self.local_storage, NAME, "local storage")?,
            conflict_resolver: required(self.conflict_resolver, NAME, "conflict resolver")?,
            note_full_data_downloader: required(
                self.note_full_data_downloader,
                NAME,
                "note full data downloader",
            )?,
            note_store_provider: required(self.note_store_provider, NAME, "note store provider")?,
            downloader_factory: required(self.downloader_factory, NAME, "downloader factory")?,
            options: required(self.options, NAME, "sync options")?,
            note_thumbnail_size: config.note_thumbnail_size,
            ctx: self.ctx.unwrap_or_default(),
        })
    }
}

impl NotesProcessor {
    pub fn builder() -> NotesProcessorBuilder {
        NotesProcessorBuilder::default()
    }

    /// Processes every note and expunged note guid in `chunks`.
    ///
    /// Resolves once all per-note pipelines and expunges have completed.
    /// Per-note failures are reported in the returned status; only an
    /// internal failure of the run itself yields `Err`.
    #[instrument(skip_all, fields(chunks = chunks.len()))]
    pub async fn process_notes(
        &self,
        chunks: &[SyncChunk],
        canceler: CancellationToken,
        callback: Option<Arc<dyn NotesProcessorCallback>>,
    ) -> Result<Arc<DownloadNotesStatus>> {
        let expunged = collect_expunged_note_guids(chunks);
        let notes = filter_out_expunged(collect_notes(chunks), &expunged);

        if notes.is_empty() && expunged.is_empty() {
            debug!("No notes to process");
            return Ok(Arc::new(DownloadNotesStatus::default()));
        }

        info!(
            notes = notes.len(),
            expunged = expunged.len(),
            "Processing notes"
        );

        let status = Arc::new(Mutex::new(DownloadNotesStatus::default()));
        let run = Arc::new(NotesRun {
            status: status.clone(),
            callback,
            canceler,
        });

        let mut tasks = Vec::with_capacity(notes.len() + expunged.len());
        for note in notes {
            let processor = self.clone();
            let run = run.clone();
            tasks.push(core_async::spawn(async move {
                processor.process_note(note, &run).await
            }));
        }
        for guid in expunged {
            let processor = self.clone();
            let run = run.clone();
            tasks.push(core_async::spawn(async move {
                processor.expunge_note(guid, &run).await
            }));
        }
        drop(run);

        when_all(tasks.into_iter().map(|task| async move { task.await.map_err(SyncError::from) }))
            .await?;

        let status = into_final_status(status).await;
        info!(
            new = status.total_new_notes,
            updated = status.total_updated_notes,
            expunged = status.total_expunged_notes,
            failed = status.total_failed(),
            cancelled = status.cancelled_note_guids_and_usns.len(),
            stop = ?status.stop_synchronization_error,
            "Finished processing notes"
        );
        Ok(status)
    }

    async fn process_note(&self, note: Note, run: &NotesRun) {
        if run.canceler.is_cancelled() {
            return self.report_cancelled(&note, run).await;
        }

        match self.run_pipeline(note.clone(), run).await {
            Ok(NoteOutcome::Stored(change)) => self.report_processed(&note, change, run).await,
            Ok(NoteOutcome::KeptLocal) => {
                self.report_processed(&note, EntityChange::Updated, run)
                    .await
            }
            Ok(NoteOutcome::Cancelled) => self.report_cancelled(&note, run).await,
            Err(NoteFailure::Download(error)) => {
                self.report_download_failure(&note, error, run).await
            }
            Err(NoteFailure::Process(error)) => self.report_process_failure(&note, error, run).await,
        }
    }

    async fn run_pipeline(
        &self,
        note: Note,
        run: &NotesRun,
    ) -> std::result::Result<NoteOutcome, NoteFailure> {
        let guid = note.guid.clone().ok_or_else(|| {
            NoteFailure::Process(SyncError::InvalidArgument("note has no guid".to_string()))
        })?;
        if note.update_sequence_num.is_none() {
            return Err(NoteFailure::Process(SyncError::InvalidArgument(format!(
                "note {} has no update sequence number",
                guid
            ))));
        }

        let local = self
            .local_storage
            .find_note_by_guid(&guid, FetchNoteOptions::METADATA)
            .await
            .map_err(|e| NoteFailure::Process(e.into()))?;

        let (note, local, change) = match local {
            None => (note, None, EntityChange::New),
            Some(local) if !local.locally_modified => (
                Note {
                    local_id: local.local_id,
                    ..note
                },
                Some(local),
                EntityChange::Updated,
            ),
            Some(local) => {
                debug!(guid = %guid, local_id = %local.local_id, "Note conflicts with local edits");
                match self.resolve_conflict(&note, &local).await? {
                    ConflictResolution::UseMine => {
                        debug!(guid = %guid, "Keeping local version of note");
                        return Ok(NoteOutcome::KeptLocal);
                    }
                    ConflictResolution::UseTheirs | ConflictResolution::IgnoreMine => {}
                    ConflictResolution::MoveMine(copy) => {
                        let copy = detach_local_copy(copy, &local);
                        debug!(guid = %guid, copy_local_id = %copy.local_id, "Moving local note aside");
                        self.local_storage
                            .put_note(copy)
                            .await
                            .map_err(|e| NoteFailure::Process(e.into()))?;
                    }
                }
                (
                    Note {
                        local_id: local.local_id,
                        ..note
                    },
                    Some(local),
                    EntityChange::Updated,
                )
            }
        };

        if run.canceler.is_cancelled() {
            return Ok(NoteOutcome::Cancelled);
        }

        let notebook = self.find_notebook(&note).await.map_err(NoteFailure::Download)?;
        let note_store = self
            .note_store_provider
            .note_store_for_notebook(notebook.local_id, &self.ctx)
            .await
            .map_err(NoteFailure::Download)?;
        if note_store.linked_notebook_guid() != notebook.linked_notebook_guid.as_ref() {
            return Err(NoteFailure::Download(SyncError::Internal(format!(
                "note store for notebook {} serves the wrong scope",
                notebook.local_id
            ))));
        }

        let full = self
            .note_full_data_downloader
            .download_full_note_data(&guid, note_store, &self.ctx)
            .await
            .map_err(NoteFailure::Download)?;

        let mut full = merge_full_note(full, &note, local.as_ref(), &notebook);
        self.download_auxiliary_data(&mut full, &notebook, run).await;

        self.local_storage
            .put_note(full)
            .await
            .map_err(|e| NoteFailure::Process(e.into()))?;

        Ok(NoteOutcome::Stored(change))
    }

    async fn resolve_conflict(
        &self,
        theirs: &Note,
        local: &Note,
    ) -> std::result::Result<ConflictResolution<Note>, NoteFailure> {
        // The resolver gets resource bodies so a moved copy keeps them.
        let mine = self
            .local_storage
            .find_note_by_local_id(local.local_id, FetchNoteOptions::FULL)
            .await
            .map_err(|e| NoteFailure::Process(e.into()))?
            .unwrap_or_else(|| local.clone());

        self.conflict_resolver
            .resolve_note_conflict(theirs, &mine)
            .await
            .map_err(|e| {
                NoteFailure::Process(match e {
                    SyncError::ConflictResolution(_) => e,
                    other => SyncError::ConflictResolution(other.to_string()),
                })
            })
    }

    async fn find_notebook(&self, note: &Note) -> Result<Notebook> {
        let notebook_guid = note.notebook_guid.as_ref().ok_or_else(|| {
            SyncError::InvalidArgument(format!("note {} has no notebook guid", note.local_id))
        })?;
        self.local_storage
            .find_notebook_by_guid(notebook_guid)
            .await?
            .ok_or_else(|| SyncError::not_found("notebook", notebook_guid))
    }

    async fn download_auxiliary_data(&self, note: &mut Note, notebook: &Notebook, run: &NotesRun) {
        if self.options.download_note_thumbnails && !note.resources.is_empty() {
            match self.download_thumbnail(note, notebook).await {
                Ok(thumbnail) => note.thumbnail_data = Some(thumbnail),
                Err(error) => {
                    self.report_auxiliary_failure(note, AuxiliaryDownloadKind::Thumbnail, error, run)
                        .await
                }
            }
        }

        if let Some(dir) = self.options.ink_note_images_storage_dir() {
            if note.is_ink_note() {
                if let Err(error) = self.download_ink_note_images(note, notebook, dir).await {
                    self.report_auxiliary_failure(
                        note,
                        AuxiliaryDownloadKind::InkNoteImage,
                        error,
                        run,
                    )
                    .await
                }
            }
        }
    }

    async fn download_thumbnail(&self, note: &Note, notebook: &Notebook) -> Result<Bytes> {
        let guid = note
            .guid
            .as_ref()
            .ok_or_else(|| SyncError::InvalidArgument("note has no guid".to_string()))?;
        let downloader = self
            .downloader_factory
            .create_note_thumbnail_downloader(notebook.local_id, &self.ctx)
            .await?;
        let thumbnail = downloader
            .download_note_thumbnail(guid, self.note_thumbnail_size, ImageFormat::Png, &self.ctx)
            .await?;
        debug!(guid = %guid, bytes = thumbnail.len(), "Downloaded note thumbnail");
        Ok(thumbnail)
    }

    async fn download_ink_note_images(
        &self,
        note: &Note,
        notebook: &Notebook,
        dir: &Path,
    ) -> Result<()> {
        let downloader = self
            .downloader_factory
            .create_ink_note_image_downloader(notebook.local_id, &self.ctx)
            .await?;
        core_async::fs::create_dir_all(dir).await?;

        for resource in &note.resources {
            let Some(resource_guid) = resource.guid.as_ref() else {
                continue;
            };
            let size = ImageSize::new(
                resource.width.unwrap_or(0).max(0) as u32,
                resource.height.unwrap_or(0).max(0) as u32,
            );
            let image = downloader.download(resource_guid, size, &self.ctx).await?;
            let path = dir.join(format!("{}.png", resource_guid));
            core_async::fs::write(&path, &image).await?;
            debug!(
                resource_guid = %resource_guid,
                file = strip_path(&path.to_string_lossy()),
                "Stored ink note image"
            );
        }
        Ok(())
    }

    async fn expunge_note(&self, guid: Guid, run: &NotesRun) {
        let result = self.local_storage.expunge_note_by_guid(&guid).await;

        let mut status = run.status.lock().await;
        match result {
            Ok(()) => {
                debug!(guid = %guid, "Expunged note");
                status.total_expunged_notes += 1;
                if let Some(callback) = &run.callback {
                    callback.on_expunged_note(&guid);
                }
                status.expunged_note_guids.push(guid);
            }
            Err(e) => {
                let error = SyncError::from(e);
                warn!(guid = %guid, error = %error, "Failed to expunge note");
                if let Some(callback) = &run.callback {
                    callback.on_failed_to_expunge_note(&guid, &error);
                }
                status
                    .note_guids_which_failed_to_expunge
                    .push(GuidWithError { guid, error });
            }
        }
    }

    async fn report_processed(&self, note: &Note, change: EntityChange, run: &NotesRun) {
        let (Some(guid), Some(usn)) = (note.guid.clone(), note.update_sequence_num) else {
            return;
        };

        let mut status = run.status.lock().await;
        match change {
            EntityChange::New => status.total_new_notes += 1,
            EntityChange::Updated => status.total_updated_notes += 1,
        }
        if let Some(callback) = &run.callback {
            callback.on_processed_note(&guid, usn);
        }
        status.processed_note_guids_and_usns.insert(guid, usn);
    }

    async fn report_cancelled(&self, note: &Note, run: &NotesRun) {
        debug!(guid = ?note.guid, "Note processing cancelled");
        let mut status = run.status.lock().await;
        if let (Some(guid), Some(usn)) = (note.guid.clone(), note.update_sequence_num) {
            status.cancelled_note_guids_and_usns.insert(guid, usn);
        }
        if let Some(callback) = &run.callback {
            callback.on_note_processing_cancelled(note);
        }
    }

    async fn report_download_failure(&self, note: &Note, error: SyncError, run: &NotesRun) {
        warn!(guid = ?note.guid, error = %error, "Failed to download note");
        let stop = StopSynchronizationError::from_error(&error);

        let mut status = run.status.lock().await;
        if let Some(callback) = &run.callback {
            callback.on_note_failed_to_download(note, &error);
        }
        status.notes_which_failed_to_download.push(NoteWithError {
            note: note.clone(),
            error,
        });

        if let Some(stop) = stop {
            if status.set_stop_synchronization_error(stop) {
                info!(reason = %stop, "Stopping note downloads");
            }
            run.canceler.cancel();
        }
    }

    async fn report_process_failure(&self, note: &Note, error: SyncError, run: &NotesRun) {
        warn!(guid = ?note.guid, error = %error, "Failed to process note");
        let mut status = run.status.lock().await;
        if let Some(callback) = &run.callback {
            callback.on_note_failed_to_process(note, &error);
        }
        status.notes_which_failed_to_process.push(NoteWithError {
            note: note.clone(),
            error,
        });
    }

    async fn report_auxiliary_failure(
        &self,
        note: &Note,
        kind: AuxiliaryDownloadKind,
        error: SyncError,
        run: &NotesRun,
    ) {
        warn!(guid = ?note.guid, kind = %kind, error = %error, "Auxiliary note download failed");
        let Some(note_guid) = note.guid.clone() else {
            return;
        };

        let mut status = run.status.lock().await;
        if let Some(callback) = &run.callback {
            callback.on_note_auxiliary_download_failed(note, kind, &error);
        }
        status
            .auxiliary_download_failures
            .push(AuxiliaryDownloadFailure {
                note_guid,
                kind,
                error,
            });
    }
}

/// Turns the resolver's copy into a brand new local-only note.
fn detach_local_copy(mut copy: Note, local: &Note) -> Note {
    if copy.local_id == local.local_id {
        copy.local_id = LocalId::new();
    }
    copy.guid = None;
    copy.update_sequence_num = None;
    copy.locally_modified = true;

    let taken: HashSet<LocalId> = local.resources.iter().map(|r| r.local_id).collect();
    for resource in &mut copy.resources {
        if taken.contains(&resource.local_id) {
            resource.local_id = LocalId::new();
        }
        resource.guid = None;
        resource.update_sequence_num = None;
        resource.note_guid = None;
        resource.note_local_id = Some(copy.local_id);
        resource.locally_modified = true;
    }
    copy
}

/// Puts the downloaded note under the processed note's local identity.
fn merge_full_note(mut full: Note, note: &Note, local: Option<&Note>, notebook: &Notebook) -> Note {
    full.local_id = note.local_id;
    full.notebook_local_id = Some(notebook.local_id);
    full.locally_modified = false;
    full.local_only = false;
    full.locally_favorited = local.map_or(note.locally_favorited, |l| l.locally_favorited);

    for resource in &mut full.resources {
        let existing = local.and_then(|l| {
            l.resources
                .iter()
                .find(|r| r.guid.is_some() && r.guid == resource.guid)
        });
        if let Some(existing) = existing {
            resource.local_id = existing.local_id;
        }
        resource.note_local_id = Some(full.local_id);
        resource.note_guid = full.guid.clone();
        resource.locally_modified = false;
    }
    full
}
