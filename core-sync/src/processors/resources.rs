//! Resources processor.
//!
//! Resources listed on their own in sync chunks are attachments that changed
//! without their note changing. Each one is downloaded in full and stored
//! under its owner note; the pipeline mirrors the notes processor including
//! stop conditions on rate limits and expired authentication.

use super::{into_final_status, required, EntityChange};
use crate::conflict_resolver::{ConflictResolution, SyncConflictResolver};
use crate::downloader::ResourceFullDataDownloader;
use crate::error::{Result, StopSynchronizationError, SyncError};
use crate::note_store_provider::NoteStoreProvider;
use crate::status::{DownloadResourcesStatus, ResourceWithError};
use crate::sync_chunks::collect_resources;
use core_async::future::when_all;
use core_async::sync::{CancellationToken, Mutex};
use core_library::{
    FetchNoteOptions, FetchResourceOptions, Guid, LocalId, LocalStorage, Note, Resource,
    SyncChunk, Usn,
};
use core_remote::RequestContext;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

pub trait ResourcesProcessorCallback: Send + Sync {
    fn on_processed_resource(&self, guid: &Guid, usn: Usn);

    fn on_resource_failed_to_download(&self, resource: &Resource, error: &SyncError);

    fn on_resource_failed_to_process(&self, resource: &Resource, error: &SyncError);

    fn on_resource_processing_cancelled(&self, resource: &Resource);
}

enum ResourceFailure {
    Download(SyncError),
    Process(SyncError),
}

enum ResourceOutcome {
    Stored(EntityChange),
    KeptLocal,
    Cancelled,
}

struct ResourcesRun {
    status: Arc<Mutex<DownloadResourcesStatus>>,
    callback: Option<Arc<dyn ResourcesProcessorCallback>>,
    canceler: CancellationToken,
}

#[derive(Clone)]
pub struct ResourcesProcessor {
    local_storage: Arc<dyn LocalStorage>,
    conflict_resolver: Arc<dyn SyncConflictResolver>,
    resource_full_data_downloader: Arc<dyn ResourceFullDataDownloader>,
    note_store_provider: Arc<dyn NoteStoreProvider>,
    ctx: RequestContext,
}

#[derive(Default)]
pub struct ResourcesProcessorBuilder {
    local_storage: Option<Arc<dyn LocalStorage>>,
    conflict_resolver: Option<Arc<dyn SyncConflictResolver>>,
    resource_full_data_downloader: Option<Arc<dyn ResourceFullDataDownloader>>,
    note_store_provider: Option<Arc<dyn NoteStoreProvider>>,
    ctx: Option<RequestContext>,
}

impl ResourcesProcessorBuilder {
    pub fn local_storage(mut self, local_storage: Arc<dyn LocalStorage>) -> Self {
        self.local_storage = Some(local_storage);
        self
    }

    pub fn conflict_resolver(mut self, resolver: Arc<dyn SyncConflictResolver>) -> Self {
        self.conflict_resolver = Some(resolver);
        self
    }

    pub fn resource_full_data_downloader(
        mut self,
        downloader: Arc<dyn ResourceFullDataDownloader>,
    ) -> Self {
        self.resource_full_data_downloader = Some(downloader);
        self
    }

    pub fn note_store_provider(mut self, provider: Arc<dyn NoteStoreProvider>) -> Self {
        self.note_store_provider = Some(provider);
        self
    }

    pub fn request_context(mut self, ctx: RequestContext) -> Self {
        self.ctx = Some(ctx);
        self
    }

    pub fn build(self) -> Result<ResourcesProcessor> {
        const NAME: &str = "resources processor";

        Ok(ResourcesProcessor {
            local_storage: required(self.local_storage, NAME, "local storage")?,
            conflict_resolver: required(self.conflict_resolver, NAME, "conflict resolver")?,
            resource_full_data_downloader: required(
                self.resource_full_data_downloader,
                NAME,
                "resource full data downloader",
            )?,
            note_store_provider: required(self.note_store_provider, NAME, "note store provider")?,
            ctx: self.ctx.unwrap_or_default(),
        })
    }
}

impl ResourcesProcessor {
    pub fn builder() -> ResourcesProcessorBuilder {
        ResourcesProcessorBuilder::default()
    }

    #[instrument(skip_all, fields(chunks = chunks.len()))]
    pub async fn process_resources(
        &self,
        chunks: &[SyncChunk],
        canceler: CancellationToken,
        callback: Option<Arc<dyn ResourcesProcessorCallback>>,
    ) -> Result<Arc<DownloadResourcesStatus>> {
        let resources = collect_resources(chunks);
        if resources.is_empty() {
            debug!("No resources to process");
            return Ok(Arc::new(DownloadResourcesStatus::default()));
        }

        info!(resources = resources.len(), "Processing resources");

        let status = Arc::new(Mutex::new(DownloadResourcesStatus::default()));
        let run = Arc::new(ResourcesRun {
            status: status.clone(),
            callback,
            canceler,
        });

        let tasks: Vec<_> = resources
            .into_iter()
            .map(|resource| {
                let processor = self.clone();
                let run = run.clone();
                core_async::spawn(async move { processor.process_resource(resource, &run).await })
            })
            .collect();
        drop(run);

        when_all(tasks.into_iter().map(|task| async move { task.await.map_err(SyncError::from) }))
            .await?;

        let status = into_final_status(status).await;
        info!(
            new = status.total_new_resources,
            updated = status.total_updated_resources,
            failed_to_download = status.resources_which_failed_to_download.len(),
            failed_to_process = status.resources_which_failed_to_process.len(),
            cancelled = status.cancelled_resource_guids_and_usns.len(),
            "Finished processing resources"
        );
        Ok(status)
    }

    async fn process_resource(&self, resource: Resource, run: &ResourcesRun) {
        if run.canceler.is_cancelled() {
            return self.report_cancelled(&resource, run).await;
        }

        let outcome = self.run_pipeline(resource.clone(), run).await;
        let mut status = run.status.lock().await;
        match outcome {
            Ok(ResourceOutcome::Stored(change)) => {
                self.record_processed(&mut status, &resource, change, run)
            }
            Ok(ResourceOutcome::KeptLocal) => {
                self.record_processed(&mut status, &resource, EntityChange::Updated, run)
            }
            Ok(ResourceOutcome::Cancelled) => {
                drop(status);
                self.report_cancelled(&resource, run).await
            }
            Err(ResourceFailure::Download(error)) => {
                warn!(guid = ?resource.guid, error = %error, "Failed to download resource");
                let stop = StopSynchronizationError::from_error(&error);
                if let Some(callback) = &run.callback {
                    callback.on_resource_failed_to_download(&resource, &error);
                }
                status
                    .resources_which_failed_to_download
                    .push(ResourceWithError { resource, error });
                if let Some(stop) = stop {
                    if status.set_stop_synchronization_error(stop) {
                        info!(reason = %stop, "Stopping resource downloads");
                    }
                    run.canceler.cancel();
                }
            }
            Err(ResourceFailure::Process(error)) => {
                warn!(guid = ?resource.guid, error = %error, "Failed to process resource");
                if let Some(callback) = &run.callback {
                    callback.on_resource_failed_to_process(&resource, &error);
                }
                status
                    .resources_which_failed_to_process
                    .push(ResourceWithError { resource, error });
            }
        }
    }

    async fn run_pipeline(
        &self,
        resource: Resource,
        run: &ResourcesRun,
    ) -> std::result::Result<ResourceOutcome, ResourceFailure> {
        let process = |e: SyncError| ResourceFailure::Process(e);

        let guid = resource
            .guid
            .clone()
            .ok_or_else(|| process(SyncError::InvalidArgument("resource has no guid".into())))?;
        let note_guid = resource.note_guid.clone().ok_or_else(|| {
            process(SyncError::InvalidArgument(format!(
                "resource {} has no note guid",
                guid
            )))
        })?;

        let owner = self.find_owner(&note_guid).await.map_err(process)?;

        let local = self
            .local_storage
            .find_resource_by_guid(&guid, FetchResourceOptions::METADATA)
            .await
            .map_err(|e| process(e.into()))?;

        let (local_id, change) = match local {
            None => (resource.local_id, EntityChange::New),
            Some(local) if !local.locally_modified => (local.local_id, EntityChange::Updated),
            Some(local) => {
                let mine = self
                    .local_storage
                    .find_resource_by_guid(&guid, FetchResourceOptions::FULL)
                    .await
                    .map_err(|e| process(e.into()))?
                    .unwrap_or_else(|| local.clone());
                let resolution = self
                    .conflict_resolver
                    .resolve_resource_conflict(&resource, &mine)
                    .await
                    .map_err(|e| process(SyncError::ConflictResolution(e.to_string())))?;
                match resolution {
                    ConflictResolution::UseMine => return Ok(ResourceOutcome::KeptLocal),
                    ConflictResolution::UseTheirs | ConflictResolution::IgnoreMine => {}
                    ConflictResolution::MoveMine(mut copy) => {
                        if copy.local_id == local.local_id {
                            copy.local_id = LocalId::new();
                        }
                        copy.guid = None;
                        copy.update_sequence_num = None;
                        copy.note_local_id = Some(owner.local_id);
                        copy.note_guid = owner.guid.clone();
                        copy.locally_modified = true;
                        debug!(guid = %guid, copy_local_id = %copy.local_id, "Moving local resource aside");
                        self.local_storage
                            .put_resource(copy)
                            .await
                            .map_err(|e| process(e.into()))?;
                    }
                }
                (local.local_id, EntityChange::Updated)
            }
        };

        if run.canceler.is_cancelled() {
            return Ok(ResourceOutcome::Cancelled);
        }

        let note_store = self
            .note_store_provider
            .note_store_for_note(owner.local_id, &self.ctx)
            .await
            .map_err(ResourceFailure::Download)?;
        let mut full = self
            .resource_full_data_downloader
            .download_full_resource_data(&guid, note_store, &self.ctx)
            .await
            .map_err(ResourceFailure::Download)?;

        full.local_id = local_id;
        full.note_local_id = Some(owner.local_id);
        full.note_guid = Some(note_guid);
        full.locally_modified = false;

        self.local_storage
            .put_resource(full)
            .await
            .map_err(|e| process(e.into()))?;
        Ok(ResourceOutcome::Stored(change))
    }

    async fn find_owner(&self, note_guid: &Guid) -> Result<Note> {
        self.local_storage
            .find_note_by_guid(note_guid, FetchNoteOptions::NOTE_ONLY)
            .await?
            .ok_or_else(|| SyncError::not_found("note", note_guid))
    }

    fn record_processed(
        &self,
        status: &mut DownloadResourcesStatus,
        resource: &Resource,
        change: EntityChange,
        run: &ResourcesRun,
    ) {
        let (Some(guid), Some(usn)) = (resource.guid.clone(), resource.update_sequence_num) else {
            return;
        };
        match change {
            EntityChange::New => status.total_new_resources += 1,
            EntityChange::Updated => status.total_updated_resources += 1,
        }
        if let Some(callback) = &run.callback {
            callback.on_processed_resource(&guid, usn);
        }
        status.processed_resource_guids_and_usns.insert(guid, usn);
    }

    async fn report_cancelled(&self, resource: &Resource, run: &ResourcesRun) {
        debug!(guid = ?resource.guid, "Resource processing cancelled");
        let mut status = run.status.lock().await;
        if let (Some(guid), Some(usn)) = (resource.guid.clone(), resource.update_sequence_num) {
            status.cancelled_resource_guids_and_usns.insert(guid, usn);
        }
        if let Some(callback) = &run.callback {
            callback.on_resource_processing_cancelled(resource);
        }
    }
}
