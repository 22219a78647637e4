//! Full data downloads for notes and resources.
//!
//! Sync chunks only carry entity metadata; these downloaders fetch the
//! complete entity from the note store serving its scope. Concurrent
//! requests are bounded by a semaphore and transient failures are retried
//! according to a [`RetryPolicy`].

use crate::error::{Result, SyncError};
use async_trait::async_trait;
use core_async::sync::Semaphore;
use core_library::{Guid, Note, Resource};
use core_remote::{
    with_retry, ExponentialRetryPolicy, NoteResultSpec, NoteStore, RequestContext, RetryPolicy,
};
use core_runtime::SyncConfig;
use std::sync::Arc;
use tracing::{debug, warn};

#[async_trait]
pub trait NoteFullDataDownloader: Send + Sync {
    async fn download_full_note_data(
        &self,
        note_guid: &Guid,
        note_store: Arc<dyn NoteStore>,
        ctx: &RequestContext,
    ) -> Result<Note>;
}

#[async_trait]
pub trait ResourceFullDataDownloader: Send + Sync {
    async fn download_full_resource_data(
        &self,
        resource_guid: &Guid,
        note_store: Arc<dyn NoteStore>,
        ctx: &RequestContext,
    ) -> Result<Resource>;
}

fn build_limits(
    max_in_flight_downloads: usize,
    retry_policy: Option<Arc<dyn RetryPolicy>>,
    default_attempts: u32,
) -> Result<(Semaphore, Arc<dyn RetryPolicy>)> {
    if max_in_flight_downloads == 0 {
        return Err(SyncError::InvalidArgument(
            "max in flight downloads must be non-zero".to_string(),
        ));
    }
    let retry_policy = retry_policy
        .unwrap_or_else(|| Arc::new(ExponentialRetryPolicy::new(default_attempts)));
    Ok((Semaphore::new(max_in_flight_downloads), retry_policy))
}

pub struct NoteFullDataDownloaderImpl {
    in_flight: Semaphore,
    retry_policy: Arc<dyn RetryPolicy>,
}

impl NoteFullDataDownloaderImpl {
    pub fn new(config: &SyncConfig, retry_policy: Option<Arc<dyn RetryPolicy>>) -> Result<Self> {
        let (in_flight, retry_policy) = build_limits(
            config.max_in_flight_downloads,
            retry_policy,
            config.retry_attempts,
        )?;
        Ok(Self {
            in_flight,
            retry_policy,
        })
    }

    /// Permits not currently held by a download.
    pub fn available_permits(&self) -> usize {
        self.in_flight.available_permits()
    }
}

#[async_trait]
impl NoteFullDataDownloader for NoteFullDataDownloaderImpl {
    async fn download_full_note_data(
        &self,
        note_guid: &Guid,
        note_store: Arc<dyn NoteStore>,
        ctx: &RequestContext,
    ) -> Result<Note> {
        let _permit = self
            .in_flight
            .acquire()
            .await
            .map_err(|_| SyncError::Internal("download semaphore closed".to_string()))?;

        debug!(guid = %note_guid, url = note_store.note_store_url(), "Downloading full note data");
        with_retry(
            self.retry_policy.as_ref(),
            ctx.max_request_retry_count,
            || note_store.get_note_with_result_spec(note_guid, NoteResultSpec::full(), ctx),
        )
        .await
        .map_err(|e| {
            warn!(guid = %note_guid, error = %e, "Failed to download full note data");
            SyncError::Remote(e)
        })
    }
}

pub struct ResourceFullDataDownloaderImpl {
    in_flight: Semaphore,
    retry_policy: Arc<dyn RetryPolicy>,
}

impl ResourceFullDataDownloaderImpl {
    pub fn new(config: &SyncConfig, retry_policy: Option<Arc<dyn RetryPolicy>>) -> Result<Self> {
        let (in_flight, retry_policy) = build_limits(
            config.max_in_flight_downloads,
            retry_policy,
            config.retry_attempts,
        )?;
        Ok(Self {
            in_flight,
            retry_policy,
        })
    }
}

#[async_trait]
impl ResourceFullDataDownloader for ResourceFullDataDownloaderImpl {
    async fn download_full_resource_data(
        &self,
        resource_guid: &Guid,
        note_store: Arc<dyn NoteStore>,
        ctx: &RequestContext,
    ) -> Result<Resource> {
        let _permit = self
            .in_flight
            .acquire()
            .await
            .map_err(|_| SyncError::Internal("download semaphore closed".to_string()))?;

        debug!(guid = %resource_guid, "Downloading full resource data");
        with_retry(
            self.retry_policy.as_ref(),
            ctx.max_request_retry_count,
            || note_store.get_resource(resource_guid, true, ctx),
        )
        .await
        .map_err(SyncError::Remote)
    }
}
