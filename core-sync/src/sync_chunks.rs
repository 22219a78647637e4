//! Sync chunk download and chunk utilities.
//!
//! [`SyncChunksProviderImpl`] pages through a scope's change log:
//! every request asks for entries after the highest USN seen so far, until
//! the returned chunk reaches the scope's update count.

use crate::error::{Result, SyncError};
use crate::note_store_provider::NoteStoreProvider;
use async_trait::async_trait;
use core_async::progress::{rescale, ProgressSender};
use core_async::sync::CancellationToken;
use core_library::{
    Guid, LinkedNotebook, Note, Notebook, Resource, SavedSearch, SyncChunk, SyncEntity, Tag, Usn,
};
use core_remote::{with_retry, ExponentialRetryPolicy, RequestContext, RetryPolicy, SyncChunkFilter};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

// ============================================================================
// Chunk utilities
// ============================================================================

fn collect<T: Clone>(chunks: &[SyncChunk], items: impl Fn(&SyncChunk) -> &Vec<T>) -> Vec<T> {
    chunks.iter().flat_map(|c| items(c).iter().cloned()).collect()
}

/// One entry per guid in first-seen order, holding the highest USN listed.
///
/// A scope that changes between page fetches can list the same entity in
/// two chunks. Entities without a guid are kept as they are.
fn collect_latest<T: SyncEntity>(
    chunks: &[SyncChunk],
    items: impl Fn(&SyncChunk) -> &Vec<T>,
) -> Vec<T> {
    let mut latest: Vec<T> = Vec::new();
    let mut positions: HashMap<Guid, usize> = HashMap::new();
    for entity in chunks.iter().flat_map(|c| items(c).iter()) {
        match entity.guid() {
            Some(guid) => match positions.get(guid) {
                Some(&index) => {
                    if entity.update_sequence_num() > latest[index].update_sequence_num() {
                        latest[index] = entity.clone();
                    }
                }
                None => {
                    positions.insert(guid.clone(), latest.len());
                    latest.push(entity.clone());
                }
            },
            None => latest.push(entity.clone()),
        }
    }
    latest
}

/// Guids in first-seen order, without duplicates.
fn collect_guids(chunks: &[SyncChunk], guids: impl Fn(&SyncChunk) -> &Vec<Guid>) -> Vec<Guid> {
    let mut seen = HashSet::new();
    chunks
        .iter()
        .flat_map(|c| guids(c).iter())
        .filter(|guid| seen.insert((*guid).clone()))
        .cloned()
        .collect()
}

pub fn collect_notes(chunks: &[SyncChunk]) -> Vec<Note> {
    collect_latest(chunks, |c| &c.notes)
}

pub fn collect_expunged_note_guids(chunks: &[SyncChunk]) -> Vec<Guid> {
    collect_guids(chunks, |c| &c.expunged_notes)
}

pub fn collect_resources(chunks: &[SyncChunk]) -> Vec<Resource> {
    collect_latest(chunks, |c| &c.resources)
}

pub fn collect_notebooks(chunks: &[SyncChunk]) -> Vec<Notebook> {
    collect_latest(chunks, |c| &c.notebooks)
}

pub fn collect_expunged_notebook_guids(chunks: &[SyncChunk]) -> Vec<Guid> {
    collect_guids(chunks, |c| &c.expunged_notebooks)
}

pub fn collect_tags(chunks: &[SyncChunk]) -> Vec<Tag> {
    collect_latest(chunks, |c| &c.tags)
}

pub fn collect_expunged_tag_guids(chunks: &[SyncChunk]) -> Vec<Guid> {
    collect_guids(chunks, |c| &c.expunged_tags)
}

pub fn collect_saved_searches(chunks: &[SyncChunk]) -> Vec<SavedSearch> {
    collect_latest(chunks, |c| &c.searches)
}

pub fn collect_expunged_saved_search_guids(chunks: &[SyncChunk]) -> Vec<Guid> {
    collect_guids(chunks, |c| &c.expunged_searches)
}

pub fn collect_linked_notebooks(chunks: &[SyncChunk]) -> Vec<LinkedNotebook> {
    collect(chunks, |c| &c.linked_notebooks)
}

pub fn collect_expunged_linked_notebook_guids(chunks: &[SyncChunk]) -> Vec<Guid> {
    collect_guids(chunks, |c| &c.expunged_linked_notebooks)
}

/// Drops entities that are also expunged in the same run. An expunge always
/// wins over an update listed alongside it.
pub fn filter_out_expunged<T: SyncEntity>(entities: Vec<T>, expunged: &[Guid]) -> Vec<T> {
    if expunged.is_empty() {
        return entities;
    }
    let expunged: HashSet<&Guid> = expunged.iter().collect();
    entities
        .into_iter()
        .filter(|entity| entity.guid().map_or(true, |guid| !expunged.contains(guid)))
        .collect()
}

/// Highest USN covered by `chunks`.
pub fn high_usn(chunks: &[SyncChunk]) -> Option<Usn> {
    chunks.iter().filter_map(|c| c.chunk_high_usn).max()
}

// ============================================================================
// Sync chunks provider
// ============================================================================

/// Chunks downloaded for one scope. Chunks fetched before a failure are kept.
#[derive(Debug, Clone, Default)]
pub struct SyncChunksResult {
    pub chunks: Vec<SyncChunk>,
    pub error: Option<SyncError>,
}

impl SyncChunksResult {
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }
}

#[async_trait]
pub trait SyncChunksProvider: Send + Sync {
    async fn fetch_sync_chunks(
        &self,
        after_usn: Usn,
        ctx: &RequestContext,
        canceler: &CancellationToken,
        progress: Option<ProgressSender>,
    ) -> SyncChunksResult;

    async fn fetch_linked_notebook_sync_chunks(
        &self,
        linked_notebook: &LinkedNotebook,
        after_usn: Usn,
        ctx: &RequestContext,
        canceler: &CancellationToken,
        progress: Option<ProgressSender>,
    ) -> SyncChunksResult;
}

pub struct SyncChunksProviderImpl {
    note_store_provider: Arc<dyn NoteStoreProvider>,
    retry_policy: Arc<dyn RetryPolicy>,
    max_entries: i32,
    filter: SyncChunkFilter,
}

impl SyncChunksProviderImpl {
    pub fn new(
        note_store_provider: Arc<dyn NoteStoreProvider>,
        max_entries: i32,
        retry_policy: Option<Arc<dyn RetryPolicy>>,
    ) -> Result<Self> {
        if max_entries <= 0 {
            return Err(SyncError::InvalidArgument(format!(
                "max sync chunk entries must be positive, got {}",
                max_entries
            )));
        }
        Ok(Self {
            note_store_provider,
            retry_policy: retry_policy.unwrap_or_else(|| Arc::new(ExponentialRetryPolicy::default())),
            max_entries,
            filter: SyncChunkFilter::all(),
        })
    }

    pub fn with_filter(mut self, filter: SyncChunkFilter) -> Self {
        self.filter = filter;
        self
    }
}

/// Requests chunks until the scope's update count is reached.
async fn fetch_all<F, Fut>(
    after_usn: Usn,
    canceler: &CancellationToken,
    progress: Option<ProgressSender>,
    mut fetch: F,
) -> SyncChunksResult
where
    F: FnMut(Usn) -> Fut,
    Fut: std::future::Future<Output = Result<SyncChunk>>,
{
    let mut result = SyncChunksResult::default();
    let start_usn = after_usn;
    let mut last_usn = after_usn;

    loop {
        if canceler.is_cancelled() {
            info!(after_usn = last_usn, "Sync chunks download cancelled");
            result.error = Some(SyncError::Cancelled);
            break;
        }

        let chunk = match fetch(last_usn).await {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!(after_usn = last_usn, error = %e, "Failed to download sync chunk");
                result.error = Some(e);
                break;
            }
        };

        let Some(chunk_high_usn) = chunk.chunk_high_usn else {
            debug!(after_usn = last_usn, "Received empty sync chunk");
            break;
        };
        let update_count = chunk.update_count;
        result.chunks.push(chunk);

        if let Some(progress) = progress.as_ref() {
            let from = (
                start_usn.max(0) as u64,
                update_count.max(start_usn).max(0) as u64,
            );
            progress.set(rescale(chunk_high_usn.max(0) as u64, from, progress.range()));
        }

        if chunk_high_usn >= update_count || chunk_high_usn <= last_usn {
            break;
        }
        last_usn = chunk_high_usn;
    }

    debug!(chunks = result.chunks.len(), "Sync chunks download finished");
    result
}

#[async_trait]
impl SyncChunksProvider for SyncChunksProviderImpl {
    #[instrument(skip(self, ctx, canceler, progress))]
    async fn fetch_sync_chunks(
        &self,
        after_usn: Usn,
        ctx: &RequestContext,
        canceler: &CancellationToken,
        progress: Option<ProgressSender>,
    ) -> SyncChunksResult {
        let store = match self.note_store_provider.user_own_note_store(ctx).await {
            Ok(store) => store,
            Err(e) => {
                return SyncChunksResult {
                    chunks: Vec::new(),
                    error: Some(e),
                }
            }
        };

        fetch_all(after_usn, canceler, progress, |usn| {
            let store = store.clone();
            async move {
                with_retry(self.retry_policy.as_ref(), ctx.max_request_retry_count, || {
                    store.get_filtered_sync_chunk(usn, self.max_entries, &self.filter, ctx)
                })
                .await
                .map_err(SyncError::from)
            }
        })
        .await
    }

    #[instrument(skip(self, linked_notebook, ctx, canceler, progress), fields(linked_notebook_guid = ?linked_notebook.guid))]
    async fn fetch_linked_notebook_sync_chunks(
        &self,
        linked_notebook: &LinkedNotebook,
        after_usn: Usn,
        ctx: &RequestContext,
        canceler: &CancellationToken,
        progress: Option<ProgressSender>,
    ) -> SyncChunksResult {
        let Some(guid) = linked_notebook.guid.as_ref() else {
            return SyncChunksResult {
                chunks: Vec::new(),
                error: Some(SyncError::InvalidArgument(
                    "linked notebook has no guid".to_string(),
                )),
            };
        };

        let store = match self.note_store_provider.linked_notebook_note_store(guid, ctx).await {
            Ok(store) => store,
            Err(e) => {
                return SyncChunksResult {
                    chunks: Vec::new(),
                    error: Some(e),
                }
            }
        };

        let full_sync_only = after_usn == 0;
        fetch_all(after_usn, canceler, progress, |usn| {
            let store = store.clone();
            async move {
                with_retry(self.retry_policy.as_ref(), ctx.max_request_retry_count, || {
                    store.get_linked_notebook_sync_chunk(
                        linked_notebook,
                        usn,
                        self.max_entries,
                        full_sync_only,
                        ctx,
                    )
                })
                .await
                .map_err(SyncError::from)
            }
        })
        .await
    }
}
