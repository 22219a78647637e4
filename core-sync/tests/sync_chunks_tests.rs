mod common;

use common::*;
use core_async::progress::progress_channel;
use core_async::sync::CancellationToken;
use core_library::{Guid, LinkedNotebook, LocalStorage, Note};
use core_remote::fake::FakeNoteStore;
use core_remote::{EdamErrorCode, RemoteError, RequestContext};
use core_sync::{SyncChunksProvider, SyncChunksProviderImpl, SyncError};
use std::sync::Arc;

const LINKED_STORE_URL: &str = "https://example.com/shard/s7/notestore";

fn provider(harness: &Harness, max_entries: i32) -> SyncChunksProviderImpl {
    SyncChunksProviderImpl::new(harness.provider.clone(), max_entries, fast_retry()).unwrap()
}

fn note_guids(chunks: &[core_library::SyncChunk]) -> Vec<Guid> {
    chunks
        .iter()
        .flat_map(|chunk| chunk.notes.iter().filter_map(|note| note.guid.clone()))
        .collect()
}

#[core_async::test]
async fn test_pages_until_update_count() {
    let harness = Harness::new().await;
    let notes: Vec<Note> = (0..5).map(|i| harness.remote_note(&format!("note {}", i))).collect();
    let (sender, receiver) = progress_channel(0, 100);

    let result = provider(&harness, 2)
        .fetch_sync_chunks(0, &RequestContext::default(), &CancellationToken::new(), Some(sender))
        .await;

    assert!(result.is_complete());
    assert_eq!(result.chunks.len(), 3);
    assert_eq!(harness.remote.sync_chunk_request_count(), 3);

    let highs: Vec<_> = result.chunks.iter().map(|c| c.chunk_high_usn).collect();
    assert_eq!(highs, vec![Some(2), Some(4), Some(5)]);
    let expected: Vec<Guid> = notes.iter().filter_map(|n| n.guid.clone()).collect();
    assert_eq!(note_guids(&result.chunks), expected);
    assert!(result.chunks.iter().all(|c| c.notes.iter().all(|n| n.content.is_none())));

    assert_eq!(receiver.value(), 100);
}

#[core_async::test]
async fn test_incremental_fetch_starts_after_usn() {
    let harness = Harness::new().await;
    let notes: Vec<Note> = (0..5).map(|i| harness.remote_note(&format!("note {}", i))).collect();

    let result = provider(&harness, 10)
        .fetch_sync_chunks(3, &RequestContext::default(), &CancellationToken::new(), None)
        .await;

    assert!(result.is_complete());
    assert_eq!(result.chunks.len(), 1);
    let expected: Vec<Guid> = notes[3..].iter().filter_map(|n| n.guid.clone()).collect();
    assert_eq!(note_guids(&result.chunks), expected);
}

#[core_async::test]
async fn test_up_to_date_account_yields_no_chunks() {
    let harness = Harness::new().await;
    harness.remote_note("only");

    let result = provider(&harness, 10)
        .fetch_sync_chunks(
            harness.remote.max_usn(),
            &RequestContext::default(),
            &CancellationToken::new(),
            None,
        )
        .await;

    assert!(result.is_complete());
    assert!(result.chunks.is_empty());
}

#[core_async::test]
async fn test_failure_keeps_chunks_fetched_so_far() {
    let harness = Harness::new().await;
    for i in 0..5 {
        harness.remote_note(&format!("note {}", i));
    }
    harness.remote.set_sync_chunk_error(
        2,
        RemoteError::system(EdamErrorCode::InternalError, "shard exploded"),
    );

    let result = provider(&harness, 2)
        .fetch_sync_chunks(0, &RequestContext::default(), &CancellationToken::new(), None)
        .await;

    assert!(!result.is_complete());
    assert_eq!(result.chunks.len(), 1);
    assert!(matches!(result.error, Some(SyncError::Remote(_))));
}

#[core_async::test]
async fn test_rate_limit_surfaces_without_retry() {
    let harness = Harness::new().await;
    harness.remote_note("note");
    harness
        .remote
        .set_sync_chunk_error(0, RemoteError::rate_limit_reached(45));

    let result = provider(&harness, 2)
        .fetch_sync_chunks(0, &RequestContext::default(), &CancellationToken::new(), None)
        .await;

    assert_eq!(harness.remote.sync_chunk_request_count(), 1);
    let error = result.error.unwrap();
    assert_eq!(error.remote().and_then(RemoteError::rate_limit_duration), Some(45));
}

#[core_async::test]
async fn test_cancelled_before_first_request() {
    let harness = Harness::new().await;
    harness.remote_note("note");
    let canceler = CancellationToken::new();
    canceler.cancel();

    let result = provider(&harness, 2)
        .fetch_sync_chunks(0, &RequestContext::default(), &canceler, None)
        .await;

    assert_eq!(result.error, Some(SyncError::Cancelled));
    assert!(result.chunks.is_empty());
    assert_eq!(harness.remote.sync_chunk_request_count(), 0);
}

#[core_async::test]
async fn test_linked_notebook_chunks_come_from_its_store() {
    let harness = Harness::new().await;
    let linked_guid = Guid::new("ln-1");
    let linked_notebook = LinkedNotebook {
        guid: Some(linked_guid.clone()),
        update_sequence_num: Some(1),
        share_name: Some("Team".to_string()),
        note_store_url: Some(LINKED_STORE_URL.to_string()),
        ..Default::default()
    };
    harness
        .storage
        .put_linked_notebook(linked_notebook.clone())
        .await
        .unwrap();

    let shared_store = Arc::new(FakeNoteStore::for_linked_notebook(
        LINKED_STORE_URL,
        linked_guid.clone(),
    ));
    harness.factory.register(shared_store.clone());
    let shared = shared_store.put_note(Note {
        title: Some("Shared note".to_string()),
        ..Default::default()
    });
    harness.remote_note("private note");

    let result = provider(&harness, 10)
        .fetch_linked_notebook_sync_chunks(
            &linked_notebook,
            0,
            &RequestContext::default(),
            &CancellationToken::new(),
            None,
        )
        .await;

    assert!(result.is_complete());
    assert_eq!(note_guids(&result.chunks), vec![shared.guid.unwrap()]);
    assert_eq!(shared_store.sync_chunk_request_count(), 1);
    assert_eq!(harness.remote.sync_chunk_request_count(), 0);
}

#[core_async::test]
async fn test_linked_notebook_without_guid_is_rejected() {
    let harness = Harness::new().await;

    let result = provider(&harness, 10)
        .fetch_linked_notebook_sync_chunks(
            &LinkedNotebook::default(),
            0,
            &RequestContext::default(),
            &CancellationToken::new(),
            None,
        )
        .await;

    assert!(matches!(result.error, Some(SyncError::InvalidArgument(_))));
}

#[test]
fn test_zero_max_entries_is_rejected() {
    let storage: Arc<dyn LocalStorage> = Arc::new(core_library::InMemoryLocalStorage::new());
    let factory = Arc::new(core_remote::fake::FakeNoteStoreFactory::new());
    let note_store_provider =
        Arc::new(core_sync::NoteStoreProviderImpl::new(storage, factory, USER_STORE_URL).unwrap());

    assert!(SyncChunksProviderImpl::new(note_store_provider, 0, None).is_err());
}
