use async_trait::async_trait;
use core_library::{
    Guid, InMemoryLocalStorage, LinkedNotebook, LocalStorage, Note, Notebook, Resource,
    SavedSearch, SyncChunk, Tag,
};
use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
use core_sync::{
    ConflictPolicy, ConflictResolution, EntitiesProcessorCallback, EventBusEntitiesCallback,
    LinkedNotebooksProcessor, NotebooksProcessor, SavedSearchesProcessor,
    SimpleSyncConflictResolver, SyncConflictResolver, SyncError, TagsProcessor,
};
use mockall::mock;
use std::sync::{Arc, Mutex};

mock! {
    pub Resolver {}

    #[async_trait]
    impl SyncConflictResolver for Resolver {
        async fn resolve_note_conflict(&self, theirs: &Note, mine: &Note) -> core_sync::Result<ConflictResolution<Note>>;
        async fn resolve_resource_conflict(&self, theirs: &Resource, mine: &Resource) -> core_sync::Result<ConflictResolution<Resource>>;
        async fn resolve_notebook_conflict(&self, theirs: &Notebook, mine: &Notebook) -> core_sync::Result<ConflictResolution<Notebook>>;
        async fn resolve_tag_conflict(&self, theirs: &Tag, mine: &Tag) -> core_sync::Result<ConflictResolution<Tag>>;
        async fn resolve_saved_search_conflict(&self, theirs: &SavedSearch, mine: &SavedSearch) -> core_sync::Result<ConflictResolution<SavedSearch>>;
    }
}

#[derive(Default)]
struct ProgressRecorder {
    reports: Mutex<Vec<(u64, u64, u64, u64)>>,
}

impl EntitiesProcessorCallback for ProgressRecorder {
    fn on_processing_progress(&self, total: u64, added: u64, updated: u64, expunged: u64) {
        self.reports
            .lock()
            .unwrap()
            .push((total, added, updated, expunged));
    }
}

fn resolver(policy: ConflictPolicy) -> Arc<dyn SyncConflictResolver> {
    Arc::new(SimpleSyncConflictResolver::new(policy))
}

fn notebook(guid: &str, usn: i32, name: &str) -> Notebook {
    Notebook {
        guid: Some(Guid::new(guid)),
        update_sequence_num: Some(usn),
        name: Some(name.to_string()),
        ..Default::default()
    }
}

fn tag(guid: &str, usn: i32, name: &str, parent: Option<&str>) -> Tag {
    Tag {
        guid: Some(Guid::new(guid)),
        update_sequence_num: Some(usn),
        name: Some(name.to_string()),
        parent_guid: parent.map(Guid::new),
        ..Default::default()
    }
}

#[core_async::test]
async fn test_notebooks_added_updated_and_expunged() {
    let storage = Arc::new(InMemoryLocalStorage::new());
    let existing = notebook("nb-b", 1, "Old name");
    storage.put_notebook(existing.clone()).await.unwrap();
    let doomed = notebook("nb-c", 2, "Archive");
    storage.put_notebook(doomed.clone()).await.unwrap();
    storage
        .put_note(Note {
            guid: Some(Guid::new("archived-note")),
            notebook_guid: doomed.guid.clone(),
            notebook_local_id: Some(doomed.local_id),
            ..Default::default()
        })
        .await
        .unwrap();

    let chunk = SyncChunk {
        chunk_high_usn: Some(12),
        notebooks: vec![
            notebook("nb-a", 10, "Travel"),
            notebook("nb-b", 11, "New name"),
            notebook("nb-c", 12, "Archive"),
        ],
        expunged_notebooks: vec![Guid::new("nb-c")],
        ..Default::default()
    };

    let recorder = Arc::new(ProgressRecorder::default());
    let status = NotebooksProcessor::new(storage.clone(), resolver(ConflictPolicy::PreferRemote))
        .process(&[chunk], Some(recorder.clone()))
        .await;

    assert_eq!(status.total_entities, 3);
    assert_eq!(status.total_added, 1);
    assert_eq!(status.total_updated, 1);
    assert_eq!(status.total_expunged, 1);
    assert_eq!(status.expunged_guids, vec![Guid::new("nb-c")]);
    assert!(!status.processed_guids_and_usns.contains_key(&Guid::new("nb-c")));
    assert_eq!(
        status.processed_guids_and_usns.get(&Guid::new("nb-b")),
        Some(&11)
    );

    let renamed = storage
        .find_notebook_by_guid(&Guid::new("nb-b"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(renamed.local_id, existing.local_id);
    assert_eq!(renamed.name.as_deref(), Some("New name"));
    assert!(storage
        .find_notebook_by_guid(&Guid::new("nb-c"))
        .await
        .unwrap()
        .is_none());
    assert_eq!(storage.note_count().await.unwrap(), 0);

    let reports = recorder.reports.lock().unwrap();
    assert_eq!(reports.len(), 3);
    assert_eq!(reports.last(), Some(&(3, 1, 1, 1)));
}

#[core_async::test]
async fn test_tags_are_stored_parents_first() {
    let storage = Arc::new(InMemoryLocalStorage::new());
    let chunk = SyncChunk {
        tags: vec![
            tag("grandchild", 13, "2024", Some("child")),
            tag("child", 12, "Projects", Some("root")),
            tag("root", 11, "Work", None),
        ],
        ..Default::default()
    };

    let status = TagsProcessor::new(storage.clone(), resolver(ConflictPolicy::PreferRemote))
        .process(&[chunk], None)
        .await;

    assert_eq!(status.total_added, 3);
    assert!(status.entities_which_failed_to_process.is_empty());

    let find = |guid: &'static str| {
        let storage = storage.clone();
        async move { storage.find_tag_by_guid(&Guid::new(guid)).await.unwrap().unwrap() }
    };
    let root = find("root").await;
    let child = find("child").await;
    let grandchild = find("grandchild").await;

    assert_eq!(root.parent_local_id, None);
    assert_eq!(child.parent_local_id, Some(root.local_id));
    assert_eq!(grandchild.parent_local_id, Some(child.local_id));
}

#[core_async::test]
async fn test_notebook_name_clash_renames_local_notebook() {
    let storage = Arc::new(InMemoryLocalStorage::new());
    let mine = Notebook {
        name: Some("Work".to_string()),
        locally_modified: true,
        local_only: true,
        ..Default::default()
    };
    storage.put_notebook(mine.clone()).await.unwrap();

    let chunk = SyncChunk {
        notebooks: vec![notebook("nb-remote", 5, "work")],
        ..Default::default()
    };
    let status = NotebooksProcessor::new(storage.clone(), resolver(ConflictPolicy::PreferRemote))
        .process(&[chunk], None)
        .await;

    assert_eq!(status.total_added, 1);

    let notebooks = storage.list_notebooks().await.unwrap();
    assert_eq!(notebooks.len(), 2);
    let renamed = storage
        .find_notebook_by_local_id(mine.local_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(renamed.name.as_deref(), Some("Work - conflicting"));
    assert!(renamed.guid.is_none());

    let theirs = storage
        .find_notebook_by_guid(&Guid::new("nb-remote"))
        .await
        .unwrap()
        .unwrap();
    assert_ne!(theirs.local_id, mine.local_id);
    assert_eq!(theirs.name.as_deref(), Some("work"));
}

#[core_async::test]
async fn test_use_theirs_on_name_clash_adopts_local_identity() {
    let storage = Arc::new(InMemoryLocalStorage::new());
    let mine = Tag {
        name: Some("urgent".to_string()),
        locally_modified: true,
        ..Default::default()
    };
    storage.put_tag(mine.clone()).await.unwrap();

    let mut mock = MockResolver::new();
    let mine_id = mine.local_id;
    mock.expect_resolve_tag_conflict()
        .withf(move |theirs, mine| {
            theirs.guid == Some(Guid::new("t1")) && mine.local_id == mine_id
        })
        .times(1)
        .returning(|_, _| Ok(ConflictResolution::UseTheirs));

    let chunk = SyncChunk {
        tags: vec![tag("t1", 3, "Urgent", None)],
        ..Default::default()
    };
    let status = TagsProcessor::new(storage.clone(), Arc::new(mock))
        .process(&[chunk], None)
        .await;

    assert_eq!(status.total_updated, 1);
    assert_eq!(status.total_added, 0);

    let tags = storage.list_tags().await.unwrap();
    assert_eq!(tags.len(), 1);
    assert_eq!(tags[0].local_id, mine.local_id);
    assert_eq!(tags[0].guid, Some(Guid::new("t1")));
    assert_eq!(tags[0].name.as_deref(), Some("Urgent"));
}

#[core_async::test]
async fn test_prefer_local_keeps_modified_notebook() {
    let storage = Arc::new(InMemoryLocalStorage::new());
    let mine = Notebook {
        locally_modified: true,
        ..notebook("nb-1", 4, "My edits")
    };
    storage.put_notebook(mine.clone()).await.unwrap();

    let chunk = SyncChunk {
        notebooks: vec![notebook("nb-1", 9, "Their edits")],
        ..Default::default()
    };
    let status = NotebooksProcessor::new(storage.clone(), resolver(ConflictPolicy::PreferLocal))
        .process(&[chunk], None)
        .await;

    assert_eq!(status.total_updated, 1);
    assert_eq!(
        status.processed_guids_and_usns.get(&Guid::new("nb-1")),
        Some(&9)
    );

    let stored = storage
        .find_notebook_by_guid(&Guid::new("nb-1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored, mine);
}

#[core_async::test]
async fn test_keep_both_saved_search_stores_local_copy() {
    let storage = Arc::new(InMemoryLocalStorage::new());
    let mine = SavedSearch {
        guid: Some(Guid::new("s1")),
        update_sequence_num: Some(2),
        name: Some("Todo".to_string()),
        query: Some("tag:todo".to_string()),
        locally_modified: true,
        ..Default::default()
    };
    storage.put_saved_search(mine.clone()).await.unwrap();

    let chunk = SyncChunk {
        searches: vec![SavedSearch {
            guid: Some(Guid::new("s1")),
            update_sequence_num: Some(7),
            name: Some("Todo".to_string()),
            query: Some("tag:todo -tag:done".to_string()),
            ..Default::default()
        }],
        ..Default::default()
    };
    let status = SavedSearchesProcessor::new(storage.clone(), resolver(ConflictPolicy::KeepBoth))
        .process(&[chunk], None)
        .await;

    assert_eq!(status.total_updated, 1);

    let searches = storage.list_saved_searches().await.unwrap();
    assert_eq!(searches.len(), 2);

    let copy = searches.iter().find(|s| s.guid.is_none()).unwrap();
    assert_ne!(copy.local_id, mine.local_id);
    assert_eq!(copy.name.as_deref(), Some("Todo - conflicting"));
    assert_eq!(copy.query, mine.query);
    assert!(copy.locally_modified);

    let theirs = searches.iter().find(|s| s.guid.is_some()).unwrap();
    assert_eq!(theirs.local_id, mine.local_id);
    assert_eq!(theirs.query.as_deref(), Some("tag:todo -tag:done"));
    assert!(!theirs.locally_modified);
}

#[core_async::test]
async fn test_resolver_error_is_recorded_per_entity() {
    let storage = Arc::new(InMemoryLocalStorage::new());
    storage
        .put_notebook(Notebook {
            locally_modified: true,
            ..notebook("nb-1", 1, "Mine")
        })
        .await
        .unwrap();

    let mut mock = MockResolver::new();
    mock.expect_resolve_notebook_conflict()
        .times(1)
        .returning(|_, _| Err(SyncError::Internal("prompt dismissed".into())));

    let chunk = SyncChunk {
        notebooks: vec![notebook("nb-1", 2, "Theirs"), notebook("nb-2", 3, "Other")],
        ..Default::default()
    };
    let status = NotebooksProcessor::new(storage.clone(), Arc::new(mock))
        .process(&[chunk], None)
        .await;

    assert_eq!(status.total_added, 1);
    assert_eq!(status.entities_which_failed_to_process.len(), 1);
    let failure = &status.entities_which_failed_to_process[0];
    assert_eq!(failure.guid, Some(Guid::new("nb-1")));
    assert!(matches!(failure.error, SyncError::ConflictResolution(_)));
}

#[core_async::test]
async fn test_entity_without_guid_fails() {
    let storage = Arc::new(InMemoryLocalStorage::new());
    let chunk = SyncChunk {
        tags: vec![Tag {
            name: Some("nameless".to_string()),
            ..Default::default()
        }],
        ..Default::default()
    };

    let status = TagsProcessor::new(storage.clone(), resolver(ConflictPolicy::PreferRemote))
        .process(&[chunk], None)
        .await;

    assert_eq!(status.entities_which_failed_to_process.len(), 1);
    assert!(matches!(
        status.entities_which_failed_to_process[0].error,
        SyncError::InvalidArgument(_)
    ));
    assert!(storage.list_tags().await.unwrap().is_empty());
}

#[core_async::test]
async fn test_expunged_linked_notebook_takes_its_scope_along() {
    let storage = Arc::new(InMemoryLocalStorage::new());
    let shared = Guid::new("ln-1");
    storage
        .put_linked_notebook(LinkedNotebook {
            guid: Some(shared.clone()),
            update_sequence_num: Some(1),
            share_name: Some("Team".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    storage
        .put_notebook(Notebook {
            linked_notebook_guid: Some(shared.clone()),
            ..notebook("shared-nb", 1, "Team notebook")
        })
        .await
        .unwrap();
    storage
        .put_tag(Tag {
            linked_notebook_guid: Some(shared.clone()),
            ..tag("shared-tag", 1, "team", None)
        })
        .await
        .unwrap();
    storage.put_notebook(notebook("own-nb", 2, "Mine")).await.unwrap();
    storage.put_tag(tag("own-tag", 3, "mine", None)).await.unwrap();

    let chunk = SyncChunk {
        linked_notebooks: vec![LinkedNotebook {
            guid: Some(Guid::new("ln-2")),
            update_sequence_num: Some(8),
            share_name: Some("Family".to_string()),
            ..Default::default()
        }],
        expunged_linked_notebooks: vec![shared.clone()],
        ..Default::default()
    };
    let status = LinkedNotebooksProcessor::new(storage.clone())
        .process(&[chunk], None)
        .await;

    assert_eq!(status.total_expunged, 1);
    assert_eq!(status.total_added, 1);
    assert!(storage.find_linked_notebook_by_guid(&shared).await.unwrap().is_none());
    assert!(storage
        .find_linked_notebook_by_guid(&Guid::new("ln-2"))
        .await
        .unwrap()
        .is_some());

    let notebooks = storage.list_notebooks().await.unwrap();
    assert_eq!(notebooks.len(), 1);
    assert_eq!(notebooks[0].guid, Some(Guid::new("own-nb")));
    let tags = storage.list_tags().await.unwrap();
    assert_eq!(tags.len(), 1);
    assert_eq!(tags[0].guid, Some(Guid::new("own-tag")));
}

#[core_async::test]
async fn test_known_linked_notebook_counts_as_updated() {
    let storage = Arc::new(InMemoryLocalStorage::new());
    let linked = LinkedNotebook {
        guid: Some(Guid::new("ln-1")),
        update_sequence_num: Some(1),
        share_name: Some("Team".to_string()),
        ..Default::default()
    };
    storage.put_linked_notebook(linked.clone()).await.unwrap();

    let chunk = SyncChunk {
        linked_notebooks: vec![LinkedNotebook {
            update_sequence_num: Some(4),
            share_name: Some("Team (renamed)".to_string()),
            ..linked
        }],
        ..Default::default()
    };
    let status = LinkedNotebooksProcessor::new(storage.clone())
        .process(&[chunk], None)
        .await;

    assert_eq!(status.total_updated, 1);
    assert_eq!(
        status.processed_guids_and_usns.get(&Guid::new("ln-1")),
        Some(&4)
    );
    let stored = storage
        .find_linked_notebook_by_guid(&Guid::new("ln-1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.share_name.as_deref(), Some("Team (renamed)"));
}

#[core_async::test]
async fn test_progress_is_published_on_event_bus() {
    let storage = Arc::new(InMemoryLocalStorage::new());
    let bus = EventBus::default();
    let mut subscriber = bus.subscribe();
    let callback: Arc<dyn EntitiesProcessorCallback> =
        Arc::new(EventBusEntitiesCallback::new(bus, "notebooks"));

    let chunk = SyncChunk {
        notebooks: vec![notebook("nb-1", 1, "Inbox")],
        ..Default::default()
    };
    NotebooksProcessor::new(storage, resolver(ConflictPolicy::PreferRemote))
        .process(&[chunk], Some(callback))
        .await;

    assert_eq!(
        subscriber.recv().await.unwrap(),
        CoreEvent::Sync(SyncEvent::EntitiesProgress {
            entity_kind: "notebooks".to_string(),
            total: 1,
            added: 1,
            updated: 0,
            expunged: 0,
        })
    );
}

#[core_async::test]
async fn test_detached_copy_never_reuses_local_id() {
    let storage = Arc::new(InMemoryLocalStorage::new());
    let mine = Tag {
        locally_modified: true,
        ..tag("t1", 1, "Mine", None)
    };
    storage.put_tag(mine.clone()).await.unwrap();

    let mut mock = MockResolver::new();
    mock.expect_resolve_tag_conflict()
        .times(1)
        .returning(|_, mine| {
            Ok(ConflictResolution::MoveMine(Tag {
                name: Some("Mine (local)".to_string()),
                ..mine.clone()
            }))
        });

    let chunk = SyncChunk {
        tags: vec![tag("t1", 6, "Theirs", None)],
        ..Default::default()
    };
    TagsProcessor::new(storage.clone(), Arc::new(mock))
        .process(&[chunk], None)
        .await;

    let tags = storage.list_tags().await.unwrap();
    assert_eq!(tags.len(), 2);
    let copy = tags.iter().find(|t| t.guid.is_none()).unwrap();
    assert_ne!(copy.local_id, mine.local_id);
    assert_eq!(copy.name.as_deref(), Some("Mine (local)"));
    let theirs = tags.iter().find(|t| t.guid.is_some()).unwrap();
    assert_eq!(theirs.local_id, mine.local_id);
}
