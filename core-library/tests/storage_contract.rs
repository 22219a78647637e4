//! Behaviour shared by every `LocalStorage` implementation.

use core_library::db::create_test_pool;
use core_library::{
    FetchNoteOptions, Guid, InMemoryLocalStorage, LocalStorage, Note, Notebook, Resource,
    SqliteLocalStorage, Tag,
};
use std::sync::Arc;

async fn implementations() -> Vec<(&'static str, Arc<dyn LocalStorage>)> {
    let pool = create_test_pool().await.unwrap();
    vec![
        ("memory", Arc::new(InMemoryLocalStorage::new())),
        ("sqlite", Arc::new(SqliteLocalStorage::new(pool))),
    ]
}

fn note(guid: &str, usn: i32) -> Note {
    Note {
        guid: Some(Guid::new(guid)),
        update_sequence_num: Some(usn),
        content: Some(format!("<en-note>{}</en-note>", guid)),
        active: true,
        ..Default::default()
    }
}

#[core_async::test]
async fn test_local_only_note_is_keyed_by_local_id() {
    for (name, storage) in implementations().await {
        let local_only = Note {
            local_only: true,
            locally_modified: true,
            title: Some("draft".to_string()),
            ..Default::default()
        };
        let local_id = local_only.local_id;
        storage.put_note(local_only.clone()).await.unwrap();
        storage.put_note(local_only).await.unwrap();

        assert_eq!(storage.note_count().await.unwrap(), 1, "{}", name);
        let found = storage
            .find_note_by_local_id(local_id, FetchNoteOptions::METADATA)
            .await
            .unwrap();
        assert!(found.unwrap().guid.is_none(), "{}", name);
    }
}

#[core_async::test]
async fn test_moved_copy_and_remote_update_coexist() {
    for (name, storage) in implementations().await {
        let local = Note {
            locally_modified: true,
            ..note("n1", 1)
        };
        let conflicting_local_id = local.local_id;
        storage.put_note(local).await.unwrap();

        // Local copy moved aside under a fresh identity
        storage
            .put_note(Note {
                guid: None,
                update_sequence_num: None,
                local_only: true,
                ..note("n1", 1)
            })
            .await
            .unwrap();
        // Remote version overwrites the original identity
        storage
            .put_note(Note {
                local_id: conflicting_local_id,
                ..note("n1", 2)
            })
            .await
            .unwrap();

        assert_eq!(storage.note_count().await.unwrap(), 2, "{}", name);
        let stored = storage
            .find_note_by_guid(&Guid::new("n1"), FetchNoteOptions::METADATA)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.local_id, conflicting_local_id, "{}", name);
        assert_eq!(stored.update_sequence_num, Some(2), "{}", name);
        assert!(!stored.locally_modified, "{}", name);
    }
}

#[core_async::test]
async fn test_expunging_notebook_cascades_to_notes() {
    for (name, storage) in implementations().await {
        let notebook = Notebook {
            guid: Some(Guid::new("nb1")),
            name: Some("Projects".to_string()),
            ..Default::default()
        };
        let notebook_local_id = notebook.local_id;
        storage.put_notebook(notebook).await.unwrap();

        let mut child = note("n1", 1);
        child.notebook_local_id = Some(notebook_local_id);
        child.resources.push(Resource {
            guid: Some(Guid::new("r1")),
            ..Default::default()
        });
        storage.put_note(child).await.unwrap();
        storage.put_note(note("n2", 2)).await.unwrap();

        storage
            .expunge_notebook_by_guid(&Guid::new("nb1"))
            .await
            .unwrap();

        assert_eq!(storage.note_count().await.unwrap(), 1, "{}", name);
        assert!(storage.list_notebooks().await.unwrap().is_empty(), "{}", name);
    }
}

#[core_async::test]
async fn test_tag_name_lookup_is_scoped() {
    for (name, storage) in implementations().await {
        storage
            .put_tag(Tag {
                guid: Some(Guid::new("t1")),
                name: Some("Urgent".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        storage
            .put_tag(Tag {
                guid: Some(Guid::new("t2")),
                name: Some("urgent".to_string()),
                linked_notebook_guid: Some(Guid::new("ln1")),
                ..Default::default()
            })
            .await
            .unwrap();

        let own = storage.find_tag_by_name("URGENT", None).await.unwrap();
        assert_eq!(own.unwrap().guid, Some(Guid::new("t1")), "{}", name);
        let linked = storage
            .find_tag_by_name("urgent", Some(&Guid::new("ln1")))
            .await
            .unwrap();
        assert_eq!(linked.unwrap().guid, Some(Guid::new("t2")), "{}", name);
        assert_eq!(storage.list_tags().await.unwrap().len(), 2, "{}", name);
    }
}
