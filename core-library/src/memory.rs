//! In-memory [`LocalStorage`] implementation.
//!
//! Backs tests and ephemeral sessions. Every entity type lives in an
//! [`EntityTable`] keyed by local id with a secondary guid index.

use crate::error::{LibraryError, Result};
use crate::models::{
    Guid, LinkedNotebook, LocalId, Note, Notebook, Resource, SavedSearch, SyncEntity, Tag,
};
use crate::storage::{
    apply_note_options, apply_resource_options, name_key, FetchNoteOptions, FetchResourceOptions,
    LocalStorage,
};
use async_trait::async_trait;
use core_async::sync::RwLock;
use std::collections::{HashMap, HashSet};
use tracing::debug;

struct EntityTable<T> {
    by_local_id: HashMap<LocalId, T>,
    guid_index: HashMap<Guid, LocalId>,
}

impl<T> Default for EntityTable<T> {
    fn default() -> Self {
        Self {
            by_local_id: HashMap::new(),
            guid_index: HashMap::new(),
        }
    }
}

impl<T: SyncEntity> EntityTable<T> {
    fn find_by_guid(&self, guid: &Guid) -> Option<&T> {
        self.guid_index
            .get(guid)
            .and_then(|local_id| self.by_local_id.get(local_id))
    }

    fn find_by_local_id(&self, local_id: LocalId) -> Option<&T> {
        self.by_local_id.get(&local_id)
    }

    fn find_by_name(&self, name: &str, scope: Option<&Guid>) -> Option<&T> {
        let key = name_key(name);
        self.by_local_id.values().find(|entity| {
            entity.name().map(name_key).as_deref() == Some(key.as_str())
                && entity.linked_notebook_guid() == scope
        })
    }

    /// Inserts or replaces the entity and returns the local id it is stored under.
    fn upsert(&mut self, mut entity: T) -> LocalId {
        if let Some(existing) = entity
            .guid()
            .and_then(|guid| self.guid_index.get(guid).copied())
        {
            entity.set_local_id(existing);
        }

        let local_id = entity.local_id();
        if let Some(previous) = self.by_local_id.get(&local_id) {
            if previous.guid() != entity.guid() {
                if let Some(old_guid) = previous.guid() {
                    self.guid_index.remove(old_guid);
                }
            }
        }

        if let Some(guid) = entity.guid() {
            self.guid_index.insert(guid.clone(), local_id);
        }
        self.by_local_id.insert(local_id, entity);
        local_id
    }

    fn remove_by_local_id(&mut self, local_id: LocalId) -> Option<T> {
        let removed = self.by_local_id.remove(&local_id)?;
        if let Some(guid) = removed.guid() {
            self.guid_index.remove(guid);
        }
        Some(removed)
    }

    fn remove_by_guid(&mut self, guid: &Guid) -> Option<T> {
        let local_id = *self.guid_index.get(guid)?;
        self.remove_by_local_id(local_id)
    }

    fn values(&self) -> impl Iterator<Item = &T> {
        self.by_local_id.values()
    }
}

#[derive(Default)]
struct State {
    notes: EntityTable<Note>,
    resources: EntityTable<Resource>,
    resource_positions: HashMap<LocalId, usize>,
    notebooks: EntityTable<Notebook>,
    tags: EntityTable<Tag>,
    saved_searches: EntityTable<SavedSearch>,
    linked_notebooks: HashMap<Guid, LinkedNotebook>,
}

impl State {
    fn assemble_note(&self, note: &Note, options: FetchNoteOptions) -> Note {
        let mut note = note.clone();
        if options.with_resource_metadata {
            let mut resources: Vec<&Resource> = self
                .resources
                .values()
                .filter(|resource| resource.note_local_id == Some(note.local_id))
                .collect();
            resources.sort_by_key(|resource| {
                self.resource_positions
                    .get(&resource.local_id)
                    .copied()
                    .unwrap_or(usize::MAX)
            });
            note.resources = resources.into_iter().cloned().collect();
        }
        apply_note_options(note, options)
    }

    fn resource_local_ids_of(&self, note_local_id: LocalId) -> Vec<LocalId> {
        self.resources
            .values()
            .filter(|resource| resource.note_local_id == Some(note_local_id))
            .map(|resource| resource.local_id)
            .collect()
    }

    fn remove_resource(&mut self, local_id: LocalId) {
        self.resources.remove_by_local_id(local_id);
        self.resource_positions.remove(&local_id);
    }

    /// Removes the note together with its resources.
    fn remove_note(&mut self, local_id: LocalId) -> Option<Note> {
        let note = self.notes.remove_by_local_id(local_id)?;
        for resource_local_id in self.resource_local_ids_of(local_id) {
            self.remove_resource(resource_local_id);
        }
        Some(note)
    }
}

/// Hash-map backed local storage guarded by an async `RwLock`.
#[derive(Default)]
pub struct InMemoryLocalStorage {
    state: RwLock<State>,
}

impl InMemoryLocalStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LocalStorage for InMemoryLocalStorage {
    async fn find_note_by_guid(
        &self,
        guid: &Guid,
        options: FetchNoteOptions,
    ) -> Result<Option<Note>> {
        let state = self.state.read().await;
        Ok(state
            .notes
            .find_by_guid(guid)
            .map(|note| state.assemble_note(note, options)))
    }

    async fn find_note_by_local_id(
        &self,
        local_id: LocalId,
        options: FetchNoteOptions,
    ) -> Result<Option<Note>> {
        let state = self.state.read().await;
        Ok(state
            .notes
            .find_by_local_id(local_id)
            .map(|note| state.assemble_note(note, options)))
    }

    async fn put_note(&self, mut note: Note) -> Result<()> {
        let resources = std::mem::take(&mut note.resources);
        let mut state = self.state.write().await;

        let note_local_id = state.notes.upsert(note);
        let note_guid = state
            .notes
            .find_by_local_id(note_local_id)
            .and_then(|stored| stored.guid.clone());

        let stale = state.resource_local_ids_of(note_local_id);
        let mut kept = HashSet::with_capacity(resources.len());
        for (position, mut resource) in resources.into_iter().enumerate() {
            resource.note_local_id = Some(note_local_id);
            if note_guid.is_some() {
                resource.note_guid = note_guid.clone();
            }
            let local_id = state.resources.upsert(resource);
            state.resource_positions.insert(local_id, position);
            kept.insert(local_id);
        }
        for local_id in stale.into_iter().filter(|id| !kept.contains(id)) {
            state.remove_resource(local_id);
        }

        debug!(local_id = %note_local_id, "Stored note");
        Ok(())
    }

    async fn expunge_note_by_guid(&self, guid: &Guid) -> Result<()> {
        let mut state = self.state.write().await;
        let Some(local_id) = state.notes.guid_index.get(guid).copied() else {
            return Ok(());
        };
        state.remove_note(local_id);
        debug!(guid = %guid, "Expunged note");
        Ok(())
    }

    async fn list_notes(&self, options: FetchNoteOptions) -> Result<Vec<Note>> {
        let state = self.state.read().await;
        Ok(state
            .notes
            .values()
            .map(|note| state.assemble_note(note, options))
            .collect())
    }

    async fn note_count(&self) -> Result<usize> {
        Ok(self.state.read().await.notes.by_local_id.len())
    }

    async fn find_resource_by_guid(
        &self,
        guid: &Guid,
        options: FetchResourceOptions,
    ) -> Result<Option<Resource>> {
        let state = self.state.read().await;
        Ok(state
            .resources
            .find_by_guid(guid)
            .cloned()
            .map(|resource| apply_resource_options(resource, options)))
    }

    async fn put_resource(&self, mut resource: Resource) -> Result<()> {
        let mut state = self.state.write().await;

        if resource.note_local_id.is_none() {
            let owner = resource
                .note_guid
                .as_ref()
                .and_then(|guid| state.notes.find_by_guid(guid))
                .map(|note| note.local_id);
            resource.note_local_id = owner;
        }

        let local_id = state.resources.upsert(resource);
        if !state.resource_positions.contains_key(&local_id) {
            let position = state.resource_positions.len();
            state.resource_positions.insert(local_id, position);
        }
        Ok(())
    }

    async fn expunge_resource_by_guid(&self, guid: &Guid) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(resource) = state.resources.remove_by_guid(guid) {
            state.resource_positions.remove(&resource.local_id);
        }
        Ok(())
    }

    async fn find_notebook_by_guid(&self, guid: &Guid) -> Result<Option<Notebook>> {
        Ok(self.state.read().await.notebooks.find_by_guid(guid).cloned())
    }

    async fn find_notebook_by_local_id(&self, local_id: LocalId) -> Result<Option<Notebook>> {
        Ok(self
            .state
            .read()
            .await
            .notebooks
            .find_by_local_id(local_id)
            .cloned())
    }

    async fn find_notebook_by_name(
        &self,
        name: &str,
        linked_notebook_guid: Option<&Guid>,
    ) -> Result<Option<Notebook>> {
        Ok(self
            .state
            .read()
            .await
            .notebooks
            .find_by_name(name, linked_notebook_guid)
            .cloned())
    }

    async fn put_notebook(&self, notebook: Notebook) -> Result<()> {
        self.state.write().await.notebooks.upsert(notebook);
        Ok(())
    }

    async fn expunge_notebook_by_guid(&self, guid: &Guid) -> Result<()> {
        let mut state = self.state.write().await;
        let Some(notebook) = state.notebooks.remove_by_guid(guid) else {
            return Ok(());
        };
        let orphaned: Vec<LocalId> = state
            .notes
            .values()
            .filter(|note| note.notebook_local_id == Some(notebook.local_id))
            .map(|note| note.local_id)
            .collect();
        for local_id in &orphaned {
            state.remove_note(*local_id);
        }
        debug!(guid = %guid, notes = orphaned.len(), "Expunged notebook");
        Ok(())
    }

    async fn list_notebooks(&self) -> Result<Vec<Notebook>> {
        Ok(self.state.read().await.notebooks.values().cloned().collect())
    }

    async fn find_tag_by_guid(&self, guid: &Guid) -> Result<Option<Tag>> {
        Ok(self.state.read().await.tags.find_by_guid(guid).cloned())
    }

    async fn find_tag_by_name(
        &self,
        name: &str,
        linked_notebook_guid: Option<&Guid>,
    ) -> Result<Option<Tag>> {
        Ok(self
            .state
            .read()
            .await
            .tags
            .find_by_name(name, linked_notebook_guid)
            .cloned())
    }

    async fn put_tag(&self, mut tag: Tag) -> Result<()> {
        let mut state = self.state.write().await;
        if tag.parent_local_id.is_none() {
            tag.parent_local_id = tag
                .parent_guid
                .as_ref()
                .and_then(|guid| state.tags.find_by_guid(guid))
                .map(|parent| parent.local_id);
        }
        state.tags.upsert(tag);
        Ok(())
    }

    async fn expunge_tag_by_guid(&self, guid: &Guid) -> Result<()> {
        self.state.write().await.tags.remove_by_guid(guid);
        Ok(())
    }

    async fn list_tags(&self) -> Result<Vec<Tag>> {
        Ok(self.state.read().await.tags.values().cloned().collect())
    }

    async fn find_saved_search_by_guid(&self, guid: &Guid) -> Result<Option<SavedSearch>> {
        Ok(self
            .state
            .read()
            .await
            .saved_searches
            .find_by_guid(guid)
            .cloned())
    }

    async fn find_saved_search_by_name(&self, name: &str) -> Result<Option<SavedSearch>> {
        Ok(self
            .state
            .read()
            .await
            .saved_searches
            .find_by_name(name, None)
            .cloned())
    }

    async fn put_saved_search(&self, search: SavedSearch) -> Result<()> {
        self.state.write().await.saved_searches.upsert(search);
        Ok(())
    }

    async fn expunge_saved_search_by_guid(&self, guid: &Guid) -> Result<()> {
        self.state.write().await.saved_searches.remove_by_guid(guid);
        Ok(())
    }

    async fn list_saved_searches(&self) -> Result<Vec<SavedSearch>> {
        Ok(self
            .state
            .read()
            .await
            .saved_searches
            .values()
            .cloned()
            .collect())
    }

    async fn find_linked_notebook_by_guid(&self, guid: &Guid) -> Result<Option<LinkedNotebook>> {
        Ok(self.state.read().await.linked_notebooks.get(guid).cloned())
    }

    async fn put_linked_notebook(&self, linked_notebook: LinkedNotebook) -> Result<()> {
        let guid = linked_notebook
            .guid
            .clone()
            .ok_or_else(|| LibraryError::InvalidInput {
                field: "linked_notebook.guid".to_string(),
                message: "linked notebooks are keyed by guid".to_string(),
            })?;
        self.state
            .write()
            .await
            .linked_notebooks
            .insert(guid, linked_notebook);
        Ok(())
    }

    async fn expunge_linked_notebook_by_guid(&self, guid: &Guid) -> Result<()> {
        self.state.write().await.linked_notebooks.remove(guid);
        Ok(())
    }

    async fn list_linked_notebooks(&self) -> Result<Vec<LinkedNotebook>> {
        Ok(self
            .state
            .read()
            .await
            .linked_notebooks
            .values()
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ResourceData;

    fn remote_note(guid: &str, usn: i32) -> Note {
        Note {
            guid: Some(Guid::new(guid)),
            update_sequence_num: Some(usn),
            title: Some(format!("Note {}", guid)),
            active: true,
            ..Default::default()
        }
    }

    #[core_async::test]
    async fn test_put_and_find_note_by_guid() {
        let storage = InMemoryLocalStorage::new();
        let note = remote_note("n1", 1);
        let local_id = note.local_id;

        storage.put_note(note).await.unwrap();

        let found = storage
            .find_note_by_guid(&Guid::new("n1"), FetchNoteOptions::METADATA)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.local_id, local_id);
        assert_eq!(storage.note_count().await.unwrap(), 1);
    }

    #[core_async::test]
    async fn test_put_with_known_guid_keeps_stored_local_id() {
        let storage = InMemoryLocalStorage::new();
        let original = remote_note("n1", 1);
        let original_local_id = original.local_id;
        storage.put_note(original).await.unwrap();

        // Fresh local id, same guid: replaces the stored note
        let update = Note {
            content: Some("<en-note>v2</en-note>".to_string()),
            ..remote_note("n1", 2)
        };
        storage.put_note(update).await.unwrap();

        assert_eq!(storage.note_count().await.unwrap(), 1);
        let found = storage
            .find_note_by_local_id(original_local_id, FetchNoteOptions::METADATA)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.update_sequence_num, Some(2));
        assert_eq!(found.content.as_deref(), Some("<en-note>v2</en-note>"));
    }

    #[core_async::test]
    async fn test_put_note_replaces_resources_in_order() {
        let storage = InMemoryLocalStorage::new();
        let mut note = remote_note("n1", 1);
        note.resources = vec![
            Resource {
                guid: Some(Guid::new("r1")),
                data: Some(ResourceData::from_body(b"one".to_vec())),
                ..Default::default()
            },
            Resource {
                guid: Some(Guid::new("r2")),
                ..Default::default()
            },
        ];
        storage.put_note(note.clone()).await.unwrap();

        let found = storage
            .find_note_by_guid(&Guid::new("n1"), FetchNoteOptions::FULL)
            .await
            .unwrap()
            .unwrap();
        let guids: Vec<_> = found.resources.iter().map(|r| r.guid.clone()).collect();
        assert_eq!(guids, vec![Some(Guid::new("r1")), Some(Guid::new("r2"))]);
        assert!(found.resources[0].has_binary_data());
        assert_eq!(found.resources[0].note_guid, Some(Guid::new("n1")));

        note.resources.truncate(1);
        storage.put_note(note).await.unwrap();
        assert!(storage
            .find_resource_by_guid(&Guid::new("r2"), FetchResourceOptions::METADATA)
            .await
            .unwrap()
            .is_none());
    }

    #[core_async::test]
    async fn test_expunge_note_removes_resources() {
        let storage = InMemoryLocalStorage::new();
        let mut note = remote_note("n1", 1);
        note.resources.push(Resource {
            guid: Some(Guid::new("r1")),
            ..Default::default()
        });
        storage.put_note(note).await.unwrap();

        storage.expunge_note_by_guid(&Guid::new("n1")).await.unwrap();

        assert_eq!(storage.note_count().await.unwrap(), 0);
        assert!(storage
            .find_resource_by_guid(&Guid::new("r1"), FetchResourceOptions::FULL)
            .await
            .unwrap()
            .is_none());
    }

    #[core_async::test]
    async fn test_expunge_unknown_guid_is_noop() {
        let storage = InMemoryLocalStorage::new();
        assert!(storage
            .expunge_note_by_guid(&Guid::new("missing"))
            .await
            .is_ok());
    }

    #[core_async::test]
    async fn test_find_notebook_by_name_respects_scope() {
        let storage = InMemoryLocalStorage::new();
        storage
            .put_notebook(Notebook {
                guid: Some(Guid::new("nb1")),
                name: Some("Work".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        assert!(storage
            .find_notebook_by_name("work", None)
            .await
            .unwrap()
            .is_some());
        assert!(storage
            .find_notebook_by_name("Work", Some(&Guid::new("ln1")))
            .await
            .unwrap()
            .is_none());
    }

    #[core_async::test]
    async fn test_guid_change_reindexes() {
        let storage = InMemoryLocalStorage::new();
        let tag = Tag {
            guid: Some(Guid::new("t1")),
            name: Some("old".to_string()),
            ..Default::default()
        };
        let local_id = tag.local_id;
        storage.put_tag(tag.clone()).await.unwrap();

        storage
            .put_tag(Tag {
                guid: Some(Guid::new("t2")),
                ..tag
            })
            .await
            .unwrap();

        assert!(storage
            .find_tag_by_guid(&Guid::new("t1"))
            .await
            .unwrap()
            .is_none());
        let found = storage
            .find_tag_by_guid(&Guid::new("t2"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.local_id, local_id);
    }

    #[core_async::test]
    async fn test_tag_parent_local_id_resolved_from_guid() {
        let storage = InMemoryLocalStorage::new();
        let parent = Tag {
            guid: Some(Guid::new("parent")),
            name: Some("parent".to_string()),
            ..Default::default()
        };
        let parent_local_id = parent.local_id;
        storage.put_tag(parent).await.unwrap();
        storage
            .put_tag(Tag {
                guid: Some(Guid::new("child")),
                name: Some("child".to_string()),
                parent_guid: Some(Guid::new("parent")),
                ..Default::default()
            })
            .await
            .unwrap();

        let child = storage
            .find_tag_by_guid(&Guid::new("child"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(child.parent_local_id, Some(parent_local_id));
    }

    #[core_async::test]
    async fn test_linked_notebook_requires_guid() {
        let storage = InMemoryLocalStorage::new();
        let result = storage.put_linked_notebook(LinkedNotebook::default()).await;
        assert!(matches!(result, Err(LibraryError::InvalidInput { .. })));
    }

    #[core_async::test]
    async fn test_expunge_notebook_expunges_its_notes() {
        let storage = InMemoryLocalStorage::new();
        let notebook = Notebook {
            guid: Some(Guid::new("nb1")),
            name: Some("Inbox".to_string()),
            ..Default::default()
        };
        let notebook_local_id = notebook.local_id;
        storage.put_notebook(notebook).await.unwrap();
        storage
            .put_note(Note {
                notebook_local_id: Some(notebook_local_id),
                ..remote_note("n1", 1)
            })
            .await
            .unwrap();

        storage
            .expunge_notebook_by_guid(&Guid::new("nb1"))
            .await
            .unwrap();

        assert_eq!(storage.note_count().await.unwrap(), 0);
    }

    #[core_async::test]
    async fn test_expunge_notebook_takes_local_only_notes_and_resources() {
        let storage = InMemoryLocalStorage::new();
        let notebook = Notebook {
            guid: Some(Guid::new("nb1")),
            name: Some("Inbox".to_string()),
            ..Default::default()
        };
        let notebook_local_id = notebook.local_id;
        storage.put_notebook(notebook).await.unwrap();

        let draft = Note {
            notebook_local_id: Some(notebook_local_id),
            title: Some("draft".to_string()),
            local_only: true,
            resources: vec![Resource {
                guid: Some(Guid::new("r1")),
                data: Some(ResourceData::from_body(&b"scan"[..])),
                ..Default::default()
            }],
            ..Default::default()
        };
        storage.put_note(draft).await.unwrap();
        storage
            .put_note(remote_note("elsewhere", 2))
            .await
            .unwrap();

        storage
            .expunge_notebook_by_guid(&Guid::new("nb1"))
            .await
            .unwrap();

        let remaining = storage.list_notes(FetchNoteOptions::METADATA).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].guid, Some(Guid::new("elsewhere")));
        assert!(storage
            .find_resource_by_guid(&Guid::new("r1"), FetchResourceOptions::METADATA)
            .await
            .unwrap()
            .is_none());
    }
}
