//! Durable entity processors: notebooks, tags, saved searches and linked
//! notebooks.
//!
//! These entities are small and carry no full-data download, so every
//! entity is reconciled in turn:
//!
//! 1. Expunged guids are removed from storage
//! 2. Remaining entities are looked up by guid, then by name within their
//!    scope. A name match with a different guid is a name conflict
//! 3. Conflicts go through the [`SyncConflictResolver`]
//! 4. The remote entity is written, keeping the local id of what it replaces
//!
//! Progress is reported after each entity through
//! [`EntitiesProcessorCallback::on_processing_progress`].

use super::EntityChange;
use crate::conflict_resolver::{ConflictResolution, SyncConflictResolver};
use crate::error::{Result, SyncError};
use crate::status::{EntitiesProcessingStatus, EntityFailure, GuidWithError};
use crate::sync_chunks::{
    collect_expunged_linked_notebook_guids, collect_expunged_notebook_guids,
    collect_expunged_saved_search_guids, collect_expunged_tag_guids, collect_linked_notebooks,
    collect_notebooks, collect_saved_searches, collect_tags, filter_out_expunged,
};
use async_trait::async_trait;
use core_library::{
    Guid, LinkedNotebook, LocalId, LocalStorage, Notebook, SavedSearch, SyncChunk, SyncEntity, Tag,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

pub trait EntitiesProcessorCallback: Send + Sync {
    fn on_processing_progress(&self, total: u64, added: u64, updated: u64, expunged: u64);
}

/// Storage and conflict plumbing for one durable entity type.
#[async_trait]
pub trait DurableEntityKind: Send + Sync + 'static {
    type Entity: SyncEntity;

    /// Plural name used in logs and progress events.
    const NAME: &'static str;

    fn collect(&self, chunks: &[SyncChunk]) -> Vec<Self::Entity>;

    fn collect_expunged(&self, chunks: &[SyncChunk]) -> Vec<Guid>;

    /// Order in which entities are written.
    fn order(&self, entities: Vec<Self::Entity>) -> Vec<Self::Entity> {
        entities
    }

    async fn find_by_guid(
        &self,
        storage: &dyn LocalStorage,
        guid: &Guid,
    ) -> Result<Option<Self::Entity>>;

    async fn find_by_name(
        &self,
        storage: &dyn LocalStorage,
        name: &str,
        linked_notebook_guid: Option<&Guid>,
    ) -> Result<Option<Self::Entity>>;

    async fn put(&self, storage: &dyn LocalStorage, entity: Self::Entity) -> Result<()>;

    async fn expunge(&self, storage: &dyn LocalStorage, guid: &Guid) -> Result<()>;

    async fn resolve(
        &self,
        resolver: &dyn SyncConflictResolver,
        theirs: &Self::Entity,
        mine: &Self::Entity,
    ) -> Result<ConflictResolution<Self::Entity>>;

    /// Strips remote identity so `entity` can be stored as a new local-only entity.
    fn detach(&self, entity: &mut Self::Entity);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NotebookKind;

#[async_trait]
impl DurableEntityKind for NotebookKind {
    type Entity = Notebook;
    const NAME: &'static str = "notebooks";

    fn collect(&self, chunks: &[SyncChunk]) -> Vec<Notebook> {
        collect_notebooks(chunks)
    }

    fn collect_expunged(&self, chunks: &[SyncChunk]) -> Vec<Guid> {
        collect_expunged_notebook_guids(chunks)
    }

    async fn find_by_guid(&self, storage: &dyn LocalStorage, guid: &Guid) -> Result<Option<Notebook>> {
        Ok(storage.find_notebook_by_guid(guid).await?)
    }

    async fn find_by_name(
        &self,
        storage: &dyn LocalStorage,
        name: &str,
        linked_notebook_guid: Option<&Guid>,
    ) -> Result<Option<Notebook>> {
        Ok(storage.find_notebook_by_name(name, linked_notebook_guid).await?)
    }

    async fn put(&self, storage: &dyn LocalStorage, entity: Notebook) -> Result<()> {
        Ok(storage.put_notebook(entity).await?)
    }

    async fn expunge(&self, storage: &dyn LocalStorage, guid: &Guid) -> Result<()> {
        Ok(storage.expunge_notebook_by_guid(guid).await?)
    }

    async fn resolve(
        &self,
        resolver: &dyn SyncConflictResolver,
        theirs: &Notebook,
        mine: &Notebook,
    ) -> Result<ConflictResolution<Notebook>> {
        resolver.resolve_notebook_conflict(theirs, mine).await
    }

    fn detach(&self, entity: &mut Notebook) {
        entity.guid = None;
        entity.update_sequence_num = None;
        entity.default_notebook = false;
        entity.locally_modified = true;
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TagKind;

#[async_trait]
impl DurableEntityKind for TagKind {
    type Entity = Tag;
    const NAME: &'static str = "tags";

    fn collect(&self, chunks: &[SyncChunk]) -> Vec<Tag> {
        collect_tags(chunks)
    }

    fn collect_expunged(&self, chunks: &[SyncChunk]) -> Vec<Guid> {
        collect_expunged_tag_guids(chunks)
    }

    /// Parents before children, so a child's parent is stored when it is.
    fn order(&self, tags: Vec<Tag>) -> Vec<Tag> {
        order_parents_first(tags)
    }

    async fn find_by_guid(&self, storage: &dyn LocalStorage, guid: &Guid) -> Result<Option<Tag>> {
        Ok(storage.find_tag_by_guid(guid).await?)
    }

    async fn find_by_name(
        &self,
        storage: &dyn LocalStorage,
        name: &str,
        linked_notebook_guid: Option<&Guid>,
    ) -> Result<Option<Tag>> {
        Ok(storage.find_tag_by_name(name, linked_notebook_guid).await?)
    }

    async fn put(&self, storage: &dyn LocalStorage, entity: Tag) -> Result<()> {
        Ok(storage.put_tag(entity).await?)
    }

    async fn expunge(&self, storage: &dyn LocalStorage, guid: &Guid) -> Result<()> {
        Ok(storage.expunge_tag_by_guid(guid).await?)
    }

    async fn resolve(
        &self,
        resolver: &dyn SyncConflictResolver,
        theirs: &Tag,
        mine: &Tag,
    ) -> Result<ConflictResolution<Tag>> {
        resolver.resolve_tag_conflict(theirs, mine).await
    }

    fn detach(&self, entity: &mut Tag) {
        entity.guid = None;
        entity.update_sequence_num = None;
        entity.locally_modified = true;
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SavedSearchKind;

#[async_trait]
impl DurableEntityKind for SavedSearchKind {
    type Entity = SavedSearch;
    const NAME: &'static str = "saved_searches";

    fn collect(&self, chunks: &[SyncChunk]) -> Vec<SavedSearch> {
        collect_saved_searches(chunks)
    }

    fn collect_expunged(&self, chunks: &[SyncChunk]) -> Vec<Guid> {
        collect_expunged_saved_search_guids(chunks)
    }

    async fn find_by_guid(
        &self,
        storage: &dyn LocalStorage,
        guid: &Guid,
    ) -> Result<Option<SavedSearch>> {
        Ok(storage.find_saved_search_by_guid(guid).await?)
    }

    async fn find_by_name(
        &self,
        storage: &dyn LocalStorage,
        name: &str,
        _linked_notebook_guid: Option<&Guid>,
    ) -> Result<Option<SavedSearch>> {
        Ok(storage.find_saved_search_by_name(name).await?)
    }

    async fn put(&self, storage: &dyn LocalStorage, entity: SavedSearch) -> Result<()> {
        Ok(storage.put_saved_search(entity).await?)
    }

    async fn expunge(&self, storage: &dyn LocalStorage, guid: &Guid) -> Result<()> {
        Ok(storage.expunge_saved_search_by_guid(guid).await?)
    }

    async fn resolve(
        &self,
        resolver: &dyn SyncConflictResolver,
        theirs: &SavedSearch,
        mine: &SavedSearch,
    ) -> Result<ConflictResolution<SavedSearch>> {
        resolver.resolve_saved_search_conflict(theirs, mine).await
    }

    fn detach(&self, entity: &mut SavedSearch) {
        entity.guid = None;
        entity.update_sequence_num = None;
        entity.locally_modified = true;
    }
}

/// Topological order over `parent_guid`. Tags whose parent chain loops are
/// appended in their original order.
fn order_parents_first(tags: Vec<Tag>) -> Vec<Tag> {
    let in_batch: HashSet<Guid> = tags.iter().filter_map(|t| t.guid.clone()).collect();
    let mut children: HashMap<Guid, Vec<usize>> = HashMap::new();
    let mut roots = Vec::new();

    for (index, tag) in tags.iter().enumerate() {
        match tag.parent_guid.as_ref() {
            Some(parent) if in_batch.contains(parent) && tag.guid.as_ref() != Some(parent) => {
                children.entry(parent.clone()).or_default().push(index)
            }
            _ => roots.push(index),
        }
    }

    let mut order = Vec::with_capacity(tags.len());
    let mut placed = vec![false; tags.len()];
    let mut queue: std::collections::VecDeque<usize> = roots.into();
    while let Some(index) = queue.pop_front() {
        if std::mem::replace(&mut placed[index], true) {
            continue;
        }
        order.push(index);
        if let Some(guid) = tags[index].guid.as_ref() {
            if let Some(kids) = children.get(guid) {
                queue.extend(kids.iter().copied());
            }
        }
    }
    order.extend((0..tags.len()).filter(|index| !placed[*index]));

    let mut slots: Vec<Option<Tag>> = tags.into_iter().map(Some).collect();
    order
        .into_iter()
        .filter_map(|index| slots[index].take())
        .collect()
}

pub type NotebooksProcessor = DurableEntityProcessor<NotebookKind>;
pub type TagsProcessor = DurableEntityProcessor<TagKind>;
pub type SavedSearchesProcessor = DurableEntityProcessor<SavedSearchKind>;

pub struct DurableEntityProcessor<K> {
    kind: K,
    local_storage: Arc<dyn LocalStorage>,
    conflict_resolver: Arc<dyn SyncConflictResolver>,
}

impl<K: DurableEntityKind + Default> DurableEntityProcessor<K> {
    pub fn new(
        local_storage: Arc<dyn LocalStorage>,
        conflict_resolver: Arc<dyn SyncConflictResolver>,
    ) -> Self {
        Self::with_kind(K::default(), local_storage, conflict_resolver)
    }
}

impl<K: DurableEntityKind> DurableEntityProcessor<K> {
    pub fn with_kind(
        kind: K,
        local_storage: Arc<dyn LocalStorage>,
        conflict_resolver: Arc<dyn SyncConflictResolver>,
    ) -> Self {
        Self {
            kind,
            local_storage,
            conflict_resolver,
        }
    }

    /// Processes every entity of this kind in `chunks`.
    ///
    /// Failures are recorded per entity in the returned status.
    #[instrument(skip_all, fields(kind = K::NAME, chunks = chunks.len()))]
    pub async fn process(
        &self,
        chunks: &[SyncChunk],
        callback: Option<Arc<dyn EntitiesProcessorCallback>>,
    ) -> EntitiesProcessingStatus {
        let expunged = self.kind.collect_expunged(chunks);
        let entities = self
            .kind
            .order(filter_out_expunged(self.kind.collect(chunks), &expunged));

        let mut status = EntitiesProcessingStatus {
            total_entities: (entities.len() + expunged.len()) as u64,
            ..Default::default()
        };
        if status.total_entities == 0 {
            debug!(kind = K::NAME, "Nothing to process");
            return status;
        }

        let report = |status: &EntitiesProcessingStatus| {
            if let Some(callback) = &callback {
                callback.on_processing_progress(
                    status.total_entities,
                    status.total_added,
                    status.total_updated,
                    status.total_expunged,
                );
            }
        };

        for guid in expunged {
            match self.kind.expunge(self.local_storage.as_ref(), &guid).await {
                Ok(()) => {
                    status.total_expunged += 1;
                    status.expunged_guids.push(guid);
                }
                Err(error) => {
                    warn!(kind = K::NAME, guid = %guid, error = %error, "Failed to expunge");
                    status
                        .guids_which_failed_to_expunge
                        .push(GuidWithError { guid, error });
                }
            }
            report(&status);
        }

        for entity in entities {
            let guid = entity.guid().cloned();
            let usn = entity.update_sequence_num();
            let name = entity.name().map(str::to_string);

            match self.process_entity(entity).await {
                Ok(change) => {
                    match change {
                        EntityChange::New => status.total_added += 1,
                        EntityChange::Updated => status.total_updated += 1,
                    }
                    if let (Some(guid), Some(usn)) = (guid, usn) {
                        status.processed_guids_and_usns.insert(guid, usn);
                    }
                }
                Err(error) => {
                    warn!(kind = K::NAME, guid = ?guid, error = %error, "Failed to process");
                    status
                        .entities_which_failed_to_process
                        .push(EntityFailure { guid, name, error });
                }
            }
            report(&status);
        }

        info!(
            kind = K::NAME,
            added = status.total_added,
            updated = status.total_updated,
            expunged = status.total_expunged,
            failed = status.entities_which_failed_to_process.len(),
            "Finished processing"
        );
        status
    }

    async fn process_entity(&self, mut theirs: K::Entity) -> Result<EntityChange> {
        let storage = self.local_storage.as_ref();
        let guid = theirs
            .guid()
            .cloned()
            .ok_or_else(|| SyncError::InvalidArgument(format!("{} entry has no guid", K::NAME)))?;

        if let Some(local) = self.kind.find_by_guid(storage, &guid).await? {
            let local_id = local.local_id();
            if local.is_locally_modified() {
                match self.resolve(&theirs, &local).await? {
                    ConflictResolution::UseMine => return Ok(EntityChange::Updated),
                    ConflictResolution::UseTheirs | ConflictResolution::IgnoreMine => {}
                    ConflictResolution::MoveMine(mut copy) => {
                        self.kind.detach(&mut copy);
                        if copy.local_id() == local_id {
                            copy.set_local_id(LocalId::new());
                        }
                        self.kind.put(storage, copy).await?;
                    }
                }
            }
            theirs.set_local_id(local_id);
            self.kind.put(storage, theirs).await?;
            return Ok(EntityChange::Updated);
        }

        let clash = match theirs.name() {
            Some(name) => {
                self.kind
                    .find_by_name(storage, name, theirs.linked_notebook_guid())
                    .await?
            }
            None => None,
        };

        let Some(mine) = clash else {
            self.kind.put(storage, theirs).await?;
            return Ok(EntityChange::New);
        };

        debug!(kind = K::NAME, guid = %guid, "Name conflict with a local entity");
        match self.resolve(&theirs, &mine).await? {
            ConflictResolution::UseMine => Ok(EntityChange::Updated),
            ConflictResolution::UseTheirs => {
                theirs.set_local_id(mine.local_id());
                self.kind.put(storage, theirs).await?;
                Ok(EntityChange::Updated)
            }
            ConflictResolution::IgnoreMine => {
                self.kind.put(storage, theirs).await?;
                Ok(EntityChange::New)
            }
            ConflictResolution::MoveMine(renamed) => {
                self.kind.put(storage, renamed).await?;
                self.kind.put(storage, theirs).await?;
                Ok(EntityChange::New)
            }
        }
    }

    async fn resolve(
        &self,
        theirs: &K::Entity,
        mine: &K::Entity,
    ) -> Result<ConflictResolution<K::Entity>> {
        self.kind
            .resolve(self.conflict_resolver.as_ref(), theirs, mine)
            .await
            .map_err(|e| match e {
                SyncError::ConflictResolution(_) => e,
                other => SyncError::ConflictResolution(other.to_string()),
            })
    }
}

/// Stores linked notebooks from the user's own sync chunks.
///
/// Expunging a linked notebook also expunges the notebooks and tags of its
/// scope.
pub struct LinkedNotebooksProcessor {
    local_storage: Arc<dyn LocalStorage>,
}

impl LinkedNotebooksProcessor {
    pub fn new(local_storage: Arc<dyn LocalStorage>) -> Self {
        Self { local_storage }
    }

    #[instrument(skip_all, fields(chunks = chunks.len()))]
    pub async fn process(
        &self,
        chunks: &[SyncChunk],
        callback: Option<Arc<dyn EntitiesProcessorCallback>>,
    ) -> EntitiesProcessingStatus {
        let expunged = collect_expunged_linked_notebook_guids(chunks);
        let expunged_set: HashSet<&Guid> = expunged.iter().collect();
        let linked_notebooks: Vec<LinkedNotebook> = collect_linked_notebooks(chunks)
            .into_iter()
            .filter(|ln| ln.guid.as_ref().map_or(true, |g| !expunged_set.contains(g)))
            .collect();

        let mut status = EntitiesProcessingStatus {
            total_entities: (linked_notebooks.len() + expunged.len()) as u64,
            ..Default::default()
        };
        let report = |status: &EntitiesProcessingStatus| {
            if let Some(callback) = &callback {
                callback.on_processing_progress(
                    status.total_entities,
                    status.total_added,
                    status.total_updated,
                    status.total_expunged,
                );
            }
        };

        for guid in expunged.iter().cloned() {
            match self.expunge_scope(&guid).await {
                Ok(()) => {
                    status.total_expunged += 1;
                    status.expunged_guids.push(guid);
                }
                Err(error) => {
                    warn!(guid = %guid, error = %error, "Failed to expunge linked notebook");
                    status
                        .guids_which_failed_to_expunge
                        .push(GuidWithError { guid, error });
                }
            }
            report(&status);
        }

        for linked_notebook in linked_notebooks {
            let guid = linked_notebook.guid.clone();
            let usn = linked_notebook.update_sequence_num;
            let name = linked_notebook.share_name.clone();

            match self.put(linked_notebook).await {
                Ok(change) => {
                    match change {
                        EntityChange::New => status.total_added += 1,
                        EntityChange::Updated => status.total_updated += 1,
                    }
                    if let (Some(guid), Some(usn)) = (guid, usn) {
                        status.processed_guids_and_usns.insert(guid, usn);
                    }
                }
                Err(error) => {
                    warn!(guid = ?guid, error = %error, "Failed to process linked notebook");
                    status
                        .entities_which_failed_to_process
                        .push(EntityFailure { guid, name, error });
                }
            }
            report(&status);
        }

        status
    }

    async fn put(&self, linked_notebook: LinkedNotebook) -> Result<EntityChange> {
        let guid = linked_notebook
            .guid
            .as_ref()
            .ok_or_else(|| SyncError::InvalidArgument("linked notebook has no guid".into()))?;
        let change = match self.local_storage.find_linked_notebook_by_guid(guid).await? {
            Some(_) => EntityChange::Updated,
            None => EntityChange::New,
        };
        self.local_storage.put_linked_notebook(linked_notebook).await?;
        Ok(change)
    }

    async fn expunge_scope(&self, guid: &Guid) -> Result<()> {
        for notebook in self.local_storage.list_notebooks().await? {
            if notebook.linked_notebook_guid.as_ref() == Some(guid) {
                if let Some(notebook_guid) = notebook.guid.as_ref() {
                    self.local_storage.expunge_notebook_by_guid(notebook_guid).await?;
                }
            }
        }
        for tag in self.local_storage.list_tags().await? {
            if tag.linked_notebook_guid.as_ref() == Some(guid) {
                if let Some(tag_guid) = tag.guid.as_ref() {
                    self.local_storage.expunge_tag_by_guid(tag_guid).await?;
                }
            }
        }
        debug!(guid = %guid, "Expunging linked notebook");
        Ok(self.local_storage.expunge_linked_notebook_by_guid(guid).await?)
    }
}
