//! Conflict resolution between remote and local versions of an entity.
//!
//! A conflict exists when the remote service sends an entity whose local
//! counterpart carries unsynchronized local edits (a guid conflict), or, for
//! notebooks, tags and saved searches, when a remote entity's name is already
//! used in the same scope by a different local entity (a name conflict).
//!
//! ## Conflict Policies
//!
//! [`SimpleSyncConflictResolver`] decides without consulting anyone:
//! - **PreferRemote**: overwrite local edits; rename the local entity on a
//!   name conflict
//! - **PreferLocal**: keep the local version
//! - **KeepBoth**: keep local edits as a new local-only entity and accept
//!   the remote version
//!
//! ## Usage
//!
//! ```rust
//! use core_library::Note;
//! use core_sync::conflict_resolver::{
//!     ConflictPolicy, ConflictResolution, SimpleSyncConflictResolver, SyncConflictResolver,
//! };
//!
//! # core_async::runtime::block_on(async {
//! let resolver = SimpleSyncConflictResolver::new(ConflictPolicy::PreferLocal);
//! let resolution = resolver
//!     .resolve_note_conflict(&Note::default(), &Note::default())
//!     .await
//!     .unwrap();
//! assert_eq!(resolution, ConflictResolution::UseMine);
//! # });
//! ```

use crate::error::Result;
use async_trait::async_trait;
use core_library::{LocalId, Note, Notebook, Resource, SavedSearch, Tag};
use tracing::debug;

/// Outcome of one conflict.
#[derive(Debug, Clone, PartialEq)]
pub enum ConflictResolution<T> {
    /// Apply the remote version over the local one.
    UseTheirs,
    /// Keep the local version; the remote change is consumed without being applied.
    UseMine,
    /// Apply the remote version; the local changes were of no consequence.
    IgnoreMine,
    /// Persist the given entity first, then apply the remote version.
    MoveMine(T),
}

impl<T> ConflictResolution<T> {
    /// Whether the remote version gets written.
    pub fn applies_remote(&self) -> bool {
        !matches!(self, Self::UseMine)
    }
}

/// Resolves conflicts. Always called as `(theirs, mine)`.
#[async_trait]
pub trait SyncConflictResolver: Send + Sync {
    async fn resolve_note_conflict(
        &self,
        theirs: &Note,
        mine: &Note,
    ) -> Result<ConflictResolution<Note>>;

    async fn resolve_resource_conflict(
        &self,
        theirs: &Resource,
        mine: &Resource,
    ) -> Result<ConflictResolution<Resource>>;

    async fn resolve_notebook_conflict(
        &self,
        theirs: &Notebook,
        mine: &Notebook,
    ) -> Result<ConflictResolution<Notebook>>;

    async fn resolve_tag_conflict(
        &self,
        theirs: &Tag,
        mine: &Tag,
    ) -> Result<ConflictResolution<Tag>>;

    async fn resolve_saved_search_conflict(
        &self,
        theirs: &SavedSearch,
        mine: &SavedSearch,
    ) -> Result<ConflictResolution<SavedSearch>>;
}

/// Conflict resolution policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    #[default]
    PreferRemote,
    PreferLocal,
    KeepBoth,
}

const CONFLICTING_SUFFIX: &str = " - conflicting";

/// Copies a conflicting local entity so it can live on beside the remote one.
trait ConflictCopy: Sized {
    /// A brand new local-only entity holding the local edits.
    fn local_only_copy(&self) -> Self;

    /// The same local entity under a non-clashing name.
    fn renamed(&self) -> Self;
}

fn suffixed(name: &Option<String>) -> Option<String> {
    name.as_ref().map(|n| format!("{}{}", n, CONFLICTING_SUFFIX))
}

impl ConflictCopy for Note {
    fn local_only_copy(&self) -> Self {
        let local_id = LocalId::new();
        let resources = self
            .resources
            .iter()
            .map(|resource| Resource {
                local_id: LocalId::new(),
                guid: None,
                update_sequence_num: None,
                note_guid: None,
                note_local_id: Some(local_id),
                locally_modified: true,
                ..resource.clone()
            })
            .collect();

        Note {
            local_id,
            guid: None,
            update_sequence_num: None,
            title: suffixed(&self.title),
            resources,
            locally_modified: true,
            ..self.clone()
        }
    }

    fn renamed(&self) -> Self {
        Note {
            title: suffixed(&self.title),
            locally_modified: true,
            ..self.clone()
        }
    }
}

impl ConflictCopy for Resource {
    fn local_only_copy(&self) -> Self {
        Resource {
            local_id: LocalId::new(),
            guid: None,
            update_sequence_num: None,
            locally_modified: true,
            ..self.clone()
        }
    }

    fn renamed(&self) -> Self {
        self.clone()
    }
}

impl ConflictCopy for Notebook {
    fn local_only_copy(&self) -> Self {
        Notebook {
            local_id: LocalId::new(),
            guid: None,
            update_sequence_num: None,
            name: suffixed(&self.name),
            default_notebook: false,
            locally_modified: true,
            ..self.clone()
        }
    }

    fn renamed(&self) -> Self {
        Notebook {
            name: suffixed(&self.name),
            locally_modified: true,
            ..self.clone()
        }
    }
}

impl ConflictCopy for Tag {
    fn local_only_copy(&self) -> Self {
        Tag {
            local_id: LocalId::new(),
            guid: None,
            update_sequence_num: None,
            name: suffixed(&self.name),
            locally_modified: true,
            ..self.clone()
        }
    }

    fn renamed(&self) -> Self {
        Tag {
            name: suffixed(&self.name),
            locally_modified: true,
            ..self.clone()
        }
    }
}

impl ConflictCopy for SavedSearch {
    fn local_only_copy(&self) -> Self {
        SavedSearch {
            local_id: LocalId::new(),
            guid: None,
            update_sequence_num: None,
            name: suffixed(&self.name),
            locally_modified: true,
            ..self.clone()
        }
    }

    fn renamed(&self) -> Self {
        SavedSearch {
            name: suffixed(&self.name),
            locally_modified: true,
            ..self.clone()
        }
    }
}

/// Policy-driven resolver that never asks the user.
#[derive(Debug, Clone, Default)]
pub struct SimpleSyncConflictResolver {
    policy: ConflictPolicy,
}

impl SimpleSyncConflictResolver {
    pub fn new(policy: ConflictPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> ConflictPolicy {
        self.policy
    }

    fn resolve<T: ConflictCopy>(&self, name_conflict: bool, mine: &T) -> ConflictResolution<T> {
        match (self.policy, name_conflict) {
            (ConflictPolicy::PreferLocal, _) => ConflictResolution::UseMine,
            (_, true) => ConflictResolution::MoveMine(mine.renamed()),
            (ConflictPolicy::PreferRemote, false) => ConflictResolution::UseTheirs,
            (ConflictPolicy::KeepBoth, false) => {
                ConflictResolution::MoveMine(mine.local_only_copy())
            }
        }
    }
}

#[async_trait]
impl SyncConflictResolver for SimpleSyncConflictResolver {
    async fn resolve_note_conflict(
        &self,
        theirs: &Note,
        mine: &Note,
    ) -> Result<ConflictResolution<Note>> {
        debug!(guid = ?theirs.guid, policy = ?self.policy, "Resolving note conflict");
        Ok(self.resolve(false, mine))
    }

    async fn resolve_resource_conflict(
        &self,
        theirs: &Resource,
        mine: &Resource,
    ) -> Result<ConflictResolution<Resource>> {
        debug!(guid = ?theirs.guid, policy = ?self.policy, "Resolving resource conflict");
        Ok(self.resolve(false, mine))
    }

    async fn resolve_notebook_conflict(
        &self,
        theirs: &Notebook,
        mine: &Notebook,
    ) -> Result<ConflictResolution<Notebook>> {
        let name_conflict = theirs.guid != mine.guid;
        debug!(guid = ?theirs.guid, name_conflict, "Resolving notebook conflict");
        Ok(self.resolve(name_conflict, mine))
    }

    async fn resolve_tag_conflict(
        &self,
        theirs: &Tag,
        mine: &Tag,
    ) -> Result<ConflictResolution<Tag>> {
        let name_conflict = theirs.guid != mine.guid;
        debug!(guid = ?theirs.guid, name_conflict, "Resolving tag conflict");
        Ok(self.resolve(name_conflict, mine))
    }

    async fn resolve_saved_search_conflict(
        &self,
        theirs: &SavedSearch,
        mine: &SavedSearch,
    ) -> Result<ConflictResolution<SavedSearch>> {
        let name_conflict = theirs.guid != mine.guid;
        debug!(guid = ?theirs.guid, name_conflict, "Resolving saved search conflict");
        Ok(self.resolve(name_conflict, mine))
    }
}
