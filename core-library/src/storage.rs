//! Local storage capability consumed by the synchronization core.
//!
//! All writes use upsert semantics: an entity whose guid is already stored
//! replaces the stored entity and inherits its local id; otherwise the
//! entity is keyed by its own local id.

use crate::error::Result;
use crate::models::{
    Guid, LinkedNotebook, LocalId, Note, Notebook, Resource, SavedSearch, Tag,
};
use async_trait::async_trait;

/// What to load along with a note.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchNoteOptions {
    pub with_resource_metadata: bool,
    pub with_resource_binary_data: bool,
}

impl FetchNoteOptions {
    /// Note fields plus resource metadata, no resource bodies.
    pub const METADATA: Self = Self {
        with_resource_metadata: true,
        with_resource_binary_data: false,
    };

    pub const FULL: Self = Self {
        with_resource_metadata: true,
        with_resource_binary_data: true,
    };

    pub const NOTE_ONLY: Self = Self {
        with_resource_metadata: false,
        with_resource_binary_data: false,
    };
}

impl Default for FetchNoteOptions {
    fn default() -> Self {
        Self::METADATA
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchResourceOptions {
    pub with_binary_data: bool,
}

impl FetchResourceOptions {
    pub const METADATA: Self = Self {
        with_binary_data: false,
    };

    pub const FULL: Self = Self {
        with_binary_data: true,
    };
}

/// Strips what `options` did not ask for.
pub(crate) fn apply_note_options(mut note: Note, options: FetchNoteOptions) -> Note {
    if !options.with_resource_metadata {
        note.resources.clear();
    } else if !options.with_resource_binary_data {
        for resource in &mut note.resources {
            strip_resource_body(resource);
        }
    }
    note
}

pub(crate) fn apply_resource_options(
    mut resource: Resource,
    options: FetchResourceOptions,
) -> Resource {
    if !options.with_binary_data {
        strip_resource_body(&mut resource);
    }
    resource
}

fn strip_resource_body(resource: &mut Resource) {
    if let Some(data) = resource.data.as_mut() {
        data.body = None;
    }
}

/// Case-insensitive name key, as names are unique regardless of case.
pub(crate) fn name_key(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Local persistent store of synchronized entities.
#[async_trait]
pub trait LocalStorage: Send + Sync {
    // Notes

    async fn find_note_by_guid(&self, guid: &Guid, options: FetchNoteOptions)
        -> Result<Option<Note>>;

    async fn find_note_by_local_id(
        &self,
        local_id: LocalId,
        options: FetchNoteOptions,
    ) -> Result<Option<Note>>;

    /// Upserts the note and replaces its resources with `note.resources`.
    async fn put_note(&self, note: Note) -> Result<()>;

    /// Removes the note and its resources. Unknown guids are a no-op.
    async fn expunge_note_by_guid(&self, guid: &Guid) -> Result<()>;

    async fn list_notes(&self, options: FetchNoteOptions) -> Result<Vec<Note>>;

    async fn note_count(&self) -> Result<usize>;

    // Resources

    async fn find_resource_by_guid(
        &self,
        guid: &Guid,
        options: FetchResourceOptions,
    ) -> Result<Option<Resource>>;

    async fn put_resource(&self, resource: Resource) -> Result<()>;

    async fn expunge_resource_by_guid(&self, guid: &Guid) -> Result<()>;

    // Notebooks

    async fn find_notebook_by_guid(&self, guid: &Guid) -> Result<Option<Notebook>>;

    async fn find_notebook_by_local_id(&self, local_id: LocalId) -> Result<Option<Notebook>>;

    async fn find_notebook_by_name(
        &self,
        name: &str,
        linked_notebook_guid: Option<&Guid>,
    ) -> Result<Option<Notebook>>;

    async fn put_notebook(&self, notebook: Notebook) -> Result<()>;

    async fn expunge_notebook_by_guid(&self, guid: &Guid) -> Result<()>;

    async fn list_notebooks(&self) -> Result<Vec<Notebook>>;

    // Tags

    async fn find_tag_by_guid(&self, guid: &Guid) -> Result<Option<Tag>>;

    async fn find_tag_by_name(
        &self,
        name: &str,
        linked_notebook_guid: Option<&Guid>,
    ) -> Result<Option<Tag>>;

    async fn put_tag(&self, tag: Tag) -> Result<()>;

    async fn expunge_tag_by_guid(&self, guid: &Guid) -> Result<()>;

    async fn list_tags(&self) -> Result<Vec<Tag>>;

    // Saved searches

    async fn find_saved_search_by_guid(&self, guid: &Guid) -> Result<Option<SavedSearch>>;

    async fn find_saved_search_by_name(&self, name: &str) -> Result<Option<SavedSearch>>;

    async fn put_saved_search(&self, search: SavedSearch) -> Result<()>;

    async fn expunge_saved_search_by_guid(&self, guid: &Guid) -> Result<()>;

    async fn list_saved_searches(&self) -> Result<Vec<SavedSearch>>;

    // Linked notebooks

    async fn find_linked_notebook_by_guid(&self, guid: &Guid) -> Result<Option<LinkedNotebook>>;

    async fn put_linked_notebook(&self, linked_notebook: LinkedNotebook) -> Result<()>;

    async fn expunge_linked_notebook_by_guid(&self, guid: &Guid) -> Result<()>;

    async fn list_linked_notebooks(&self) -> Result<Vec<LinkedNotebook>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ResourceData;

    fn note_with_resource() -> Note {
        Note {
            resources: vec![Resource {
                data: Some(ResourceData::from_body(b"png".to_vec())),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_metadata_options_strip_bodies() {
        let note = apply_note_options(note_with_resource(), FetchNoteOptions::METADATA);
        assert_eq!(note.resources.len(), 1);
        let data = note.resources[0].data.as_ref().unwrap();
        assert!(data.body.is_none());
        assert_eq!(data.size, Some(3));
    }

    #[test]
    fn test_note_only_drops_resources() {
        let note = apply_note_options(note_with_resource(), FetchNoteOptions::NOTE_ONLY);
        assert!(note.resources.is_empty());
    }

    #[test]
    fn test_full_options_keep_bodies() {
        let note = apply_note_options(note_with_resource(), FetchNoteOptions::FULL);
        assert!(note.resources[0].has_binary_data());
    }

    #[test]
    fn test_name_key_is_case_insensitive() {
        assert_eq!(name_key("  Work "), name_key("work"));
    }
}
