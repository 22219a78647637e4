//! Domain models for the note store
//!
//! Every synchronizable entity carries an immutable [`LocalId`] assigned at
//! local creation, an optional remote [`Guid`] assigned by the service, and
//! an optional update sequence number ([`Usn`]) that is only comparable
//! within the entity's scope.

use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use uuid::Uuid;

/// Update sequence number, monotonic within one scope.
pub type Usn = i32;

/// Milliseconds since the Unix epoch, as sent by the service.
pub type Timestamp = i64;

pub const INK_NOTE_MIME_TYPE: &str = "application/vnd.evernote.ink";

// =============================================================================
// ID Types
// =============================================================================

/// Locally unique identifier, stable across guid assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalId(pub Uuid);

impl LocalId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for LocalId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Globally unique remote identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Guid(pub String);

impl Guid {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Generates a fresh random guid, as the service would.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Guid {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Guid {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Borrow<str> for Guid {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Converts a service timestamp into a UTC date-time.
pub fn timestamp_to_datetime(timestamp: Timestamp) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(timestamp).single()
}

// =============================================================================
// Entity trait
// =============================================================================

/// Common accessors of entities that are stored locally and synchronized.
pub trait SyncEntity:
    Clone + fmt::Debug + Send + Sync + Serialize + DeserializeOwned + 'static
{
    /// Human-readable kind, used in logs and error records.
    const KIND: &'static str;

    fn local_id(&self) -> LocalId;
    fn set_local_id(&mut self, local_id: LocalId);
    fn guid(&self) -> Option<&Guid>;
    fn update_sequence_num(&self) -> Option<Usn>;
    fn is_locally_modified(&self) -> bool;

    /// Unique-per-scope name, for entities identified by name as well.
    fn name(&self) -> Option<&str> {
        None
    }

    /// Linked notebook scope, `None` for the user's own account.
    fn linked_notebook_guid(&self) -> Option<&Guid> {
        None
    }

    /// Owning entity, e.g. the note of a resource.
    fn parent_local_id(&self) -> Option<LocalId> {
        None
    }
}

macro_rules! impl_sync_entity_ids {
    () => {
        fn local_id(&self) -> LocalId {
            self.local_id
        }

        fn set_local_id(&mut self, local_id: LocalId) {
            self.local_id = local_id;
        }

        fn guid(&self) -> Option<&Guid> {
            self.guid.as_ref()
        }

        fn update_sequence_num(&self) -> Option<Usn> {
            self.update_sequence_num
        }

        fn is_locally_modified(&self) -> bool {
            self.locally_modified
        }
    };
}

// =============================================================================
// Domain Models
// =============================================================================

/// Binary payload of a resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceData {
    pub body: Option<Bytes>,
    pub size: Option<i32>,
    pub body_hash: Option<Bytes>,
}

impl ResourceData {
    pub fn from_body(body: impl Into<Bytes>) -> Self {
        let body = body.into();
        Self {
            size: i32::try_from(body.len()).ok(),
            body: Some(body),
            body_hash: None,
        }
    }
}

/// File attached to a note.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub local_id: LocalId,
    pub guid: Option<Guid>,
    pub update_sequence_num: Option<Usn>,
    pub note_guid: Option<Guid>,
    pub note_local_id: Option<LocalId>,
    pub mime: Option<String>,
    pub width: Option<i16>,
    pub height: Option<i16>,
    pub data: Option<ResourceData>,
    pub locally_modified: bool,
}

impl Resource {
    pub fn is_ink(&self) -> bool {
        self.mime.as_deref() == Some(INK_NOTE_MIME_TYPE)
            && self.guid.is_some()
            && self.width.unwrap_or(0) != 0
            && self.height.unwrap_or(0) != 0
    }

    pub fn has_binary_data(&self) -> bool {
        self.data.as_ref().is_some_and(|data| data.body.is_some())
    }
}

impl SyncEntity for Resource {
    const KIND: &'static str = "resource";

    impl_sync_entity_ids!();

    fn parent_local_id(&self) -> Option<LocalId> {
        self.note_local_id
    }
}

/// Note with its resources.
///
/// Notes listed in sync chunks carry metadata only; `content` and resource
/// bodies are filled by a separate full-data download.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub local_id: LocalId,
    pub guid: Option<Guid>,
    pub update_sequence_num: Option<Usn>,
    pub notebook_guid: Option<Guid>,
    pub notebook_local_id: Option<LocalId>,
    pub title: Option<String>,
    pub content: Option<String>,
    pub content_hash: Option<Bytes>,
    pub created: Option<Timestamp>,
    pub updated: Option<Timestamp>,
    pub active: bool,
    pub resources: Vec<Resource>,
    pub tag_guids: Vec<Guid>,
    pub tag_local_ids: Vec<LocalId>,
    pub thumbnail_data: Option<Bytes>,
    pub locally_modified: bool,
    pub local_only: bool,
    pub locally_favorited: bool,
}

impl Note {
    /// Ink notes consist of ink resources only.
    pub fn is_ink_note(&self) -> bool {
        !self.resources.is_empty() && self.resources.iter().all(Resource::is_ink)
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created.and_then(timestamp_to_datetime)
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated.and_then(timestamp_to_datetime)
    }
}

impl SyncEntity for Note {
    const KIND: &'static str = "note";

    impl_sync_entity_ids!();

    fn parent_local_id(&self) -> Option<LocalId> {
        self.notebook_local_id
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notebook {
    pub local_id: LocalId,
    pub guid: Option<Guid>,
    pub update_sequence_num: Option<Usn>,
    pub name: Option<String>,
    pub linked_notebook_guid: Option<Guid>,
    pub default_notebook: bool,
    pub locally_modified: bool,
    pub local_only: bool,
}

impl SyncEntity for Notebook {
    const KIND: &'static str = "notebook";

    impl_sync_entity_ids!();

    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn linked_notebook_guid(&self) -> Option<&Guid> {
        self.linked_notebook_guid.as_ref()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub local_id: LocalId,
    pub guid: Option<Guid>,
    pub update_sequence_num: Option<Usn>,
    pub name: Option<String>,
    pub parent_guid: Option<Guid>,
    pub parent_local_id: Option<LocalId>,
    pub linked_notebook_guid: Option<Guid>,
    pub locally_modified: bool,
    pub local_only: bool,
}

impl SyncEntity for Tag {
    const KIND: &'static str = "tag";

    impl_sync_entity_ids!();

    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn linked_notebook_guid(&self) -> Option<&Guid> {
        self.linked_notebook_guid.as_ref()
    }

    fn parent_local_id(&self) -> Option<LocalId> {
        self.parent_local_id
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedSearch {
    pub local_id: LocalId,
    pub guid: Option<Guid>,
    pub update_sequence_num: Option<Usn>,
    pub name: Option<String>,
    pub query: Option<String>,
    pub locally_modified: bool,
    pub local_only: bool,
}

impl SyncEntity for SavedSearch {
    const KIND: &'static str = "saved search";

    impl_sync_entity_ids!();

    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

/// Notebook shared by another user, synchronized as its own scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedNotebook {
    pub guid: Option<Guid>,
    pub update_sequence_num: Option<Usn>,
    pub username: Option<String>,
    pub share_name: Option<String>,
    pub note_store_url: Option<String>,
    pub shard_id: Option<String>,
    pub shared_notebook_global_id: Option<String>,
}

/// One batch of remote changes for a single scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncChunk {
    pub current_time: Timestamp,
    /// Highest USN of any entity in this chunk; `None` for an empty chunk.
    pub chunk_high_usn: Option<Usn>,
    /// Highest USN in the scope at the time of the request.
    pub update_count: Usn,
    pub notes: Vec<Note>,
    pub notebooks: Vec<Notebook>,
    pub tags: Vec<Tag>,
    pub searches: Vec<SavedSearch>,
    pub resources: Vec<Resource>,
    pub linked_notebooks: Vec<LinkedNotebook>,
    pub expunged_notes: Vec<Guid>,
    pub expunged_notebooks: Vec<Guid>,
    pub expunged_tags: Vec<Guid>,
    pub expunged_searches: Vec<Guid>,
    pub expunged_linked_notebooks: Vec<Guid>,
}

impl SyncChunk {
    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
            && self.notebooks.is_empty()
            && self.tags.is_empty()
            && self.searches.is_empty()
            && self.resources.is_empty()
            && self.linked_notebooks.is_empty()
            && self.expunged_notes.is_empty()
            && self.expunged_notebooks.is_empty()
            && self.expunged_tags.is_empty()
            && self.expunged_searches.is_empty()
            && self.expunged_linked_notebooks.is_empty()
    }
}
