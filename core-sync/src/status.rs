//! Aggregated outcome of one processing run.
//!
//! A status is created empty when a run starts, filled in behind a single
//! lock while the run's pipelines complete, and handed back read-only (in an
//! `Arc`) once every pipeline has finished.

use crate::error::{StopSynchronizationError, SyncError};
use core_library::{Guid, Note, Resource, Usn};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub struct NoteWithError {
    pub note: Note,
    pub error: SyncError,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceWithError {
    pub resource: Resource,
    pub error: SyncError,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GuidWithError {
    pub guid: Guid,
    pub error: SyncError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuxiliaryDownloadKind {
    Thumbnail,
    InkNoteImage,
}

impl fmt::Display for AuxiliaryDownloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Thumbnail => write!(f, "thumbnail"),
            Self::InkNoteImage => write!(f, "ink_note_image"),
        }
    }
}

/// A thumbnail or ink image that could not be fetched for a stored note.
#[derive(Debug, Clone, PartialEq)]
pub struct AuxiliaryDownloadFailure {
    pub note_guid: Guid,
    pub kind: AuxiliaryDownloadKind,
    pub error: SyncError,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DownloadNotesStatus {
    pub total_new_notes: u64,
    pub total_updated_notes: u64,
    pub total_expunged_notes: u64,

    pub notes_which_failed_to_download: Vec<NoteWithError>,
    pub notes_which_failed_to_process: Vec<NoteWithError>,
    pub note_guids_which_failed_to_expunge: Vec<GuidWithError>,

    pub processed_note_guids_and_usns: HashMap<Guid, Usn>,
    /// Notes that were never attempted because the run was cancelled.
    pub cancelled_note_guids_and_usns: HashMap<Guid, Usn>,
    pub expunged_note_guids: Vec<Guid>,

    pub auxiliary_download_failures: Vec<AuxiliaryDownloadFailure>,

    pub stop_synchronization_error: Option<StopSynchronizationError>,
}

impl DownloadNotesStatus {
    /// Records `stop` unless a stop reason is already set. Returns whether it was recorded.
    pub fn set_stop_synchronization_error(&mut self, stop: StopSynchronizationError) -> bool {
        set_once(&mut self.stop_synchronization_error, stop)
    }

    pub fn total_failed(&self) -> usize {
        self.notes_which_failed_to_download.len()
            + self.notes_which_failed_to_process.len()
            + self.note_guids_which_failed_to_expunge.len()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DownloadResourcesStatus {
    pub total_new_resources: u64,
    pub total_updated_resources: u64,

    pub resources_which_failed_to_download: Vec<ResourceWithError>,
    pub resources_which_failed_to_process: Vec<ResourceWithError>,

    pub processed_resource_guids_and_usns: HashMap<Guid, Usn>,
    pub cancelled_resource_guids_and_usns: HashMap<Guid, Usn>,

    pub stop_synchronization_error: Option<StopSynchronizationError>,
}

impl DownloadResourcesStatus {
    pub fn set_stop_synchronization_error(&mut self, stop: StopSynchronizationError) -> bool {
        set_once(&mut self.stop_synchronization_error, stop)
    }
}

/// An entity of a durable kind (notebook, tag, saved search, linked
/// notebook) that could not be processed.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityFailure {
    pub guid: Option<Guid>,
    pub name: Option<String>,
    pub error: SyncError,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntitiesProcessingStatus {
    pub total_entities: u64,
    pub total_added: u64,
    pub total_updated: u64,
    pub total_expunged: u64,

    pub entities_which_failed_to_process: Vec<EntityFailure>,
    pub guids_which_failed_to_expunge: Vec<GuidWithError>,

    pub processed_guids_and_usns: HashMap<Guid, Usn>,
    pub expunged_guids: Vec<Guid>,
}

fn set_once(slot: &mut Option<StopSynchronizationError>, stop: StopSynchronizationError) -> bool {
    if slot.is_some() {
        return false;
    }
    *slot = Some(stop);
    true
}
