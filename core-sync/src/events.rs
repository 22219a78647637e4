//! Callback adapters publishing processor outcomes on an [`EventBus`].
//!
//! Events are fire-and-forget: emitting without subscribers is not an error.

use crate::error::{StopSynchronizationError, SyncError};
use crate::processors::{EntitiesProcessorCallback, NotesProcessorCallback, ResourcesProcessorCallback};
use crate::status::AuxiliaryDownloadKind;
use core_library::{Guid, Note, Resource, Usn};
use core_runtime::events::{CoreEvent, EventBus, NoteEvent, ResourceEvent, SyncEvent};

fn guid_string(guid: Option<&Guid>) -> Option<String> {
    guid.map(ToString::to_string)
}

/// Publishes a [`SyncEvent::Stopped`] for a run that ended on a stop condition.
pub fn emit_stop(bus: &EventBus, stop: StopSynchronizationError) {
    bus.emit(CoreEvent::Sync(SyncEvent::Stopped {
        reason: stop.to_string(),
        rate_limit_duration_secs: stop.rate_limit_duration_secs(),
    }))
    .ok();
}

#[derive(Debug, Clone)]
pub struct EventBusNotesCallback {
    bus: EventBus,
}

impl EventBusNotesCallback {
    pub fn new(bus: EventBus) -> Self {
        Self { bus }
    }

    fn emit(&self, event: NoteEvent) {
        self.bus.emit(CoreEvent::Note(event)).ok();
    }
}

impl NotesProcessorCallback for EventBusNotesCallback {
    fn on_processed_note(&self, guid: &Guid, usn: Usn) {
        self.emit(NoteEvent::Processed {
            guid: guid.to_string(),
            usn,
        });
    }

    fn on_expunged_note(&self, guid: &Guid) {
        self.emit(NoteEvent::Expunged {
            guid: guid.to_string(),
        });
    }

    fn on_failed_to_expunge_note(&self, guid: &Guid, error: &SyncError) {
        self.emit(NoteEvent::ExpungeFailed {
            guid: guid.to_string(),
            message: error.to_string(),
        });
    }

    fn on_note_failed_to_download(&self, note: &Note, error: &SyncError) {
        self.emit(NoteEvent::DownloadFailed {
            guid: guid_string(note.guid.as_ref()),
            message: error.to_string(),
        });
    }

    fn on_note_failed_to_process(&self, note: &Note, error: &SyncError) {
        self.emit(NoteEvent::ProcessFailed {
            guid: guid_string(note.guid.as_ref()),
            message: error.to_string(),
        });
    }

    fn on_note_processing_cancelled(&self, note: &Note) {
        self.emit(NoteEvent::ProcessingCancelled {
            guid: guid_string(note.guid.as_ref()),
        });
    }

    fn on_note_auxiliary_download_failed(
        &self,
        note: &Note,
        kind: AuxiliaryDownloadKind,
        error: &SyncError,
    ) {
        let Some(guid) = note.guid.as_ref() else {
            return;
        };
        self.emit(NoteEvent::AuxiliaryDownloadFailed {
            guid: guid.to_string(),
            kind: kind.to_string(),
            message: error.to_string(),
        });
    }
}

#[derive(Debug, Clone)]
pub struct EventBusResourcesCallback {
    bus: EventBus,
}

impl EventBusResourcesCallback {
    pub fn new(bus: EventBus) -> Self {
        Self { bus }
    }

    fn emit(&self, event: ResourceEvent) {
        self.bus.emit(CoreEvent::Resource(event)).ok();
    }
}

impl ResourcesProcessorCallback for EventBusResourcesCallback {
    fn on_processed_resource(&self, guid: &Guid, usn: Usn) {
        self.emit(ResourceEvent::Processed {
            guid: guid.to_string(),
            usn,
        });
    }

    fn on_resource_failed_to_download(&self, resource: &Resource, error: &SyncError) {
        self.emit(ResourceEvent::DownloadFailed {
            guid: guid_string(resource.guid.as_ref()),
            message: error.to_string(),
        });
    }

    fn on_resource_failed_to_process(&self, resource: &Resource, error: &SyncError) {
        self.emit(ResourceEvent::ProcessFailed {
            guid: guid_string(resource.guid.as_ref()),
            message: error.to_string(),
        });
    }

    fn on_resource_processing_cancelled(&self, resource: &Resource) {
        self.emit(ResourceEvent::ProcessingCancelled {
            guid: guid_string(resource.guid.as_ref()),
        });
    }
}

/// Progress of one durable entity kind, e.g. `"notebooks"`.
#[derive(Debug, Clone)]
pub struct EventBusEntitiesCallback {
    bus: EventBus,
    entity_kind: String,
}

impl EventBusEntitiesCallback {
    pub fn new(bus: EventBus, entity_kind: impl Into<String>) -> Self {
        Self {
            bus,
            entity_kind: entity_kind.into(),
        }
    }
}

impl EntitiesProcessorCallback for EventBusEntitiesCallback {
    fn on_processing_progress(&self, total: u64, added: u64, updated: u64, expunged: u64) {
        self.bus
            .emit(CoreEvent::Sync(SyncEvent::EntitiesProgress {
                entity_kind: self.entity_kind.clone(),
                total,
                added,
                updated,
                expunged,
            }))
            .ok();
    }
}
