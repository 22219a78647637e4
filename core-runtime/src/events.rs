//! # Event Bus System
//!
//! Broadcasts synchronization events to any number of independent
//! subscribers through `broadcast` channels.
//!
//! Entity processors report outcomes through callback traits; the adapters
//! in `core_sync::events` translate those callbacks into [`CoreEvent`]
//! values so a UI can follow a sync run without implementing the traits.
//!
//! ```text
//! ┌────────────────┐  callback  ┌─────────────┐  emit   ┌──────────┐  subscribe  ┌────────────┐
//! │ NotesProcessor ├───────────>│ EventBus*   ├────────>│ EventBus ├────────────>│ Subscriber │
//! └────────────────┘            │ Callback    │         └──────────┘             └────────────┘
//!                               └─────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, NoteEvent};
//!
//! let bus = EventBus::new(100);
//! let mut subscriber = bus.subscribe();
//!
//! bus.emit(CoreEvent::Note(NoteEvent::Expunged {
//!     guid: "note-guid".to_string(),
//! }))
//! .ok();
//!
//! assert!(subscriber.try_recv().is_ok());
//! ```
//!
//! Subscribers that fall behind by more than the buffer size receive
//! `RecvError::Lagged` and skip the overwritten events.

use core_async::sync::broadcast;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use core_async::sync::broadcast::error::{RecvError, SendError};
pub use core_async::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event published through the bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Run-level events
    Sync(SyncEvent),
    /// Per-note outcomes
    Note(NoteEvent),
    /// Per-resource outcomes
    Resource(ResourceEvent),
}

impl CoreEvent {
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Sync(e) => e.description(),
            CoreEvent::Note(e) => e.description(),
            CoreEvent::Resource(e) => e.description(),
        }
    }

    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Sync(SyncEvent::Stopped { .. }) => EventSeverity::Warning,
            CoreEvent::Note(NoteEvent::DownloadFailed { .. })
            | CoreEvent::Note(NoteEvent::ProcessFailed { .. })
            | CoreEvent::Note(NoteEvent::ExpungeFailed { .. })
            | CoreEvent::Resource(ResourceEvent::DownloadFailed { .. })
            | CoreEvent::Resource(ResourceEvent::ProcessFailed { .. }) => EventSeverity::Error,
            CoreEvent::Note(NoteEvent::AuxiliaryDownloadFailed { .. }) => EventSeverity::Warning,
            CoreEvent::Sync(_) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Sync Events
// ============================================================================

/// Events describing the sync run as a whole.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SyncEvent {
    /// Durable entities (notebooks, tags, saved searches) processing progress.
    EntitiesProgress {
        /// "notebooks", "tags", "saved_searches" or "linked_notebooks"
        entity_kind: String,
        total: u64,
        added: u64,
        updated: u64,
        expunged: u64,
    },
    /// A batch finished with a stop condition set.
    Stopped {
        /// Human-readable reason
        reason: String,
        /// Seconds to wait before resuming, for rate limits
        rate_limit_duration_secs: Option<i32>,
    },
}

impl SyncEvent {
    fn description(&self) -> &str {
        match self {
            SyncEvent::EntitiesProgress { .. } => "Entities processing in progress",
            SyncEvent::Stopped { .. } => "Synchronization stopped",
        }
    }
}

// ============================================================================
// Note Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum NoteEvent {
    Processed {
        guid: String,
        usn: i32,
    },
    Expunged {
        guid: String,
    },
    ExpungeFailed {
        guid: String,
        message: String,
    },
    DownloadFailed {
        guid: Option<String>,
        message: String,
    },
    ProcessFailed {
        guid: Option<String>,
        message: String,
    },
    ProcessingCancelled {
        guid: Option<String>,
    },
    /// Thumbnail or ink image download failed; the note itself was stored.
    AuxiliaryDownloadFailed {
        guid: String,
        kind: String,
        message: String,
    },
}

impl NoteEvent {
    fn description(&self) -> &str {
        match self {
            NoteEvent::Processed { .. } => "Note processed",
            NoteEvent::Expunged { .. } => "Note expunged",
            NoteEvent::ExpungeFailed { .. } => "Failed to expunge note",
            NoteEvent::DownloadFailed { .. } => "Failed to download note",
            NoteEvent::ProcessFailed { .. } => "Failed to process note",
            NoteEvent::ProcessingCancelled { .. } => "Note processing cancelled",
            NoteEvent::AuxiliaryDownloadFailed { .. } => "Failed to download note attachment",
        }
    }
}

// ============================================================================
// Resource Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum ResourceEvent {
    Processed { guid: String, usn: i32 },
    DownloadFailed { guid: Option<String>, message: String },
    ProcessFailed { guid: Option<String>, message: String },
    ProcessingCancelled { guid: Option<String> },
}

impl ResourceEvent {
    fn description(&self) -> &str {
        match self {
            ResourceEvent::Processed { .. } => "Resource processed",
            ResourceEvent::DownloadFailed { .. } => "Failed to download resource",
            ResourceEvent::ProcessFailed { .. } => "Failed to process resource",
            ResourceEvent::ProcessingCancelled { .. } => "Resource processing cancelled",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central broadcast channel for [`CoreEvent`]s.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an
    /// error if there are no active subscribers.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A `broadcast::Receiver` with an optional filter predicate.
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let bus = EventBus::new(100);
/// let notes_only = EventStream::new(bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Note(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Receives the next event that passes the filter.
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Lagged(n)` if the subscriber fell behind by `n` events.
    /// Returns `RecvError::Closed` if all senders have been dropped.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Attempts to receive an event without waiting.
    ///
    /// Returns `None` if no matching events are currently available.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.accepts(&event) => return Some(Ok(event)),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}
