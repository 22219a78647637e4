use core_library::LibraryError;
use core_remote::RemoteError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors produced while synchronizing.
///
/// `Clone` so one failure can be kept in a status record and handed to a
/// callback at the same time.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Local storage error: {0}")]
    LocalStorage(String),

    #[error("Conflict resolution failed: {0}")]
    ConflictResolution(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    #[error("Sync cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SyncError {
    pub fn not_found(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// The remote error behind this failure, if any.
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            Self::Remote(error) => Some(error),
            _ => None,
        }
    }
}

impl From<LibraryError> for SyncError {
    fn from(error: LibraryError) -> Self {
        Self::LocalStorage(error.to_string())
    }
}

impl From<core_runtime::Error> for SyncError {
    fn from(error: core_runtime::Error) -> Self {
        Self::Config(error.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error.to_string())
    }
}

impl From<core_async::task::JoinError> for SyncError {
    fn from(error: core_async::task::JoinError) -> Self {
        Self::Internal(format!("processing task failed: {}", error))
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

/// Batch-level condition that stops new download work from starting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopSynchronizationError {
    RateLimitReached {
        /// Seconds to wait before resuming
        rate_limit_duration_secs: Option<i32>,
    },
    AuthenticationExpired,
}

impl StopSynchronizationError {
    pub fn from_error(error: &SyncError) -> Option<Self> {
        let remote = error.remote()?;
        if remote.is_rate_limit() {
            Some(Self::RateLimitReached {
                rate_limit_duration_secs: remote.rate_limit_duration(),
            })
        } else if remote.is_auth_expired() {
            Some(Self::AuthenticationExpired)
        } else {
            None
        }
    }

    pub fn rate_limit_duration_secs(&self) -> Option<i32> {
        match self {
            Self::RateLimitReached {
                rate_limit_duration_secs,
            } => *rate_limit_duration_secs,
            Self::AuthenticationExpired => None,
        }
    }
}

impl fmt::Display for StopSynchronizationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RateLimitReached {
                rate_limit_duration_secs: Some(secs),
            } => write!(f, "rate limit reached, retry after {} seconds", secs),
            Self::RateLimitReached { .. } => write!(f, "rate limit reached"),
            Self::AuthenticationExpired => write!(f, "authentication expired"),
        }
    }
}
