//! Remote service exception taxonomy.
//!
//! The remote service reports failures as one of three exception families
//! (system, user, not-found). Transport failures raised below the RPC layer
//! are folded into the same enum so callers deal with a single error type.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error codes carried by system and user exceptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdamErrorCode {
    Unknown = 1,
    BadDataFormat = 2,
    PermissionDenied = 3,
    InternalError = 4,
    DataRequired = 5,
    LimitReached = 6,
    QuotaReached = 7,
    InvalidAuth = 8,
    AuthExpired = 9,
    DataConflict = 10,
    EnmlValidation = 11,
    ShardUnavailable = 12,
    LenTooShort = 13,
    LenTooLong = 14,
    TooFew = 15,
    TooMany = 16,
    UnsupportedOperation = 17,
    TakenDown = 18,
    RateLimitReached = 19,
    BusinessSecurityLogin = 20,
    DeviceLimitReached = 21,
}

impl EdamErrorCode {
    /// Maps a wire value to a code. Unrecognised values become `Unknown`.
    pub fn from_i32(value: i32) -> Self {
        match value {
            2 => Self::BadDataFormat,
            3 => Self::PermissionDenied,
            4 => Self::InternalError,
            5 => Self::DataRequired,
            6 => Self::LimitReached,
            7 => Self::QuotaReached,
            8 => Self::InvalidAuth,
            9 => Self::AuthExpired,
            10 => Self::DataConflict,
            11 => Self::EnmlValidation,
            12 => Self::ShardUnavailable,
            13 => Self::LenTooShort,
            14 => Self::LenTooLong,
            15 => Self::TooFew,
            16 => Self::TooMany,
            17 => Self::UnsupportedOperation,
            18 => Self::TakenDown,
            19 => Self::RateLimitReached,
            20 => Self::BusinessSecurityLogin,
            21 => Self::DeviceLimitReached,
            _ => Self::Unknown,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("System exception {code:?}: {message}")]
    System {
        code: EdamErrorCode,
        message: String,
        /// Seconds to wait before retrying, set for `RateLimitReached`.
        rate_limit_duration: Option<i32>,
    },

    #[error("User exception {code:?} (parameter: {parameter:?})")]
    User {
        code: EdamErrorCode,
        parameter: Option<String>,
    },

    #[error("Not found: {identifier} = {key:?}")]
    NotFound {
        identifier: String,
        key: Option<String>,
    },

    #[error("Transport error: {0}")]
    Transport(String),
}

impl RemoteError {
    pub fn system(code: EdamErrorCode, message: impl Into<String>) -> Self {
        Self::System {
            code,
            message: message.into(),
            rate_limit_duration: None,
        }
    }

    pub fn rate_limit_reached(duration_secs: i32) -> Self {
        Self::System {
            code: EdamErrorCode::RateLimitReached,
            message: "rate limit reached".to_string(),
            rate_limit_duration: Some(duration_secs),
        }
    }

    pub fn auth_expired() -> Self {
        Self::System {
            code: EdamErrorCode::AuthExpired,
            message: "authentication token expired".to_string(),
            rate_limit_duration: None,
        }
    }

    pub fn not_found(identifier: impl Into<String>, key: impl Into<String>) -> Self {
        Self::NotFound {
            identifier: identifier.into(),
            key: Some(key.into()),
        }
    }

    /// Code of a system or user exception.
    pub fn code(&self) -> Option<EdamErrorCode> {
        match self {
            Self::System { code, .. } | Self::User { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(
            self,
            Self::System {
                code: EdamErrorCode::RateLimitReached,
                ..
            }
        )
    }

    /// Auth expiry may be reported by either exception family.
    pub fn is_auth_expired(&self) -> bool {
        self.code() == Some(EdamErrorCode::AuthExpired)
    }

    /// True for errors that halt the whole synchronization run.
    pub fn is_stop_condition(&self) -> bool {
        self.is_rate_limit() || self.is_auth_expired()
    }

    pub fn rate_limit_duration(&self) -> Option<i32> {
        match self {
            Self::System {
                code: EdamErrorCode::RateLimitReached,
                rate_limit_duration,
                ..
            } => *rate_limit_duration,
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, RemoteError>;
