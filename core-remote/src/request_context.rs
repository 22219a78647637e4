//! Per-request settings passed with every remote call.

use core_runtime::logging::redact_if_sensitive;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_REQUEST_RETRY_COUNT: u32 = 3;

#[derive(Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub request_id: Uuid,
    pub authentication_token: String,
    pub connection_timeout: Duration,
    /// Hard cap on attempts for a single request, whatever the retry policy says.
    pub max_request_retry_count: u32,
}

impl RequestContext {
    pub fn new(authentication_token: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            authentication_token: authentication_token.into(),
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            max_request_retry_count: DEFAULT_MAX_REQUEST_RETRY_COUNT,
        }
    }

    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    pub fn with_max_request_retry_count(mut self, count: u32) -> Self {
        self.max_request_retry_count = count;
        self
    }

    /// Same settings with a different token, e.g. for a linked notebook.
    pub fn with_authentication_token(&self, token: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            authentication_token: token.into(),
            ..self.clone()
        }
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new(String::new())
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("request_id", &self.request_id)
            .field(
                "authentication_token",
                &redact_if_sensitive("authentication_token", &self.authentication_token),
            )
            .field("connection_timeout", &self.connection_timeout)
            .field("max_request_retry_count", &self.max_request_retry_count)
            .finish()
    }
}
