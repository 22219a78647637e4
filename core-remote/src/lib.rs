//! # Remote Service Contracts
//!
//! Capability traits for the remote note service, consumed by the
//! synchronization core and implemented by a transport crate (or by the
//! in-memory [`fake::FakeNoteStore`] in tests).
//!
//! - [`NoteStore`] / [`NoteStoreFactory`]: per-scope RPC endpoints
//! - [`NoteThumbnailDownloader`] / [`InkNoteImageDownloader`] /
//!   [`DownloaderFactory`]: auxiliary image downloads
//! - [`RemoteError`] / [`EdamErrorCode`]: the service's exception taxonomy,
//!   including the rate-limit and auth-expiry stop conditions
//! - [`RequestContext`] and [`RetryPolicy`]: per-request settings

pub mod downloaders;
pub mod error;
pub mod fake;
pub mod note_store;
pub mod request_context;
pub mod retry;

pub use downloaders::{
    DownloaderFactory, ImageFormat, ImageSize, InkNoteImageDownloader, NoteThumbnailDownloader,
};
pub use error::{EdamErrorCode, RemoteError, Result};
pub use note_store::{NoteResultSpec, NoteStore, NoteStoreFactory, SyncChunkFilter};
pub use request_context::RequestContext;
pub use retry::{with_retry, ExponentialRetryPolicy, RetryPolicy};
