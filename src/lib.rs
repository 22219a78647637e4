//! Workspace facade crate.
//!
//! Re-exports the workspace crates so host applications can depend on
//! `notesync` alone. The `sqlite` feature maps to `core-library/sqlite`.

pub use core_async;
pub use core_library;
pub use core_remote;
pub use core_runtime;
pub use core_sync;
