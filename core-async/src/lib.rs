//! Runtime abstraction layer for the notesync core.
//!
//! Every core-* crate depends on this crate instead of reaching for Tokio
//! directly. Besides the thin runtime re-exports it carries the async result
//! combinators the synchronization engine is built from.
//!
//! # Modules
//!
//! - `task`: Task spawning and execution
//! - `time`: Time-related operations (sleep, timeout, instant)
//! - `sync`: Synchronization primitives (Mutex, RwLock, channels, cancellation)
//! - `future`: Ready/exceptional futures, continuations, `when_all`
//! - `progress`: Progress ranges and progress mapping between operations
//!
//! # Examples
//!
//! ```rust
//! use core_async::future::{make_ready, when_all};
//!
//! # core_async::runtime::block_on(async {
//! let values: Vec<i32> = when_all(vec![make_ready::<i32, ()>(1), make_ready(2)])
//!     .await
//!     .unwrap();
//! assert_eq!(values, vec![1, 2]);
//! # });
//! ```

// Lets the attribute macros refer to `core_async::...` from inside this crate.
extern crate self as core_async;

// Re-export the async entry-point/test macros so downstream crates never need
// direct Tokio dependencies.
pub use core_async_macros::{main, test};

pub mod fs;
pub mod future;
pub mod progress;
pub mod runtime;
pub mod sync;
pub mod task;
pub mod time;

pub use future::{make_exceptional, make_ready, when_all, ResultFuture};
pub use task::spawn;
pub use time::{sleep, Duration, Instant};
