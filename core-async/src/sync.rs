//! Synchronization primitives.
//!
//! All primitives are `Send + Sync` and async-aware; locks never block the
//! executor thread.
//!
//! [`CancellationToken`] is the shared manual canceler handed to processors:
//! cloning it yields another handle to the same flag, `cancel()` trips it for
//! every clone and `is_cancelled()` is the cooperative check made before each
//! new unit of work.
//!
//! # Examples
//!
//! ```rust
//! use core_async::sync::{CancellationToken, Mutex};
//!
//! # core_async::runtime::block_on(async {
//! let mutex = Mutex::new(42);
//! *mutex.lock().await += 1;
//! assert_eq!(*mutex.lock().await, 43);
//!
//! let token = CancellationToken::new();
//! let observer = token.clone();
//! token.cancel();
//! assert!(observer.is_cancelled());
//! # });
//! ```

pub use tokio::sync::{
    broadcast, mpsc, oneshot, watch, Mutex, MutexGuard, Notify, OwnedSemaphorePermit, RwLock,
    RwLockReadGuard, RwLockWriteGuard, Semaphore, SemaphorePermit,
};
pub use tokio_util::sync::CancellationToken;
