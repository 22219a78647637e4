//! Async result combinators.
//!
//! Every asynchronous operation of the synchronization engine resolves to a
//! `Result<T, E>`. This module gives that shape a small vocabulary:
//!
//! - [`make_ready`] / [`make_ready_unit`] / [`make_exceptional`]: already
//!   resolved futures
//! - [`then`] / [`then_future`]: continuations that only run on success and
//!   whose own failure becomes the failure of the chained future
//! - [`on_failed`]: failure observers which may substitute a replacement
//! - [`when_all`]: order-preserving aggregation where the first failure wins
//!
//! Failures are never swallowed: a combinator either forwards the original
//! error or an error produced by a caller supplied continuation.

use futures::future::{BoxFuture, FutureExt};
use futures::stream::{FuturesUnordered, StreamExt};
use std::future::Future;

/// A boxed, `Send`, `'static` future resolving to `Result<T, E>`.
pub type ResultFuture<T, E> = BoxFuture<'static, Result<T, E>>;

/// Returns a future that is already resolved with `value`.
pub fn make_ready<T, E>(value: T) -> ResultFuture<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    futures::future::ready(Ok(value)).boxed()
}

/// Returns an already resolved future carrying no value.
pub fn make_ready_unit<E>() -> ResultFuture<(), E>
where
    E: Send + 'static,
{
    make_ready(())
}

/// Returns a future that is already resolved with an error.
///
/// Anything convertible into `E` is accepted, so both a concrete error and a
/// source error wrapped through a `From` impl keep their identity.
///
/// ```rust
/// use core_async::future::make_exceptional;
///
/// # core_async::runtime::block_on(async {
/// let result: Result<(), String> = make_exceptional("boom").await;
/// assert_eq!(result, Err("boom".to_string()));
/// # });
/// ```
pub fn make_exceptional<T, E>(error: impl Into<E>) -> ResultFuture<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    futures::future::ready(Err(error.into())).boxed()
}

/// Runs `continuation` on the value of `future` once it resolves successfully.
///
/// If `future` fails the continuation is skipped and the failure is forwarded.
/// If the continuation fails, the returned future carries that failure.
pub fn then<T, U, E, Fut, F>(future: Fut, continuation: F) -> ResultFuture<U, E>
where
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    F: FnOnce(T) -> Result<U, E> + Send + 'static,
    T: Send + 'static,
    U: Send + 'static,
    E: Send + 'static,
{
    async move {
        let value = future.await?;
        continuation(value)
    }
    .boxed()
}

/// Like [`then`] but the continuation is itself asynchronous.
pub fn then_future<T, U, E, Fut, F, Next>(future: Fut, continuation: F) -> ResultFuture<U, E>
where
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    F: FnOnce(T) -> Next + Send + 'static,
    Next: Future<Output = Result<U, E>> + Send + 'static,
    T: Send + 'static,
    U: Send + 'static,
    E: Send + 'static,
{
    async move {
        let value = future.await?;
        continuation(value).await
    }
    .boxed()
}

/// Invokes `handler` only when `future` fails.
///
/// The handler returns `None` to let the original failure propagate, or a
/// replacement future whose outcome becomes the outcome of the whole chain.
///
/// ```rust
/// use core_async::future::{make_exceptional, make_ready, on_failed};
///
/// # core_async::runtime::block_on(async {
/// let recovered = on_failed(make_exceptional::<i32, String>("offline"), |_| {
///     Some(make_ready(0))
/// });
/// assert_eq!(recovered.await, Ok(0));
/// # });
/// ```
pub fn on_failed<T, E, Fut, H>(future: Fut, handler: H) -> ResultFuture<T, E>
where
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    H: FnOnce(&E) -> Option<ResultFuture<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    async move {
        match future.await {
            Ok(value) => Ok(value),
            Err(error) => match handler(&error) {
                Some(replacement) => replacement.await,
                None => Err(error),
            },
        }
    }
    .boxed()
}

/// Waits for every input future and collects their values in input order.
///
/// All inputs are polled concurrently. The first failure observed resolves the
/// aggregate immediately; inputs still pending at that point are dropped and
/// their later failures, if any, are never reported. An empty input resolves
/// immediately with an empty vector.
pub async fn when_all<T, E, I, Fut>(futures: I) -> Result<Vec<T>, E>
where
    I: IntoIterator<Item = Fut>,
    Fut: Future<Output = Result<T, E>>,
{
    let mut pending: FuturesUnordered<_> = futures
        .into_iter()
        .enumerate()
        .map(|(index, future)| async move { (index, future.await) })
        .collect();

    let mut slots: Vec<Option<T>> = (0..pending.len()).map(|_| None).collect();

    while let Some((index, result)) = pending.next().await {
        match result {
            Ok(value) => slots[index] = Some(value),
            Err(error) => return Err(error),
        }
    }

    Ok(slots.into_iter().flatten().collect())
}
