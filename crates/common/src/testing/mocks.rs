//! Mock operations for exercising retry and circuit breaker behavior

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// An operation that replays a fixed script of results
///
/// Each call pops the next scripted result; once the script runs out the
/// last result repeats. Clones share the script and the call counter, so a
/// clone can be moved into an operation closure while the test keeps one to
/// inspect.
///
/// ```
/// use cadence_common::testing::ScriptedOperation;
///
/// # tokio_test::block_on(async {
/// let op = ScriptedOperation::failing_then(2, "down", 42);
/// assert_eq!(op.call().await, Err("down"));
/// assert_eq!(op.call().await, Err("down"));
/// assert_eq!(op.call().await, Ok(42));
/// assert_eq!(op.calls(), 3);
/// # });
/// ```
#[derive(Debug)]
pub struct ScriptedOperation<T, E> {
    script: Arc<Mutex<Script<T, E>>>,
    calls: Arc<AtomicU32>,
}

#[derive(Debug)]
struct Script<T, E> {
    pending: VecDeque<Result<T, E>>,
    last: Option<Result<T, E>>,
}

impl<T, E> Clone for ScriptedOperation<T, E> {
    fn clone(&self) -> Self {
        Self { script: Arc::clone(&self.script), calls: Arc::clone(&self.calls) }
    }
}

impl<T: Clone, E: Clone> ScriptedOperation<T, E> {
    /// Replay `results` in order
    pub fn new(results: impl IntoIterator<Item = Result<T, E>>) -> Self {
        Self {
            script: Arc::new(Mutex::new(Script { pending: results.into_iter().collect(), last: None })),
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Fail `failures` times with `error`, then succeed with `value`
    pub fn failing_then(failures: usize, error: E, value: T) -> Self {
        Self::new(std::iter::repeat(Err(error)).take(failures).chain(std::iter::once(Ok(value))))
    }

    /// Fail on every call
    pub fn always_failing(error: E) -> Self {
        Self::new([Err(error)])
    }

    /// Next scripted result
    ///
    /// # Panics
    ///
    /// Panics when the script was created empty.
    pub fn call(&self) -> impl Future<Output = Result<T, E>> + Send + 'static
    where
        T: Send + 'static,
        E: Send + 'static,
    {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = {
            let mut script = self.script.lock();
            match script.pending.pop_front() {
                Some(result) => {
                    script.last = Some(result.clone());
                    result
                }
                None => script.last.clone().expect("scripted operation has no results"),
            }
        };
        async move { next }
    }

    /// Number of times `call` was invoked
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}
