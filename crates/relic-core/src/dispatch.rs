//! Main-thread dispatch queue.
//!
//! Background threads (file watchers, decoders) hand work to the thread that
//! owns the asset caches by pushing closures onto a single global queue. At most
//! one [`MainThreadRunner`] is active at a time; it drains the queue once per
//! tick with [`MainThreadRunner::run_pending`].
//!
//! ```
//! use relic_core::dispatch::{self, MainThreadRunner};
//!
//! let mut runner = MainThreadRunner::new();
//! assert!(runner.enable());
//!
//! let task = dispatch::run_async(|| 21 * 2);
//! runner.run_pending().unwrap();
//! assert_eq!(futures_lite::future::block_on(task).unwrap(), 42);
//! ```

use std::any::Any;
use std::cell::Cell;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::LazyLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use crossbeam_channel::{Receiver, Sender};
use tokio::sync::oneshot;

use crate::profiling::profile_function;

/// Boxed error type accepted from fallible actions.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

type Action = Box<dyn FnOnce() -> Result<(), BoxError> + Send + 'static>;

/// Failures collected while draining the queue.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// A fallible action returned an error.
    #[error("dispatched action failed: {0}")]
    Failed(#[source] BoxError),
    /// An action panicked.
    #[error("dispatched action panicked: {0}")]
    Panicked(String),
    /// More than one action failed during a single drain.
    #[error("{} dispatched actions failed", .0.len())]
    Aggregate(Vec<DispatchError>),
    /// The task's action was dropped before it could run.
    #[error("dispatched task was canceled")]
    Canceled,
}

impl DispatchError {
    /// Flattens this error into the individual failures it represents.
    pub fn into_errors(self) -> Vec<DispatchError> {
        match self {
            DispatchError::Aggregate(errors) => errors,
            other => vec![other],
        }
    }

    /// Combines collected failures: `None` when empty, the failure itself when
    /// there is one, and [`DispatchError::Aggregate`] otherwise.
    pub fn collect(mut errors: Vec<DispatchError>) -> Option<DispatchError> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(DispatchError::Aggregate(errors)),
        }
    }
}

struct Queue {
    sender: Sender<Action>,
    receiver: Receiver<Action>,
}

static QUEUE: LazyLock<Queue> = LazyLock::new(|| {
    let (sender, receiver) = crossbeam_channel::unbounded();
    Queue { sender, receiver }
});

/// Id of the active runner, `0` when none is active.
static ACTIVE_RUNNER: AtomicU64 = AtomicU64::new(0);
/// Thread token of the active runner's thread, `0` when none is active.
static ACTIVE_THREAD: AtomicU64 = AtomicU64::new(0);
static NEXT_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_TOKEN: Cell<u64> = const { Cell::new(0) };
}

fn thread_token() -> u64 {
    THREAD_TOKEN.with(|token| {
        if token.get() == 0 {
            token.set(NEXT_ID.fetch_add(1, Ordering::Relaxed));
        }
        token.get()
    })
}

fn push(action: Action) {
    if ACTIVE_RUNNER.load(Ordering::Acquire) == 0 {
        tracing::warn!("Action dispatched while no main thread runner is active; it will run once one is enabled");
    }
    // The queue owns its receiver, so the channel can never be disconnected.
    let _ = QUEUE.sender.send(action);
}

/// Queues `action` to run on the main thread.
pub fn enqueue<F>(action: F)
where
    F: FnOnce() + Send + 'static,
{
    push(Box::new(move || {
        action();
        Ok(())
    }));
}

/// Queues a fallible `action`; its error is reported by the drain that runs it.
pub fn enqueue_fallible<F, E>(action: F)
where
    F: FnOnce() -> Result<(), E> + Send + 'static,
    E: Into<BoxError>,
{
    push(Box::new(move || action().map_err(Into::into)));
}

/// Queues `f` to run on the main thread and returns a future resolving to its result.
///
/// A panic inside `f` resolves the future with [`DispatchError::Panicked`] rather
/// than failing the drain. Blocking on the returned task from the main thread
/// itself deadlocks, since the queue is only drained there.
pub fn run_async<T, F>(f: F) -> DispatchTask<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let (sender, receiver) = oneshot::channel();
    push(Box::new(move || {
        let result = panic::catch_unwind(AssertUnwindSafe(f))
            .map_err(|payload| DispatchError::Panicked(panic_message(payload.as_ref())));
        let _ = sender.send(result);
        Ok(())
    }));
    DispatchTask { receiver }
}

/// Number of actions waiting in the queue.
pub fn pending() -> usize {
    QUEUE.receiver.len()
}

/// Whether the caller is running on the active runner's thread.
pub fn is_main_thread() -> bool {
    let thread = ACTIVE_THREAD.load(Ordering::Acquire);
    thread != 0 && thread == thread_token()
}

/// Whether any runner is currently active.
pub fn has_active_runner() -> bool {
    ACTIVE_RUNNER.load(Ordering::Acquire) != 0
}

/// Extracts the message from a panic payload caught with `catch_unwind`.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}

/// Future returned by [`run_async`].
#[must_use = "the dispatched result is lost unless the task is awaited"]
pub struct DispatchTask<T> {
    receiver: oneshot::Receiver<Result<T, DispatchError>>,
}

impl<T> Future for DispatchTask<T> {
    type Output = Result<T, DispatchError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(DispatchError::Canceled)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Drains the dispatch queue on the thread it was created on.
///
/// Only one runner can be active across the process; enabling a second one
/// fails until the first is disabled or dropped.
pub struct MainThreadRunner {
    id: u64,
    thread: u64,
    // Pinned to its creating thread.
    _not_send: PhantomData<*const ()>,
}

impl Default for MainThreadRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl MainThreadRunner {
    pub fn new() -> Self {
        Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            thread: thread_token(),
            _not_send: PhantomData,
        }
    }

    /// Makes this the active runner. Returns `false` if another runner is active.
    pub fn enable(&self) -> bool {
        match ACTIVE_RUNNER.compare_exchange(0, self.id, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => {
                ACTIVE_THREAD.store(self.thread, Ordering::Release);
                tracing::debug!("Main thread runner {} enabled", self.id);
                true
            }
            Err(current) => current == self.id,
        }
    }

    /// Deactivates this runner. Returns `false` if it was not the active one.
    pub fn disable(&self) -> bool {
        if self.is_active() {
            ACTIVE_THREAD.store(0, Ordering::Release);
        }
        let disabled = ACTIVE_RUNNER
            .compare_exchange(self.id, 0, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if disabled {
            tracing::debug!("Main thread runner {} disabled", self.id);
        }
        disabled
    }

    pub fn is_active(&self) -> bool {
        ACTIVE_RUNNER.load(Ordering::Acquire) == self.id
    }

    /// Runs every action queued before this call.
    ///
    /// Every action runs even if earlier ones fail or panic; the failures are
    /// returned together afterwards as a [`DispatchError::Aggregate`]. A drain
    /// with exactly one failure returns that failure itself, so use
    /// [`DispatchError::into_errors`] to handle both shapes alike. Actions
    /// queued while draining wait for the next call. Returns the number of
    /// actions run, or `0` if this runner is not active.
    pub fn run_pending(&mut self) -> Result<usize, DispatchError> {
        profile_function!();
        if !self.is_active() {
            return Ok(0);
        }

        let batch: Vec<Action> = QUEUE.receiver.try_iter().take(QUEUE.receiver.len()).collect();
        let count = batch.len();
        let mut errors = Vec::new();
        for action in batch {
            match panic::catch_unwind(AssertUnwindSafe(action)) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => errors.push(DispatchError::Failed(e)),
                Err(payload) => errors.push(DispatchError::Panicked(panic_message(payload.as_ref()))),
            }
        }

        if !errors.is_empty() {
            tracing::error!("{} of {} dispatched actions failed", errors.len(), count);
        }
        match DispatchError::collect(errors) {
            Some(error) => Err(error),
            None => Ok(count),
        }
    }
}

impl Drop for MainThreadRunner {
    fn drop(&mut self) {
        self.disable();
    }
}
