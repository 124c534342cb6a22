//! Continuations and their dispatch.
//!
//! A [`Continuation`] is consumed by value when resumed, so it cannot be
//! invoked twice. The registry guarantees it is removed from the table exactly
//! once; the dispatcher decides where the continuation actually runs.

use parking_lot::Mutex;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::warn;

use crate::domain::Outcome;
use crate::error::CorrelationError;

type Resume<R> = Box<dyn FnOnce(Outcome<R>) + Send + 'static>;

/// Suspended point of one virtual user's execution.
///
/// The closure only needs to be `Send`. It sits behind a mutex so the pending
/// table stays `Sync`; the lock is never taken, only unwrapped on resume.
pub struct Continuation<R> {
    resume: Mutex<Resume<R>>,
}

impl<R: Send + 'static> Continuation<R> {
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce(Outcome<R>) + Send + 'static,
    {
        Self {
            resume: Mutex::new(Box::new(f)),
        }
    }

    /// Continuation that forwards its outcome into a oneshot channel.
    ///
    /// A dropped receiver (the virtual user went away) is ignored.
    pub fn channel() -> (Self, oneshot::Receiver<Outcome<R>>) {
        let (tx, rx) = oneshot::channel();
        let continuation = Self::new(move |outcome| {
            let _ = tx.send(outcome);
        });
        (continuation, rx)
    }
}

impl<R> Continuation<R> {
    pub fn resume(self, outcome: Outcome<R>) {
        (self.resume.into_inner())(outcome)
    }
}

impl<R> fmt::Debug for Continuation<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Continuation").finish_non_exhaustive()
    }
}

/// Delivers terminal outcomes to continuations.
///
/// `dispatch` is called by the registry after the entry has been removed and
/// outside any registry lock. It must return promptly.
pub trait ContinuationDispatcher<R>: Send + Sync {
    fn dispatch(&self, continuation: Continuation<R>, outcome: Outcome<R>);
}

/// Resumes continuations on the calling thread.
///
/// Only for continuations that cannot block, such as [`Continuation::channel`].
/// Panics are contained and counted.
#[derive(Debug, Default)]
pub struct InlineDispatcher {
    panics: AtomicU64,
}

impl InlineDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn panics(&self) -> u64 {
        self.panics.load(Ordering::Relaxed)
    }
}

impl<R: Send + 'static> ContinuationDispatcher<R> for InlineDispatcher {
    fn dispatch(&self, continuation: Continuation<R>, outcome: Outcome<R>) {
        let kind = outcome.kind();
        if catch_unwind(AssertUnwindSafe(|| continuation.resume(outcome))).is_err() {
            self.panics.fetch_add(1, Ordering::Relaxed);
            warn!(outcome = kind.as_str(), "Continuation panicked");
        }
    }
}

/// Hands each continuation to a tokio runtime as its own task.
#[derive(Debug, Clone)]
pub struct TokioDispatcher {
    handle: Handle,
    panics: Arc<AtomicU64>,
}

impl TokioDispatcher {
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            panics: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Dispatcher on the runtime the caller is running in.
    pub fn current() -> Result<Self, CorrelationError> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|e| CorrelationError::NoRuntime(e.to_string()))
    }

    /// Continuations that panicked while running.
    pub fn panics(&self) -> u64 {
        self.panics.load(Ordering::Relaxed)
    }
}

impl<R: Send + 'static> ContinuationDispatcher<R> for TokioDispatcher {
    fn dispatch(&self, continuation: Continuation<R>, outcome: Outcome<R>) {
        let panics = Arc::clone(&self.panics);
        self.handle.spawn(async move {
            let kind = outcome.kind();
            if catch_unwind(AssertUnwindSafe(|| continuation.resume(outcome))).is_err() {
                panics.fetch_add(1, Ordering::Relaxed);
                warn!(outcome = kind.as_str(), "Continuation panicked");
            }
        });
    }
}
