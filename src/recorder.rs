//! Call recording and behavior programming.
//!
//! A [`CallLog`] keeps the arguments of every invocation; [`Stub`] pairs a log
//! with a programmable behavior. Both are cheap handles: clones share the same
//! history and behavior, so a test can keep one copy for assertions while the
//! code under test holds another.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::{future, stream, FutureExt, StreamExt};
use serde_json::Value;

use crate::{
    model::error::SdkError,
    request::{Deferred, ReadStream},
};

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // a failed assertion inside a behavior must not hide the recorded history
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct CallLog<A> {
    calls: Arc<Mutex<Vec<A>>>,
}

impl<A> Clone for CallLog<A> {
    fn clone(&self) -> Self {
        Self {
            calls: self.calls.clone(),
        }
    }
}

impl<A> Default for CallLog<A> {
    fn default() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<A: Clone> CallLog<A> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, args: A) {
        lock(&self.calls).push(args);
    }

    pub fn len(&self) -> usize {
        lock(&self.calls).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<A> {
        lock(&self.calls).clone()
    }

    pub fn clear(&self) {
        lock(&self.calls).clear();
    }
}

/// Assertions over a recorded call history.
pub trait Spy<A: Clone> {
    fn call_log(&self) -> &CallLog<A>;

    fn call_count(&self) -> usize {
        self.call_log().len()
    }

    fn called(&self) -> bool {
        !self.call_log().is_empty()
    }

    fn called_once(&self) -> bool {
        self.call_count() == 1
    }

    fn called_times(&self, n: usize) -> bool {
        self.call_count() == n
    }

    fn calls(&self) -> Vec<A> {
        self.call_log().snapshot()
    }

    fn first_call(&self) -> Option<A> {
        self.calls().into_iter().next()
    }

    fn last_call(&self) -> Option<A> {
        self.calls().pop()
    }

    /// True if at least one call received exactly `args`.
    fn called_with(&self, args: &A) -> bool
    where
        A: PartialEq,
    {
        self.calls().iter().any(|c| c == args)
    }

    fn always_called_with(&self, args: &A) -> bool
    where
        A: PartialEq,
    {
        let calls = self.calls();
        !calls.is_empty() && calls.iter().all(|c| c == args)
    }

    fn reset_history(&self) {
        self.call_log().clear();
    }
}

impl<A: Clone> Spy<A> for CallLog<A> {
    fn call_log(&self) -> &CallLog<A> {
        self
    }
}

type Behavior<A, R> = Arc<dyn Fn(A) -> R + Send + Sync>;

/// A recorder with programmable behavior. Unprogrammed calls run the default
/// behavior given at construction.
pub struct Stub<A, R> {
    log: CallLog<A>,
    behavior: Arc<Mutex<Option<Behavior<A, R>>>>,
    default: Behavior<A, R>,
}

impl<A, R> Clone for Stub<A, R> {
    fn clone(&self) -> Self {
        Self {
            log: self.log.clone(),
            behavior: self.behavior.clone(),
            default: self.default.clone(),
        }
    }
}

impl<A, R> Stub<A, R>
where
    A: Clone + Send + 'static,
    R: 'static,
{
    pub fn new(default: impl Fn(A) -> R + Send + Sync + 'static) -> Self {
        Self {
            log: CallLog::new(),
            behavior: Arc::new(Mutex::new(None)),
            default: Arc::new(default),
        }
    }

    pub fn call(&self, args: A) -> R {
        self.log.record(args.clone());

        let behavior = lock(&self.behavior)
            .clone()
            .unwrap_or_else(|| self.default.clone());

        behavior(args)
    }

    pub fn calls_fake(&self, f: impl Fn(A) -> R + Send + Sync + 'static) -> &Self {
        *lock(&self.behavior) = Some(Arc::new(f));
        self
    }

    pub fn returns(&self, value: R) -> &Self
    where
        R: Clone + Send + Sync,
    {
        self.calls_fake(move |_| value.clone())
    }

    pub fn reset_behavior(&self) {
        *lock(&self.behavior) = None;
    }

    pub fn reset(&self) {
        self.reset_history();
        self.reset_behavior();
    }
}

impl<A: Clone, R> Spy<A> for Stub<A, R> {
    fn call_log(&self) -> &CallLog<A> {
        &self.log
    }
}

impl Stub<(), Deferred> {
    pub fn resolves(&self, value: Value) -> &Self {
        self.calls_fake(move |_| future::ready(Ok(value.clone())).boxed().shared())
    }

    pub fn rejects(&self, err: SdkError) -> &Self {
        self.calls_fake(move |_| future::ready(Err(err.clone())).boxed().shared())
    }
}

impl Stub<(), ReadStream> {
    /// Each call yields a new stream over `chunks`.
    pub fn streams(&self, chunks: Vec<Vec<u8>>) -> &Self {
        self.calls_fake(move |_| stream::iter(chunks.clone().into_iter().map(Ok)).boxed())
    }

    pub fn errors(&self, err: SdkError) -> &Self {
        self.calls_fake(move |_| stream::once(future::ready(Err(err.clone()))).boxed())
    }
}
