//! Single-assignment deferred result
//!
//! A producer completes the result exactly once; consumers register observers
//! or block in [`Deferred::result`]. Observers registered before completion
//! run on the completing thread in registration order; observers registered
//! afterwards run immediately on the registering thread.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use heapcache::{CacheError, Exception, Result};
use parking_lot::{Condvar, Mutex};
use tracing::error;

use crate::outcome::Outcome;
use crate::promise::Promise;

/// Boxed observer, invoked once with the terminal outcome
pub type Observer<T> = Box<dyn FnOnce(&Outcome<T>) + Send + 'static>;

/// Receives observer panics that were swallowed at the completion boundary
pub type ErrorSink = Arc<dyn Fn(&Exception) + Send + Sync + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CancelState {
    None,
    Requested,
    Cancelled,
}

struct State<T> {
    outcome: Option<Arc<Outcome<T>>>,
    /// Vec::new() does not allocate until the first push
    observers: Vec<Observer<T>>,
    running: bool,
    cancel: CancelState,
    /// Threads blocked in `result`/`exception`
    waiters: usize,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    completed: Condvar,
    error_sink: Option<ErrorSink>,
}

/// Handle to a deferred result. Clones share the same cell.
pub struct Deferred<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> std::fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("Deferred")
            .field("done", &state.outcome.is_some())
            .field("running", &state.running)
            .field("cancel", &state.cancel)
            .field("observers", &state.observers.len())
            .finish()
    }
}

impl<T> Default for Deferred<T>
where
    T: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Deferred<T>
where
    T: Send + Sync + 'static,
{
    /// Create a pending result. Observer panics are logged with `tracing`.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Create a pending result that reports observer panics to `sink`
    pub fn with_error_sink<F>(sink: F) -> Self
    where
        F: Fn(&Exception) + Send + Sync + 'static,
    {
        Self::build(Some(Arc::new(sink)))
    }

    /// Create an already completed result
    pub fn completed(outcome: Outcome<T>) -> Self {
        let deferred = Self::new();
        deferred.complete(outcome);
        deferred
    }

    fn build(error_sink: Option<ErrorSink>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    outcome: None,
                    observers: Vec::new(),
                    running: false,
                    cancel: CancelState::None,
                    waiters: 0,
                }),
                completed: Condvar::new(),
                error_sink,
            }),
        }
    }

    /// Complete with a value. Returns false if already complete.
    pub fn complete_value(&self, value: T) -> bool {
        self.complete(Outcome::Value(value))
    }

    /// Complete with a cache miss. Returns false if already complete.
    pub fn complete_miss(&self) -> bool {
        self.complete(Outcome::Miss)
    }

    /// Complete with a producer failure. Returns false if already complete.
    pub fn complete_exception(&self, exception: Exception) -> bool {
        self.complete(Outcome::Exception(exception))
    }

    /// Store the outcome if none is stored yet, then notify observers and
    /// waiters. The first completion wins; later calls are no-ops.
    pub fn complete(&self, outcome: Outcome<T>) -> bool {
        let stored = Self::store(&mut self.shared.state.lock(), outcome);
        match stored {
            Some((outcome, observers)) => {
                self.finish(&outcome, observers);
                true
            }
            None => false,
        }
    }

    /// Register an observer.
    ///
    /// If the result is still pending the observer is queued; otherwise it
    /// runs right away on the calling thread and is never queued.
    pub fn register_observer<F>(&self, observer: F)
    where
        F: FnOnce(&Outcome<T>) + Send + 'static,
    {
        let outcome = {
            let mut state = self.shared.state.lock();
            match &state.outcome {
                Some(outcome) => Arc::clone(outcome),
                None => {
                    state.observers.push(Box::new(observer));
                    return;
                }
            }
        };
        self.invoke(Box::new(observer), &outcome);
    }

    /// Run `callback` with the value, if the result completes with one
    pub fn on_value<F>(&self, callback: F)
    where
        F: FnOnce(&T) + Send + 'static,
    {
        self.register_observer(move |outcome| {
            if let Outcome::Value(value) = outcome {
                callback(value);
            }
        });
    }

    /// Run `callback` if the result completes with a miss
    pub fn on_miss<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.register_observer(move |outcome| {
            if outcome.is_miss() {
                callback();
            }
        });
    }

    /// Run `callback` if the result completes with an exception
    /// (cancellation included)
    pub fn on_exception<F>(&self, callback: F)
    where
        F: FnOnce(&Exception) + Send + 'static,
    {
        self.register_observer(move |outcome| {
            if let Outcome::Exception(exc) = outcome {
                callback(exc);
            }
        });
    }

    /// Register one callback per outcome channel
    pub fn on_any<FV, FM, FE>(&self, on_value: FV, on_miss: FM, on_exception: FE)
    where
        FV: FnOnce(&T) + Send + 'static,
        FM: FnOnce() + Send + 'static,
        FE: FnOnce(&Exception) + Send + 'static,
    {
        self.register_observer(move |outcome| match outcome {
            Outcome::Value(value) => on_value(value),
            Outcome::Miss => on_miss(),
            Outcome::Exception(exc) => on_exception(exc),
        });
    }

    /// Run `callback` on completion, whatever the outcome
    pub fn on_done<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.register_observer(move |_| callback());
    }

    /// Run `callback` with a handle to this result on completion.
    ///
    /// The registration holds only a weak reference, so it does not keep the
    /// result alive; if the result is gone by then the callback is skipped.
    pub fn add_done_callback<F>(&self, callback: F)
    where
        F: FnOnce(&Deferred<T>) + Send + 'static,
    {
        let weak: Weak<Shared<T>> = Arc::downgrade(&self.shared);
        self.register_observer(move |_| {
            if let Some(shared) = weak.upgrade() {
                callback(&Deferred { shared });
            }
        });
    }

    /// Forward this result's outcome into `other`
    pub fn chain_to(&self, other: &Deferred<T>)
    where
        T: Clone,
    {
        let other = other.clone();
        self.register_observer(move |outcome| {
            other.complete(outcome.clone());
        });
    }

    /// Drive a conventional promise: value to `set_result`, miss and
    /// failures to `set_exception`
    pub fn chain_to_standard<P>(&self, promise: P)
    where
        T: Clone,
        P: Promise<T> + Send + 'static,
    {
        self.register_observer(move |outcome| match outcome {
            Outcome::Value(value) => promise.set_result(value.clone()),
            Outcome::Miss => promise.set_exception(CacheError::Miss),
            Outcome::Exception(exc) => promise.set_exception(exc.clone().into()),
        });
    }

    /// Wait for the value.
    ///
    /// `Some(Duration::ZERO)` polls without blocking, `None` blocks until
    /// completion. Misses, producer failures and cancellation come back as
    /// the matching [`CacheError`]; running out of time is
    /// [`CacheError::Timeout`].
    pub fn result(&self, timeout: Option<Duration>) -> Result<T>
    where
        T: Clone,
    {
        self.wait(timeout)?.as_result().cloned()
    }

    /// Wait for completion and return the failure instead of raising it.
    ///
    /// `Ok(None)` for a value, `Ok(Some(Miss))` for a miss and
    /// `Ok(Some(Exception(_)))` for a producer failure. Cancellation and
    /// timeouts are still returned as `Err`.
    pub fn exception(&self, timeout: Option<Duration>) -> Result<Option<CacheError>> {
        let outcome = self.wait(timeout)?;
        match &*outcome {
            Outcome::Value(_) => Ok(None),
            Outcome::Miss => Ok(Some(CacheError::Miss)),
            Outcome::Exception(exc) if exc.is_cancellation() => Err(CacheError::Cancelled),
            Outcome::Exception(exc) => Ok(Some(CacheError::Exception(exc.clone()))),
        }
    }

    /// Snapshot of the outcome, if complete
    pub fn outcome(&self) -> Option<Arc<Outcome<T>>> {
        self.shared.state.lock().outcome.clone()
    }

    /// Request cooperative cancellation.
    ///
    /// Returns true if a cancellation request is pending after the call. It
    /// takes effect when the producer reaches
    /// [`set_running_or_notify_cancelled`](Self::set_running_or_notify_cancelled).
    /// Returns false if the result is already cancelled, already running or
    /// already complete.
    pub fn cancel(&self) -> bool {
        let mut state = self.shared.state.lock();
        match state.cancel {
            CancelState::Cancelled => false,
            CancelState::Requested => true,
            CancelState::None => {
                if state.outcome.is_some() || state.running {
                    false
                } else {
                    state.cancel = CancelState::Requested;
                    true
                }
            }
        }
    }

    /// Producer-side gate, called right before starting the work.
    ///
    /// Returns false if a cancellation was pending; the result is then
    /// completed as cancelled (observers included) and the work must not
    /// run. A request that lost the race against another completion is
    /// dropped, and false is returned too since the work is already done.
    /// Otherwise marks the result running and returns true.
    pub fn set_running_or_notify_cancelled(&self) -> bool {
        let stored = {
            let mut state = self.shared.state.lock();
            if state.cancel != CancelState::Requested {
                if state.outcome.is_none() {
                    state.running = true;
                }
                return true;
            }
            let stored = Self::store(&mut state, Outcome::Exception(Exception::cancelled()));
            if stored.is_some() {
                state.cancel = CancelState::Cancelled;
            }
            stored
        };

        if let Some((outcome, observers)) = stored {
            self.finish(&outcome, observers);
        }
        false
    }

    /// True between a successful running gate and completion
    pub fn running(&self) -> bool {
        self.shared.state.lock().running
    }

    /// True once an outcome is stored
    pub fn done(&self) -> bool {
        self.shared.state.lock().outcome.is_some()
    }

    /// True once a cancellation has been honored
    pub fn cancelled(&self) -> bool {
        self.shared.state.lock().cancel == CancelState::Cancelled
    }

    /// True while a cancellation request waits for the producer
    pub fn cancel_pending(&self) -> bool {
        self.shared.state.lock().cancel == CancelState::Requested
    }

    /// Store the outcome unless one is already there, taking the queued
    /// observers in the same critical section
    #[allow(clippy::type_complexity)]
    fn store(
        state: &mut State<T>,
        outcome: Outcome<T>,
    ) -> Option<(Arc<Outcome<T>>, Vec<Observer<T>>)> {
        if state.outcome.is_some() {
            return None;
        }
        // A request the producer never saw can no longer take effect.
        if state.cancel == CancelState::Requested {
            state.cancel = CancelState::None;
        }
        let outcome = Arc::new(outcome);
        state.outcome = Some(Arc::clone(&outcome));
        Some((outcome, std::mem::take(&mut state.observers)))
    }

    /// Run the captured observers, then release waiters
    fn finish(&self, outcome: &Outcome<T>, observers: Vec<Observer<T>>) {
        for observer in observers {
            self.invoke(observer, outcome);
        }

        let mut state = self.shared.state.lock();
        state.running = false;
        if state.waiters > 0 {
            self.shared.completed.notify_all();
        }
    }

    fn wait(&self, timeout: Option<Duration>) -> Result<Arc<Outcome<T>>> {
        let mut state = self.shared.state.lock();
        if let Some(outcome) = &state.outcome {
            return Ok(Arc::clone(outcome));
        }

        let deadline = match timeout {
            Some(timeout) if timeout.is_zero() => return Err(CacheError::Timeout),
            Some(timeout) => Instant::now().checked_add(timeout),
            None => None,
        };

        state.waiters += 1;
        while state.outcome.is_none() {
            match deadline {
                Some(deadline) => {
                    if self
                        .shared
                        .completed
                        .wait_until(&mut state, deadline)
                        .timed_out()
                    {
                        break;
                    }
                }
                None => self.shared.completed.wait(&mut state),
            }
        }
        state.waiters -= 1;

        state.outcome.clone().ok_or(CacheError::Timeout)
    }

    fn invoke(&self, observer: Observer<T>, outcome: &Outcome<T>) {
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| observer(outcome))) {
            let exc = Exception::from_panic(payload.as_ref());
            match &self.shared.error_sink {
                Some(sink) => sink(&exc),
                None => error!(error = %exc, "deferred result observer panicked"),
            }
        }
    }
}
