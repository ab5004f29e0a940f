//! Deferred results: a write-once cell with listeners
//!
//! A [`Promise`] is the single completer; any number of [`Deferred`] handles
//! observe it. State moves once from pending to done and never changes again.
//!
//! # Listener dispatch
//!
//! Listeners registered while pending are queued and run, in registration
//! order, by whichever thread completes the promise. A listener registered on
//! an already-completed `Deferred` runs immediately on the registering thread.
//! It can therefore overlap with listeners the completer is still running.
//!
//! # Cancellation
//!
//! [`Deferred::cancel`] only signals the producer through its interrupt
//! handler. The producer decides what to do with it; nothing is stopped by
//! force. Work that never checks its interrupt runs to completion and its
//! result is dropped.

use crate::error::RpcError;
use crate::timer::Timer;
use std::fmt;
use std::future::Future as StdFuture;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};
use tracing::error;

type Listener<T> = Box<dyn FnOnce(&Result<T, RpcError>) + Send + 'static>;
type InterruptHandler = Box<dyn FnOnce(RpcError) + Send + 'static>;

enum State<T> {
    Pending {
        listeners: Vec<Listener<T>>,
        wakers: Vec<Waker>,
    },
    Done(Result<T, RpcError>),
}

#[derive(Default)]
struct Interrupt {
    handler: Option<InterruptHandler>,
    raised: Option<RpcError>,
}

struct Inner<T> {
    state: Mutex<State<T>>,
    condvar: Condvar,
    interrupt: Mutex<Interrupt>,
}

impl<T> Inner<T> {
    fn pending() -> Self {
        Self {
            state: Mutex::new(State::Pending {
                listeners: Vec::new(),
                wakers: Vec::new(),
            }),
            condvar: Condvar::new(),
            interrupt: Mutex::new(Interrupt::default()),
        }
    }

    fn done(result: Result<T, RpcError>) -> Self {
        Self {
            state: Mutex::new(State::Done(result)),
            condvar: Condvar::new(),
            interrupt: Mutex::new(Interrupt::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn interrupt(&self) -> MutexGuard<'_, Interrupt> {
        self.interrupt.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Run `f`, turning a panic into an application error
pub(crate) fn catch<R>(f: impl FnOnce() -> R) -> Result<R, RpcError> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(RpcError::panicked)
}

fn run_listener<T>(listener: Listener<T>, outcome: &Result<T, RpcError>) {
    if panic::catch_unwind(AssertUnwindSafe(|| listener(outcome))).is_err() {
        error!("deferred listener panicked; remaining listeners still run");
    }
}

/// The completing side of a [`Deferred`]
///
/// Dropping a promise that was never completed fails its `Deferred` with
/// [`RpcError::BrokenPromise`].
pub struct Promise<T: Clone + Send + 'static> {
    inner: Arc<Inner<T>>,
}

impl<T: Clone + Send + 'static> Promise<T> {
    /// Create a pending promise
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner::pending()),
        }
    }

    /// A read handle over this promise's result
    pub fn deferred(&self) -> Deferred<T> {
        Deferred {
            inner: self.inner.clone(),
        }
    }

    /// Complete the promise; returns `false` if it was already completed
    pub fn complete(&self, result: Result<T, RpcError>) -> bool {
        let (listeners, wakers, outcome) = {
            let mut state = self.inner.state();
            match &mut *state {
                State::Done(_) => return false,
                State::Pending { listeners, wakers } => {
                    let listeners = std::mem::take(listeners);
                    let wakers = std::mem::take(wakers);
                    let outcome = if listeners.is_empty() {
                        None
                    } else {
                        Some(result.clone())
                    };
                    *state = State::Done(result);
                    (listeners, wakers, outcome)
                }
            }
        };

        self.inner.condvar.notify_all();
        // No one can interrupt a finished computation
        self.inner.interrupt().handler.take();

        for waker in wakers {
            waker.wake();
        }
        if let Some(outcome) = outcome {
            for listener in listeners {
                run_listener(listener, &outcome);
            }
        }
        true
    }

    /// Complete successfully
    pub fn succeed(&self, value: T) -> bool {
        self.complete(Ok(value))
    }

    /// Complete with a failure
    pub fn fail(&self, error: RpcError) -> bool {
        self.complete(Err(error))
    }

    /// Whether the promise already holds a result
    pub fn is_defined(&self) -> bool {
        matches!(*self.inner.state(), State::Done(_))
    }

    /// Install the handler invoked by [`Deferred::cancel`]
    ///
    /// If an interrupt was already raised the handler runs immediately.
    pub fn set_interrupt_handler<F>(&self, handler: F)
    where
        F: FnOnce(RpcError) + Send + 'static,
    {
        let reason = {
            let mut interrupt = self.inner.interrupt();
            match interrupt.raised.clone() {
                Some(reason) => reason,
                None => {
                    interrupt.handler = Some(Box::new(handler));
                    return;
                }
            }
        };
        if !self.is_defined() {
            handler(reason);
        }
    }

    /// The interrupt raised on this promise, if any
    pub fn interrupted(&self) -> Option<RpcError> {
        self.inner.interrupt().raised.clone()
    }
}

impl<T: Clone + Send + 'static> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> Drop for Promise<T> {
    fn drop(&mut self) {
        if !self.is_defined() {
            self.complete(Err(RpcError::BrokenPromise));
        }
    }
}

impl<T: Clone + Send + 'static> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("defined", &self.is_defined())
            .finish()
    }
}

/// A value or error that becomes available later, exactly once
///
/// Cloning a `Deferred` yields another handle to the same result.
/// `Deferred` also implements [`std::future::Future`], so async code can
/// simply `.await` it.
pub struct Deferred<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> Deferred<T> {
    /// An already-successful deferred
    pub fn value(value: T) -> Self {
        Self::from_result(Ok(value))
    }

    /// An already-failed deferred
    pub fn exception(error: RpcError) -> Self {
        Self::from_result(Err(error))
    }

    /// An already-completed deferred
    pub fn from_result(result: Result<T, RpcError>) -> Self {
        Self {
            inner: Arc::new(Inner::done(result)),
        }
    }

    /// Whether a result is available
    pub fn is_defined(&self) -> bool {
        matches!(*self.inner.state(), State::Done(_))
    }

    /// The result, if available, without blocking
    pub fn poll(&self) -> Option<Result<T, RpcError>> {
        match &*self.inner.state() {
            State::Done(result) => Some(result.clone()),
            State::Pending { .. } => None,
        }
    }

    /// Register a callback for the result
    ///
    /// Runs immediately on the calling thread if already done.
    pub fn respond<F>(&self, f: F) -> &Self
    where
        F: FnOnce(&Result<T, RpcError>) + Send + 'static,
    {
        let outcome = {
            let mut state = self.inner.state();
            match &mut *state {
                State::Pending { listeners, .. } => {
                    listeners.push(Box::new(f));
                    return self;
                }
                State::Done(result) => result.clone(),
            }
        };
        run_listener(Box::new(f), &outcome);
        self
    }

    /// Register a success/failure callback pair
    pub fn add_listener<S, F>(&self, on_success: S, on_failure: F) -> &Self
    where
        S: FnOnce(&T) + Send + 'static,
        F: FnOnce(&RpcError) + Send + 'static,
    {
        self.respond(move |result| match result {
            Ok(value) => on_success(value),
            Err(error) => on_failure(error),
        })
    }

    /// Register a callback for success only
    pub fn on_success<S>(&self, on_success: S) -> &Self
    where
        S: FnOnce(&T) + Send + 'static,
    {
        self.respond(move |result| {
            if let Ok(value) = result {
                on_success(value);
            }
        })
    }

    /// Register a callback for failure only
    pub fn on_failure<F>(&self, on_failure: F) -> &Self
    where
        F: FnOnce(&RpcError) + Send + 'static,
    {
        self.respond(move |result| {
            if let Err(error) = result {
                on_failure(error);
            }
        })
    }

    /// Signal the producer that the result is no longer wanted
    pub fn cancel(&self) {
        self.raise(RpcError::Cancelled);
    }

    /// Raise `reason` on the producer's interrupt handler, at most once
    pub fn raise(&self, reason: RpcError) {
        if self.is_defined() {
            return;
        }
        let handler = {
            let mut interrupt = self.inner.interrupt();
            if interrupt.raised.is_some() {
                return;
            }
            interrupt.raised = Some(reason.clone());
            interrupt.handler.take()
        };
        if let Some(handler) = handler {
            if catch(|| handler(reason)).is_err() {
                error!("interrupt handler panicked");
            }
        }
    }

    /// Derive a deferred completed by `f`, forwarding interrupts back to `self`
    fn derive<U, F>(&self, f: F) -> Deferred<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(&Result<T, RpcError>, Promise<U>) + Send + 'static,
    {
        let promise = Promise::new();
        let derived = promise.deferred();
        let source = self.clone();
        promise.set_interrupt_handler(move |reason| source.raise(reason));
        self.respond(move |result| f(result, promise));
        derived
    }

    /// Transform a successful value; failures pass through unchanged
    pub fn map<U, F>(&self, f: F) -> Deferred<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.derive(move |result, promise| {
            let mapped = match result {
                Ok(value) => {
                    let value = value.clone();
                    catch(move || f(value))
                }
                Err(error) => Err(error.clone()),
            };
            promise.complete(mapped);
        })
    }

    /// Chain another asynchronous step after success
    pub fn flat_map<U, F>(&self, f: F) -> Deferred<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Deferred<U> + Send + 'static,
    {
        self.derive(move |result, promise| match result {
            Ok(value) => {
                let value = value.clone();
                match catch(move || f(value)) {
                    Ok(inner) => chain_into(inner, promise),
                    Err(error) => {
                        promise.fail(error);
                    }
                }
            }
            Err(error) => {
                promise.fail(error.clone());
            }
        })
    }

    /// Map both outcomes to a new result
    pub fn transform<U, S, F>(&self, on_success: S, on_failure: F) -> Deferred<U>
    where
        U: Clone + Send + 'static,
        S: FnOnce(T) -> Result<U, RpcError> + Send + 'static,
        F: FnOnce(RpcError) -> Result<U, RpcError> + Send + 'static,
    {
        self.derive(move |result, promise| {
            let transformed = match result {
                Ok(value) => {
                    let value = value.clone();
                    catch(move || on_success(value)).and_then(|r| r)
                }
                Err(error) => {
                    let error = error.clone();
                    catch(move || on_failure(error)).and_then(|r| r)
                }
            };
            promise.complete(transformed);
        })
    }

    /// Recover from a failure with another asynchronous step
    pub fn rescue<F>(&self, f: F) -> Deferred<T>
    where
        F: FnOnce(RpcError) -> Deferred<T> + Send + 'static,
    {
        self.derive(move |result, promise| match result {
            Ok(value) => {
                promise.succeed(value.clone());
            }
            Err(error) => {
                let error = error.clone();
                match catch(move || f(error)) {
                    Ok(inner) => chain_into(inner, promise),
                    Err(error) => {
                        promise.fail(error);
                    }
                }
            }
        })
    }

    /// Block the calling thread until a result is available or `timeout` elapses
    ///
    /// Timing out does not cancel the underlying computation.
    /// A `timeout` too large to express as a deadline waits indefinitely.
    pub fn get(&self, timeout: Duration) -> Result<T, RpcError> {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.inner.state();
        loop {
            if let State::Done(result) = &*state {
                return result.clone();
            }
            let Some(deadline) = deadline else {
                state = self
                    .inner
                    .condvar
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
                continue;
            };
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(RpcError::Timeout(timeout));
            }
            state = self
                .inner
                .condvar
                .wait_timeout(state, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// A deferred that fails with [`RpcError::Timeout`] unless this one
    /// completes within `timeout`
    ///
    /// The original computation keeps running; only its result is ignored.
    pub fn within(&self, timeout: Duration) -> Deferred<T> {
        if self.is_defined() {
            return self.clone();
        }

        let promise = Arc::new(Promise::new());
        let derived = promise.deferred();
        let source = self.clone();
        promise.set_interrupt_handler(move |reason| source.raise(reason));

        let on_timeout = promise.clone();
        let task = Timer::global().schedule(timeout, move || {
            on_timeout.fail(RpcError::Timeout(timeout));
        });
        self.respond(move |result| {
            task.cancel();
            promise.complete(result.clone());
        });
        derived
    }
}

/// Complete `promise` from `inner`; interrupts on `promise` now go to `inner`
fn chain_into<U>(inner: Deferred<U>, promise: Promise<U>)
where
    U: Clone + Send + 'static,
{
    let forward = inner.clone();
    promise.set_interrupt_handler(move |reason| forward.raise(reason));
    inner.respond(move |result| {
        promise.complete(result.clone());
    });
}

impl<T: Clone + Send + 'static> StdFuture for Deferred<T> {
    type Output = Result<T, RpcError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.inner.state();
        match &mut *state {
            State::Done(result) => Poll::Ready(result.clone()),
            State::Pending { wakers, .. } => {
                if !wakers.iter().any(|w| w.will_wake(cx.waker())) {
                    wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }
}

impl<T: Clone + Send + 'static> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match &*self.inner.state() {
            State::Pending { .. } => "pending",
            State::Done(Ok(_)) => "succeeded",
            State::Done(Err(_)) => "failed",
        };
        f.debug_struct("Deferred").field("state", &status).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn test_value_and_exception_are_terminal() {
        let ok = Deferred::value(7);
        assert!(ok.is_defined());
        assert_eq!(ok.poll().unwrap().unwrap(), 7);

        let failed: Deferred<i32> = Deferred::exception(RpcError::Cancelled);
        assert!(matches!(failed.poll(), Some(Err(RpcError::Cancelled))));
    }

    #[test]
    fn test_promise_completes_exactly_once() {
        let promise = Promise::new();
        let deferred = promise.deferred();

        assert!(promise.succeed("first"));
        assert!(!promise.succeed("second"));
        assert!(!promise.fail(RpcError::Cancelled));
        assert_eq!(deferred.poll().unwrap().unwrap(), "first");
    }

    #[test]
    fn test_listeners_fire_in_registration_order() {
        let promise = Promise::new();
        let deferred = promise.deferred();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..5 {
            let seen = seen.clone();
            deferred.respond(move |_| seen.lock().unwrap().push(i));
        }
        promise.succeed(());

        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_late_listener_runs_immediately() {
        let deferred = Deferred::value(3);
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        deferred.on_success(move |v| {
            h.fetch_add(*v, Ordering::SeqCst);
        });
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_add_listener_routes_by_outcome() {
        let successes = Arc::new(AtomicUsize::new(0));
        let failures = Arc::new(AtomicUsize::new(0));

        let (s, f) = (successes.clone(), failures.clone());
        Deferred::value(1).add_listener(
            move |_| {
                s.fetch_add(1, Ordering::SeqCst);
            },
            move |_| {
                f.fetch_add(1, Ordering::SeqCst);
            },
        );
        let (s, f) = (successes.clone(), failures.clone());
        Deferred::<i32>::exception(RpcError::Cancelled).add_listener(
            move |_| {
                s.fetch_add(1, Ordering::SeqCst);
            },
            move |_| {
                f.fetch_add(1, Ordering::SeqCst);
            },
        );

        assert_eq!(successes.load(Ordering::SeqCst), 1);
        assert_eq!(failures.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_listener_does_not_stop_others() {
        let promise = Promise::new();
        let deferred = promise.deferred();
        let hits = Arc::new(AtomicUsize::new(0));

        deferred.respond(|_| panic!("listener bug"));
        let h = hits.clone();
        deferred.respond(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        promise.succeed(1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_map_and_panic_conversion() {
        let doubled = Deferred::value(21).map(|v| v * 2);
        assert_eq!(doubled.poll().unwrap().unwrap(), 42);

        let exploded: Deferred<i32> = Deferred::value(1).map(|_| panic!("bad mapper"));
        match exploded.poll() {
            Some(Err(RpcError::Application { message, .. })) => {
                assert!(message.contains("bad mapper"))
            }
            other => panic!("unexpected: {:?}", other),
        }

        let passthrough = Deferred::<i32>::exception(RpcError::Cancelled).map(|v| v + 1);
        assert!(matches!(passthrough.poll(), Some(Err(RpcError::Cancelled))));
    }

    #[test]
    fn test_flat_map_waits_for_inner() {
        let outer = Promise::new();
        let inner = Promise::new();
        let inner_deferred = inner.deferred();

        let chained = outer.deferred().flat_map(move |v: i32| {
            inner_deferred.map(move |w: i32| v + w)
        });

        outer.succeed(1);
        assert!(!chained.is_defined());
        inner.succeed(2);
        assert_eq!(chained.poll().unwrap().unwrap(), 3);
    }

    #[test]
    fn test_transform_recovers() {
        let recovered = Deferred::<i32>::exception(RpcError::application("nope"))
            .transform(|v| Ok(v.to_string()), |e| Ok(format!("recovered: {}", e.kind())));
        assert_eq!(recovered.poll().unwrap().unwrap(), "recovered: application");

        let rejected: Deferred<i32> =
            Deferred::value(5).transform(|_| Err(RpcError::Cancelled), Err);
        assert!(matches!(rejected.poll(), Some(Err(RpcError::Cancelled))));
    }

    #[test]
    fn test_rescue_replaces_failure() {
        let rescued = Deferred::exception(RpcError::Timeout(Duration::from_millis(1)))
            .rescue(|_| Deferred::value("fallback"));
        assert_eq!(rescued.poll().unwrap().unwrap(), "fallback");
    }

    #[test]
    fn test_get_times_out_without_cancelling() {
        let promise: Promise<u8> = Promise::new();
        let deferred = promise.deferred();

        let started = Instant::now();
        let result = deferred.get(Duration::from_millis(50));
        assert!(matches!(result, Err(RpcError::Timeout(_))));
        assert!(started.elapsed() >= Duration::from_millis(50));

        promise.succeed(9);
        assert_eq!(deferred.get(Duration::from_millis(1)).unwrap(), 9);
    }

    #[test]
    fn test_get_wakes_on_completion_from_other_thread() {
        let promise = Promise::new();
        let deferred = promise.deferred();

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            promise.succeed("done");
        });

        assert_eq!(deferred.get(Duration::from_secs(5)).unwrap(), "done");
        handle.join().unwrap();
    }

    #[test]
    fn test_within_times_out_and_ignores_late_result() {
        let promise = Promise::new();
        let bounded = promise.deferred().within(Duration::from_millis(30));

        let started = Instant::now();
        let result = bounded.get(Duration::from_secs(5));
        assert!(matches!(result, Err(RpcError::Timeout(_))));
        assert!(started.elapsed() < Duration::from_secs(2));

        promise.succeed(1);
        assert!(matches!(bounded.poll(), Some(Err(RpcError::Timeout(_)))));
    }

    #[test]
    fn test_within_passes_through_fast_result() {
        let promise = Promise::new();
        let bounded = promise.deferred().within(Duration::from_secs(5));
        promise.succeed(4);
        assert_eq!(bounded.get(Duration::from_secs(1)).unwrap(), 4);
    }

    #[test]
    fn test_get_with_unbounded_timeout_waits_for_value() {
        let promise = Promise::new();
        let deferred = promise.deferred();

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            promise.succeed(11);
        });

        assert_eq!(deferred.get(Duration::MAX).unwrap(), 11);
        handle.join().unwrap();
    }

    #[test]
    fn test_within_unbounded_timeout_passes_result_through() {
        let promise = Promise::new();
        let bounded = promise.deferred().within(Duration::MAX);
        assert!(!bounded.is_defined());

        promise.succeed("late");
        assert_eq!(bounded.get(Duration::from_secs(1)).unwrap(), "late");
    }

    #[test]
    fn test_dropped_promise_breaks() {
        let promise: Promise<u8> = Promise::new();
        let deferred = promise.deferred();
        drop(promise);
        assert!(matches!(deferred.poll(), Some(Err(RpcError::BrokenPromise))));
    }

    #[test]
    fn test_cancel_reaches_producer_through_map() {
        let promise: Promise<u32> = Promise::new();
        let interrupts = Arc::new(AtomicUsize::new(0));
        let i = interrupts.clone();
        promise.set_interrupt_handler(move |reason| {
            assert!(matches!(reason, RpcError::Cancelled));
            i.fetch_add(1, Ordering::SeqCst);
        });

        let derived = promise.deferred().map(|v| v + 1);
        derived.cancel();
        derived.cancel();

        assert_eq!(interrupts.load(Ordering::SeqCst), 1);
        // Cancellation is only a signal: the producer still owns the outcome
        assert!(!derived.is_defined());
        promise.succeed(1);
        assert_eq!(derived.poll().unwrap().unwrap(), 2);
    }

    #[test]
    fn test_interrupt_before_handler_installed() {
        let promise: Promise<u32> = Promise::new();
        promise.deferred().cancel();

        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        promise.set_interrupt_handler(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_registration_and_completion() {
        for _ in 0..50 {
            let promise = Promise::new();
            let deferred = promise.deferred();
            let hits = Arc::new(AtomicUsize::new(0));

            let registrars: Vec<_> = (0..4)
                .map(|_| {
                    let deferred = deferred.clone();
                    let hits = hits.clone();
                    thread::spawn(move || {
                        for _ in 0..25 {
                            let hits = hits.clone();
                            deferred.respond(move |_| {
                                hits.fetch_add(1, Ordering::SeqCst);
                            });
                        }
                    })
                })
                .collect();
            let completer = thread::spawn(move || {
                promise.succeed(1u8);
            });

            for r in registrars {
                r.join().unwrap();
            }
            completer.join().unwrap();
            assert_eq!(hits.load(Ordering::SeqCst), 100);
        }
    }

    #[tokio::test]
    async fn test_await_from_async_code() {
        let promise = Promise::new();
        let deferred = promise.deferred();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            promise.succeed(String::from("awaited"));
        });

        assert_eq!(deferred.await.unwrap(), "awaited");
    }

    #[test]
    fn test_manual_polling_registers_waker() {
        let promise = Promise::new();
        let mut task = tokio_test::task::spawn(promise.deferred());

        tokio_test::assert_pending!(task.poll());
        promise.succeed(5u32);
        assert!(task.is_woken());
        let result = tokio_test::assert_ready!(task.poll());
        assert_eq!(result.unwrap(), 5);
    }
}
