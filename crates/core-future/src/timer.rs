//! Deadline timer backing `Deferred::within`
//!
//! A single background thread keeps pending tasks in a min-heap keyed by
//! deadline and sleeps on a condition variable until the earliest one is due.
//! Callbacks run on the timer thread, outside the heap lock.

use once_cell::sync::Lazy;
use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::BinaryHeap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error};

type Callback = Box<dyn FnOnce() + Send + 'static>;

/// A scheduled callback, emptied when it fires or is cancelled
struct Slot {
    cancelled: AtomicBool,
    callback: Mutex<Option<Callback>>,
}

impl Slot {
    fn take(&self) -> Option<Callback> {
        self.callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

static GLOBAL: Lazy<Timer> = Lazy::new(|| Timer::new("relay-timer"));

struct Entry {
    deadline: Instant,
    seq: u64,
    slot: Arc<Slot>,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.deadline
            .cmp(&other.deadline)
            .then(self.seq.cmp(&other.seq))
    }
}

struct TimerState {
    heap: BinaryHeap<Reverse<Entry>>,
    stopped: bool,
}

struct TimerShared {
    state: Mutex<TimerState>,
    condvar: Condvar,
    next_seq: AtomicU64,
}

/// Handle to a scheduled callback
#[derive(Clone)]
pub struct TimerTask {
    slot: Arc<Slot>,
}

impl TimerTask {
    /// Prevent the callback from running if it has not fired yet
    ///
    /// The callback and everything it captured are dropped here rather than
    /// at the deadline.
    pub fn cancel(&self) {
        self.slot.cancelled.store(true, Ordering::Release);
        drop(self.slot.take());
    }

    /// Whether `cancel` was called
    pub fn is_cancelled(&self) -> bool {
        self.slot.cancelled.load(Ordering::Acquire)
    }
}

impl fmt::Debug for TimerTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerTask")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// A thread-backed deadline timer
pub struct Timer {
    shared: Arc<TimerShared>,
    thread: Option<thread::JoinHandle<()>>,
}

impl Timer {
    /// Start a timer with its own named thread
    pub fn new(name: &str) -> Self {
        let shared = Arc::new(TimerShared {
            state: Mutex::new(TimerState {
                heap: BinaryHeap::new(),
                stopped: false,
            }),
            condvar: Condvar::new(),
            next_seq: AtomicU64::new(0),
        });

        let worker = shared.clone();
        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run(worker))
            .map_err(|e| error!("failed to start timer thread: {}", e))
            .ok();

        Self { shared, thread }
    }

    /// The process-wide timer, started on first use
    pub fn global() -> &'static Timer {
        &GLOBAL
    }

    /// Run `callback` once `delay` has elapsed
    ///
    /// A `delay` too large to express as a deadline never fires; the callback
    /// is dropped immediately.
    pub fn schedule<F>(&self, delay: Duration, callback: F) -> TimerTask
    where
        F: FnOnce() + Send + 'static,
    {
        let Some(deadline) = Instant::now().checked_add(delay) else {
            return TimerTask {
                slot: Arc::new(Slot {
                    cancelled: AtomicBool::new(false),
                    callback: Mutex::new(None),
                }),
            };
        };

        let callback: Callback = Box::new(callback);
        let slot = Arc::new(Slot {
            cancelled: AtomicBool::new(false),
            callback: Mutex::new(Some(callback)),
        });
        let entry = Entry {
            deadline,
            seq: self.shared.next_seq.fetch_add(1, Ordering::Relaxed),
            slot: slot.clone(),
        };

        let mut state = self
            .shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        state.heap.push(Reverse(entry));
        drop(state);
        self.shared.condvar.notify_one();

        TimerTask { slot }
    }

    /// Number of tasks still waiting in the heap, cancelled ones included
    pub fn pending(&self) -> usize {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .heap
            .len()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let mut state = self
            .shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        state.stopped = true;
        drop(state);
        self.shared.condvar.notify_all();

        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

fn run(shared: Arc<TimerShared>) {
    let mut state = shared.state.lock().unwrap_or_else(PoisonError::into_inner);
    loop {
        if state.stopped {
            debug!("timer thread stopping with {} pending", state.heap.len());
            return;
        }

        let now = Instant::now();
        let mut due = Vec::new();
        while state
            .heap
            .peek()
            .is_some_and(|Reverse(entry)| entry.deadline <= now)
        {
            if let Some(Reverse(entry)) = state.heap.pop() {
                due.push(entry);
            }
        }

        if !due.is_empty() {
            drop(state);
            for entry in due {
                let Some(callback) = entry.slot.take() else {
                    continue;
                };
                if panic::catch_unwind(AssertUnwindSafe(callback)).is_err() {
                    error!("timer callback panicked");
                }
            }
            state = shared.state.lock().unwrap_or_else(PoisonError::into_inner);
            continue;
        }

        let next_deadline = state.heap.peek().map(|Reverse(e)| e.deadline);
        state = match next_deadline {
            Some(deadline) => {
                let wait = deadline.saturating_duration_since(now);
                shared
                    .condvar
                    .wait_timeout(state, wait)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0
            }
            None => shared
                .condvar
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner),
        };
    }
}
