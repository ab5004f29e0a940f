/*!
 * Worker pool: blocking work off the I/O path
 *
 * Services must not block the threads that drive network I/O. Blocking work
 * is handed to a [`WorkerPool`] instead, which runs it on one of a fixed
 * number of OS threads and returns a [`Deferred`] immediately.
 *
 * ```text
 *  submit ──► [ FIFO queue (max_queued) ] ──► worker 0..pool_size ──► Deferred
 * ```
 *
 * Work beyond `pool_size` waits in FIFO order. With `max_queued` set, a
 * submission that would exceed it fails at once with `PoolExhausted`.
 *
 * # Cancellation
 *
 * Cancelling a returned `Deferred` fails it with `Cancelled` right away. If
 * the work has not started it is skipped. If it is already running it keeps
 * running: work submitted with [`WorkerPool::submit_interruptible`] can poll
 * its [`Interrupt`] and stop early, all other work runs to completion and its
 * result is discarded.
 *
 * # Example
 *
 * ```
 * use relay::worker_pool::{WorkerPool, WorkerPoolConfig};
 * use std::time::Duration;
 *
 * let pool = WorkerPool::new(WorkerPoolConfig {
 *     name: "blocking".to_string(),
 *     pool_size: 2,
 *     max_queued: None,
 * })
 * .unwrap();
 *
 * let answer = pool.submit(|| 6 * 7);
 * assert_eq!(answer.get(Duration::from_secs(1)).unwrap(), 42);
 * pool.shutdown();
 * ```
 */

use crossbeam_channel::{unbounded, Receiver, Sender};
use relay_core_future::{Deferred, Promise, RpcError};
use relay_core_resilience::{BackpressureConfig, BackpressureGuard};
use std::error::Error as StdError;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use tracing::{debug, info, warn};

use crate::config::WorkerPoolSettings;
use crate::error::{BuildError, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Worker pool sizing
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Thread name prefix, also used in logs
    pub name: String,
    /// Number of worker threads
    pub pool_size: usize,
    /// Bound on queued-but-not-started work (None = unbounded)
    pub max_queued: Option<usize>,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            name: "relay-worker".to_string(),
            pool_size: 6,
            max_queued: None,
        }
    }
}

impl WorkerPoolConfig {
    /// Build from the `[worker_pool]` config section
    pub fn from_settings(name: impl Into<String>, settings: &WorkerPoolSettings) -> Self {
        Self {
            name: name.into(),
            pool_size: settings.pool_size,
            max_queued: settings.max_queued,
        }
    }
}

/// Cooperative stop flag handed to interruptible work
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    raised: Arc<AtomicBool>,
}

impl Interrupt {
    /// Whether the caller has withdrawn interest
    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::Acquire)
    }

    /// `Err(Cancelled)` once raised, for use with `?`
    pub fn check(&self) -> std::result::Result<(), RpcError> {
        if self.is_raised() {
            Err(RpcError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn raise(&self) {
        self.raised.store(true, Ordering::Release);
    }
}

struct Counters {
    active: AtomicUsize,
    peak_active: AtomicUsize,
    completed: AtomicUsize,
}

/// Fixed-size pool of worker threads
pub struct WorkerPool {
    config: WorkerPoolConfig,
    sender: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
    queued: BackpressureGuard,
    counters: Arc<Counters>,
    shut_down: AtomicBool,
}

impl WorkerPool {
    /// Start `pool_size` worker threads
    pub fn new(config: WorkerPoolConfig) -> Result<Self> {
        if config.pool_size == 0 {
            return Err(BuildError::invalid("pool_size", "must be at least 1"));
        }

        let (sender, receiver) = unbounded::<Job>();
        let counters = Arc::new(Counters {
            active: AtomicUsize::new(0),
            peak_active: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
        });

        let mut workers = Vec::with_capacity(config.pool_size);
        for i in 0..config.pool_size {
            let receiver = receiver.clone();
            let counters = counters.clone();
            let handle = thread::Builder::new()
                .name(format!("{}-{}", config.name, i))
                .spawn(move || worker_loop(receiver, counters))
                .map_err(BuildError::Runtime)?;
            workers.push(handle);
        }

        info!(
            "worker pool {} started with {} threads",
            config.name, config.pool_size
        );

        let queued = BackpressureGuard::new(
            format!("worker pool {}", config.name),
            BackpressureConfig {
                max_pending: config.max_queued.unwrap_or(usize::MAX),
            },
        );

        Ok(Self {
            config,
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            queued,
            counters,
            shut_down: AtomicBool::new(false),
        })
    }

    /// Run blocking `work` on a worker thread
    pub fn submit<T, F>(&self, work: F) -> Deferred<T>
    where
        T: Clone + Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.enqueue(move |_| Ok(work()))
    }

    /// Run blocking `work` whose error becomes the failure's cause
    pub fn submit_fallible<T, E, F>(&self, work: F) -> Deferred<T>
    where
        T: Clone + Send + 'static,
        E: StdError + Send + Sync + 'static,
        F: FnOnce() -> std::result::Result<T, E> + Send + 'static,
    {
        self.enqueue(move |_| work().map_err(RpcError::from_cause))
    }

    /// Run blocking `work` that can observe cancellation
    pub fn submit_interruptible<T, F>(&self, work: F) -> Deferred<T>
    where
        T: Clone + Send + 'static,
        F: FnOnce(&Interrupt) -> T + Send + 'static,
    {
        self.enqueue(move |interrupt| Ok(work(interrupt)))
    }

    fn enqueue<T, F>(&self, work: F) -> Deferred<T>
    where
        T: Clone + Send + 'static,
        F: FnOnce(&Interrupt) -> std::result::Result<T, RpcError> + Send + 'static,
    {
        if self.shut_down.load(Ordering::Acquire) {
            return Deferred::exception(self.closed_error());
        }

        let ticket = match self.queued.try_enter() {
            Ok(ticket) => ticket,
            Err(e) => {
                warn!("worker pool {} rejected work: {}", self.config.name, e);
                return Deferred::exception(e);
            }
        };

        let promise = Arc::new(Promise::new());
        let deferred = promise.deferred();
        let interrupt = Interrupt::default();
        {
            let interrupt = interrupt.clone();
            let weak = Arc::downgrade(&promise);
            promise.set_interrupt_handler(move |reason| {
                interrupt.raise();
                if let Some(promise) = weak.upgrade() {
                    promise.fail(reason);
                }
            });
        }

        let job: Job = Box::new(move || {
            drop(ticket);
            if interrupt.is_raised() {
                debug!("skipping cancelled work item");
                return;
            }
            let result = panic::catch_unwind(AssertUnwindSafe(|| work(&interrupt)))
                .unwrap_or_else(|payload| {
                    let err = RpcError::panicked(payload);
                    warn!("work item failed: {}", err);
                    Err(err)
                });
            promise.complete(result);
        });

        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        match sender.as_ref().map(|s| s.send(job)) {
            Some(Ok(())) => deferred,
            _ => Deferred::exception(self.closed_error()),
        }
    }

    /// Stop accepting work, run what is queued, then join every worker
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let workers = std::mem::take(
            &mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner),
        );
        let current = thread::current().id();
        for handle in workers {
            if handle.thread().id() == current {
                continue;
            }
            let _ = handle.join();
        }
        info!("worker pool {} shut down", self.config.name);
    }

    /// Work items currently executing
    pub fn active(&self) -> usize {
        self.counters.active.load(Ordering::Acquire)
    }

    /// Highest number of work items ever executing at once
    pub fn peak_active(&self) -> usize {
        self.counters.peak_active.load(Ordering::Acquire)
    }

    /// Work items accepted but not yet started
    pub fn queued(&self) -> usize {
        self.queued.pending()
    }

    /// Work items that have finished (including skipped ones)
    pub fn completed(&self) -> usize {
        self.counters.completed.load(Ordering::Acquire)
    }

    pub fn pool_size(&self) -> usize {
        self.config.pool_size
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    fn closed_error(&self) -> RpcError {
        RpcError::ChannelClosed(format!("worker pool {} is shut down", self.config.name))
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Workers drain the queue and exit once the sender is gone
        self.shut_down.store(true, Ordering::Release);
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

fn worker_loop(receiver: Receiver<Job>, counters: Arc<Counters>) {
    for job in receiver.iter() {
        let now = counters.active.fetch_add(1, Ordering::AcqRel) + 1;
        counters.peak_active.fetch_max(now, Ordering::AcqRel);
        job();
        counters.active.fetch_sub(1, Ordering::AcqRel);
        counters.completed.fetch_add(1, Ordering::AcqRel);
    }
}
