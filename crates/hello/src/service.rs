//! Server side of the Hello service

use rand::Rng;
use relay::service::Service;
use relay::worker_pool::{Interrupt, WorkerPool};
use relay::{Deferred, Promise, RpcError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

use crate::protocol::{HelloReply, HelloRequest};

/// Longest random busy-work duration, in whole seconds
pub const MAX_BLOCKING_SECS: u64 = 4;

/// Answers `hi` and `add` immediately and runs `blocking_call` on its worker pool
///
/// The service owns its pool: [`Service::close`] shuts it down.
pub struct HelloService {
    workers: Arc<WorkerPool>,
}

impl HelloService {
    pub fn new(workers: WorkerPool) -> Self {
        Self {
            workers: Arc::new(workers),
        }
    }

    pub fn workers(&self) -> &WorkerPool {
        &self.workers
    }

    fn blocking_call(&self, delay: Duration) -> Deferred<HelloReply> {
        info!(
            "blocking_call requested; will block for {} ms",
            delay.as_millis()
        );
        self.workers
            .submit_interruptible(move |interrupt| busy_work(delay, interrupt))
            .flat_map(|done| match done {
                Some(ms) => Deferred::value(HelloReply::Blocked(ms)),
                None => Deferred::exception(RpcError::Cancelled),
            })
    }
}

impl Service<HelloRequest, HelloReply> for HelloService {
    fn apply(&self, request: HelloRequest) -> Deferred<HelloReply> {
        match request {
            HelloRequest::Hi => {
                info!("hi request received");
                let now = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_millis())
                    .unwrap_or_default();
                Deferred::value(HelloReply::Greeting(format!(
                    "Hello, Stonehenge! At the beep, the time will be {}",
                    now
                )))
            }
            HelloRequest::Add { a, b } => {
                info!("add({}, {}) request received", a, b);
                match a.checked_add(b) {
                    Some(sum) => Deferred::value(HelloReply::Sum(sum)),
                    None => Deferred::exception(RpcError::application(format!(
                        "{} + {} overflows",
                        a, b
                    ))),
                }
            }
            HelloRequest::BlockingCall { delay_ms } => {
                let delay = match delay_ms {
                    Some(ms) => Duration::from_millis(ms),
                    None => Duration::from_secs(rand::rng().random_range(0..=MAX_BLOCKING_SECS)),
                };
                self.blocking_call(delay)
            }
        }
    }

    fn close(&self) -> Deferred<()> {
        let workers = self.workers.clone();
        let promise = Promise::new();
        let closed = promise.deferred();
        // Joining workers blocks, so keep it off the caller's thread
        let spawned = thread::Builder::new()
            .name("hello-close".to_string())
            .spawn(move || {
                workers.shutdown();
                promise.succeed(());
            });
        match spawned {
            Ok(_) => closed,
            Err(e) => Deferred::exception(RpcError::from_cause(e)),
        }
    }
}

/// Keep a CPU busy for `delay`; `None` if interrupted first
fn busy_work(delay: Duration, interrupt: &Interrupt) -> Option<u64> {
    warn!("blocking call doing busy work for {:?}", delay);
    let started = Instant::now();
    let mut acc: u64 = 0;

    while started.elapsed() < delay {
        if interrupt.is_raised() {
            warn!("blocking call interrupted");
            return None;
        }
        for i in 0..1_000u64 {
            acc = acc.wrapping_add(i ^ acc.rotate_left(7));
        }
        std::hint::black_box(acc);
    }

    let ms = delay.as_millis() as u64;
    warn!("blocking call returns {}", ms);
    Some(ms)
}
