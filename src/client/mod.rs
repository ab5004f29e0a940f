//! Client endpoint: a pooled, load-balanced, retrying service proxy
//!
//! # Overview
//!
//! A [`Client`] is a [`Service`] whose `apply` sends the request to one of
//! its hosts and returns a `Deferred` for the reply.
//!
//! ```text
//!  apply(req) ──► encode ──► pick host ──► acquire connection ──► send / await reply
//!                               ▲              (FIFO wait,             │
//!                               │               ≤ limit active)        │
//!                               └──── transient failure, retries left ─┘
//! ```
//!
//! - Each host has its own connection pool. At most `host_connection_limit`
//!   connections to a host are active at once; further calls wait in line
//!   for up to `connect_timeout` and then fail with `RpcError::Connect`.
//! - A call is attempted at most `retries + 1` times, and only connect and
//!   timeout failures are retried. Attempt `k` goes to host
//!   `(first + k) % hosts`, where `first` is the load balancer's pick.
//! - A connection whose request failed or timed out is closed, never reused.
//!
//! Each call runs as one task on the client's tokio runtime. Cancelling the
//! returned `Deferred` aborts that task and fails the call with `Cancelled`.
//!
//! # Example
//!
//! ```no_run
//! use relay::client::ClientBuilder;
//! use relay::codec::JsonCodec;
//! use relay::service::Service;
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let client = ClientBuilder::<String, String>::new()
//!     .hosts(["127.0.0.1:8080"])
//!     .codec(JsonCodec::new())
//!     .host_connection_limit(2)
//!     .retries(2)
//!     .build()?;
//!
//! let reply = client.apply("hello".to_string()).get(Duration::from_secs(3))?;
//! client.release();
//! # Ok(())
//! # }
//! ```

mod balancer;
mod builder;
mod connection;

pub use builder::ClientBuilder;
pub use connection::{Connection, ConnectionState};
pub use relay_core_resilience::PoolStats;

use bytes::Bytes;
use relay_core_future::{Deferred, Promise, RpcError};
use relay_core_resilience::{retry, ConnectionPool, RetryPolicy};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::codec::ClientCodec;
use crate::filter::record_outcome;
use crate::service::Service;
use crate::stats::SharedStats;
use crate::transport::Endpoint;
use balancer::Balancer;

struct Host {
    endpoint: Endpoint,
    pool: ConnectionPool<Connection>,
    outstanding: AtomicUsize,
}

/// Counts a request against its host while alive
struct Outstanding<'a>(&'a AtomicUsize);

impl<'a> Outstanding<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for Outstanding<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

struct ClientInner<Req, Rep> {
    name: String,
    hosts: Vec<Host>,
    codec: Arc<dyn ClientCodec<Req, Rep>>,
    balancer: Balancer,
    policy: RetryPolicy,
    request_timeout: Duration,
    stats: SharedStats,
    runtime: Handle,
    released: AtomicBool,
}

impl<Req, Rep> ClientInner<Req, Rep> {
    async fn call(&self, frame: Bytes) -> Result<Rep, RpcError> {
        let loads: Vec<usize> = self
            .hosts
            .iter()
            .map(|h| h.outstanding.load(Ordering::Acquire))
            .collect();
        let first = self.balancer.pick(&loads);
        let n = self.hosts.len();
        let this = self;

        retry(&self.policy, move |attempt| {
            let host = &this.hosts[(first + attempt as usize) % n];
            let frame = frame.clone();
            async move {
                if attempt > 0 {
                    this.stats.counter("retries", 1);
                }
                this.attempt(host, frame).await
            }
        })
        .await
    }

    async fn attempt(&self, host: &Host, frame: Bytes) -> Result<Rep, RpcError> {
        let _outstanding = Outstanding::enter(&host.outstanding);
        let mut conn = host.pool.acquire().await?;

        match conn.dispatch(frame, self.request_timeout).await {
            Ok(reply) => {
                host.pool.release(conn).await;
                self.codec.decode_response(&reply)
            }
            Err(e) => {
                warn!(client = %self.name, host = %host.endpoint, "request failed: {}", e);
                host.pool.discard(conn).await;
                Err(e)
            }
        }
    }
}

/// Service proxy to a set of remote hosts
pub struct Client<Req, Rep> {
    inner: Arc<ClientInner<Req, Rep>>,
}

impl<Req, Rep> Clone for Client<Req, Rep> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<Req, Rep> Client<Req, Rep>
where
    Req: 'static,
    Rep: Clone + Send + 'static,
{
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn hosts(&self) -> Vec<Endpoint> {
        self.inner.hosts.iter().map(|h| h.endpoint.clone()).collect()
    }

    /// Connection pool statistics per host
    pub fn pool_stats(&self) -> Vec<(Endpoint, PoolStats)> {
        self.inner
            .hosts
            .iter()
            .map(|h| (h.endpoint.clone(), h.pool.stats()))
            .collect()
    }

    /// Stop accepting calls and close idle connections
    ///
    /// Calls already in flight finish normally; their connections are closed
    /// when they come back.
    pub fn release(&self) -> Deferred<()> {
        if self.inner.released.swap(true, Ordering::AcqRel) {
            return Deferred::value(());
        }
        info!("releasing client {}", self.inner.name);

        let promise = Promise::new();
        let released = promise.deferred();
        let inner = self.inner.clone();
        self.inner.runtime.spawn(async move {
            for host in &inner.hosts {
                host.pool.close().await;
            }
            promise.succeed(());
        });
        released
    }

    pub fn is_released(&self) -> bool {
        self.inner.released.load(Ordering::Acquire)
    }
}

impl<Req, Rep> Service<Req, Rep> for Client<Req, Rep>
where
    Req: 'static,
    Rep: Clone + Send + 'static,
{
    fn apply(&self, request: Req) -> Deferred<Rep> {
        if self.is_released() {
            return Deferred::exception(RpcError::ChannelClosed(format!(
                "client {} has been released",
                self.inner.name
            )));
        }

        let frame = match self.inner.codec.encode_request(&request) {
            Ok(frame) => frame,
            Err(e) => return Deferred::exception(e),
        };

        let started = Instant::now();
        self.inner.stats.counter("requests", 1);

        let promise = Arc::new(Promise::new());
        let reply = promise.deferred();

        let task = {
            let inner = self.inner.clone();
            let promise = promise.clone();
            self.inner.runtime.spawn(async move {
                let result = inner.call(frame).await;
                record_outcome(inner.stats.as_ref(), &result, started.elapsed());
                if let Err(e) = &result {
                    debug!(client = %inner.name, "call failed: {}", e);
                }
                promise.complete(result);
            })
        };

        let abort = task.abort_handle();
        let weak = Arc::downgrade(&promise);
        let stats = self.inner.stats.clone();
        promise.set_interrupt_handler(move |reason| {
            if let Some(promise) = weak.upgrade() {
                abort.abort();
                if promise.fail(reason.clone()) {
                    record_outcome::<()>(stats.as_ref(), &Err(reason), started.elapsed());
                }
            }
        });

        reply
    }

    fn close(&self) -> Deferred<()> {
        self.release()
    }
}
