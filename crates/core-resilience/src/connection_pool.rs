//! Bounded connection pool for one endpoint
//!
//! At most `max_size` connections are checked out at once. Callers beyond
//! that wait in FIFO order on a fair semaphore until a connection is released
//! or `acquire_timeout` elapses. An optional `max_waiters` bound turns
//! excess waiters away with `PoolExhausted`.
//!
//! A [`Checkout`] owns its connection exclusively. Hand it back with
//! [`ConnectionPool::release`] to keep the connection for reuse; dropping it
//! (or calling [`ConnectionPool::discard`]) closes the connection instead.

use crate::backpressure::{BackpressureConfig, BackpressureGuard, BackpressureTicket};
use relay_core_future::RpcError;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, trace};

/// Configuration for connection pool behavior
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of connections checked out at once
    pub max_size: usize,
    /// Maximum time a connection can remain idle before being closed
    pub idle_timeout: Option<Duration>,
    /// Maximum lifetime of a connection
    pub max_lifetime: Option<Duration>,
    /// Bound on waiting for a slot plus establishing a connection
    pub acquire_timeout: Duration,
    /// Maximum number of callers allowed to wait for a slot
    pub max_waiters: Option<usize>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 10,
            idle_timeout: Some(Duration::from_secs(300)), // 5 minutes
            max_lifetime: None,
            acquire_timeout: Duration::from_secs(30),
            max_waiters: None,
        }
    }
}

/// A connection wrapper that tracks metadata
#[derive(Debug)]
struct PooledConnection<T> {
    /// The actual connection
    conn: T,
    /// When this connection was created
    created_at: Instant,
    /// When this connection was last used
    last_used: Instant,
}

impl<T> PooledConnection<T> {
    fn new(conn: T) -> Self {
        let now = Instant::now();
        Self {
            conn,
            created_at: now,
            last_used: now,
        }
    }

    fn is_expired(&self, config: &PoolConfig) -> bool {
        if let Some(idle_timeout) = config.idle_timeout {
            if self.last_used.elapsed() > idle_timeout {
                return true;
            }
        }

        if let Some(max_lifetime) = config.max_lifetime {
            if self.created_at.elapsed() > max_lifetime {
                return true;
            }
        }

        false
    }

    fn update_last_used(&mut self) {
        self.last_used = Instant::now();
    }
}

/// Factory trait for creating and validating connections
#[async_trait::async_trait]
pub trait ConnectionFactory<T: Send + 'static>: Send + Sync {
    /// Create a new connection
    async fn create(&self) -> Result<T, RpcError>;

    /// Check if a connection is still healthy
    async fn is_healthy(&self, conn: &T) -> bool;

    /// Close a connection (optional cleanup)
    async fn close(&self, conn: T) {
        drop(conn);
    }
}

/// Internal pool state
struct PoolState<T> {
    /// Available connections
    idle: Vec<PooledConnection<T>>,
    /// Number of connections currently checked out
    active_count: usize,
    /// Highest `active_count` ever observed
    peak_active: usize,
}

impl<T> PoolState<T> {
    fn new() -> Self {
        Self {
            idle: Vec::new(),
            active_count: 0,
            peak_active: 0,
        }
    }

    fn total_count(&self) -> usize {
        self.idle.len() + self.active_count
    }

    fn mark_active(&mut self) {
        self.active_count += 1;
        self.peak_active = self.peak_active.max(self.active_count);
    }

    fn mark_inactive(&mut self) {
        self.active_count = self.active_count.saturating_sub(1);
    }
}

struct Shared<T> {
    name: String,
    config: PoolConfig,
    factory: Arc<dyn ConnectionFactory<T>>,
    state: Mutex<PoolState<T>>,
    semaphore: Arc<Semaphore>,
    waiters: BackpressureGuard,
    closed: AtomicBool,
}

impl<T> Shared<T> {
    fn state(&self) -> MutexGuard<'_, PoolState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A bounded pool of connections to one endpoint
///
/// # Example
/// ```no_run
/// use relay_core_future::RpcError;
/// use relay_core_resilience::{ConnectionFactory, ConnectionPool, PoolConfig};
/// use std::sync::Arc;
///
/// struct MyConnection;
/// struct MyConnectionFactory;
///
/// #[async_trait::async_trait]
/// impl ConnectionFactory<MyConnection> for MyConnectionFactory {
///     async fn create(&self) -> Result<MyConnection, RpcError> {
///         Ok(MyConnection)
///     }
///
///     async fn is_healthy(&self, _conn: &MyConnection) -> bool {
///         true
///     }
/// }
///
/// # async fn example() -> Result<(), RpcError> {
/// let pool = ConnectionPool::new("db:5432", Arc::new(MyConnectionFactory), PoolConfig::default());
///
/// let conn = pool.acquire().await?;
/// // Use connection...
/// pool.release(conn).await;
/// # Ok(())
/// # }
/// ```
pub struct ConnectionPool<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for ConnectionPool<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Send + 'static> ConnectionPool<T> {
    /// Create a new connection pool
    pub fn new(
        name: impl Into<String>,
        factory: Arc<dyn ConnectionFactory<T>>,
        config: PoolConfig,
    ) -> Self {
        let name = name.into();
        let waiters = BackpressureGuard::new(
            format!("{} waiters", name),
            BackpressureConfig {
                max_pending: config.max_waiters.unwrap_or(usize::MAX),
            },
        );
        Self {
            shared: Arc::new(Shared {
                semaphore: Arc::new(Semaphore::new(config.max_size)),
                name,
                config,
                factory,
                state: Mutex::new(PoolState::new()),
                waiters,
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Acquire a connection from the pool
    ///
    /// Reuses a healthy idle connection when one exists; otherwise creates
    /// one. When `max_size` connections are already out, waits in line.
    /// Failing to get a connection within `acquire_timeout` is reported as
    /// [`RpcError::Connect`].
    pub async fn acquire(&self) -> Result<Checkout<T>, RpcError> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(self.closed_error());
        }

        let ticket = self.shared.waiters.try_enter()?;
        let timeout = self.shared.config.acquire_timeout;

        match tokio::time::timeout(timeout, self.checkout(ticket)).await {
            Ok(result) => result,
            Err(_) => Err(RpcError::Connect {
                endpoint: self.shared.name.clone(),
                reason: format!("no connection available within {:?}", timeout),
            }),
        }
    }

    async fn checkout(&self, ticket: BackpressureTicket) -> Result<Checkout<T>, RpcError> {
        let permit = self
            .shared
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| self.closed_error())?;
        drop(ticket);

        // Try to reuse an idle connection
        while let Some(mut pooled) = self.take_idle().await {
            if self.shared.factory.is_healthy(&pooled.conn).await {
                pooled.update_last_used();
                trace!(pool = %self.shared.name, "reusing idle connection");
                return Ok(self.wrap(pooled, permit));
            }
            debug!(pool = %self.shared.name, "closing unhealthy idle connection");
            self.shared.factory.close(pooled.conn).await;
        }

        // No idle connections, create a new one
        let conn = self.shared.factory.create().await?;
        debug!(pool = %self.shared.name, "opened new connection");
        Ok(self.wrap(PooledConnection::new(conn), permit))
    }

    /// Pop one idle connection, closing any that expired
    async fn take_idle(&self) -> Option<PooledConnection<T>> {
        let (candidate, expired) = {
            let mut state = self.shared.state();
            let (fresh, expired): (Vec<_>, Vec<_>) = std::mem::take(&mut state.idle)
                .into_iter()
                .partition(|c| !c.is_expired(&self.shared.config));
            state.idle = fresh;
            (state.idle.pop(), expired)
        };

        for pooled in expired {
            debug!(pool = %self.shared.name, "closing expired idle connection");
            self.shared.factory.close(pooled.conn).await;
        }
        candidate
    }

    /// Only a live `Checkout` counts as active, so an acquire cancelled
    /// mid-create leaves the counters untouched.
    fn wrap(&self, pooled: PooledConnection<T>, permit: OwnedSemaphorePermit) -> Checkout<T> {
        self.shared.state().mark_active();
        Checkout {
            pooled: Some(pooled),
            shared: self.shared.clone(),
            _permit: permit,
        }
    }

    /// Return a connection to the pool
    ///
    /// The connection will be checked for health before being returned to the
    /// idle set. If unhealthy or the pool is closed, it is closed instead.
    pub async fn release(&self, mut checkout: Checkout<T>) {
        let Some(mut pooled) = checkout.pooled.take() else {
            return;
        };
        self.shared.state().mark_inactive();

        let keep = !self.shared.closed.load(Ordering::Acquire)
            && self.shared.factory.is_healthy(&pooled.conn).await;

        if keep {
            pooled.update_last_used();
            self.shared.state().idle.push(pooled);
        } else {
            self.shared.factory.close(pooled.conn).await;
        }
        // Permit is released when `checkout` drops, after the idle push
    }

    /// Close a checked-out connection instead of returning it
    pub async fn discard(&self, mut checkout: Checkout<T>) {
        if let Some(pooled) = checkout.pooled.take() {
            self.shared.state().mark_inactive();
            self.shared.factory.close(pooled.conn).await;
        }
    }

    /// Get current pool statistics
    pub fn stats(&self) -> PoolStats {
        let state = self.shared.state();
        PoolStats {
            idle: state.idle.len(),
            active: state.active_count,
            total: state.total_count(),
            waiting: self.shared.waiters.pending(),
            peak_active: state.peak_active,
            max_size: self.shared.config.max_size,
        }
    }

    /// Close all idle connections
    pub async fn clear_idle(&self) {
        let idle = std::mem::take(&mut self.shared.state().idle);
        for pooled in idle {
            self.shared.factory.close(pooled.conn).await;
        }
    }

    /// Stop handing out connections and close the idle ones
    ///
    /// Waiting callers fail; connections still checked out are closed when
    /// they come back.
    pub async fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.semaphore.close();
        self.clear_idle().await;
    }

    /// Whether [`close`](Self::close) was called
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    fn closed_error(&self) -> RpcError {
        RpcError::ChannelClosed(format!("connection pool {} is closed", self.shared.name))
    }
}

/// Exclusive use of one pooled connection
///
/// Dropping a checkout without releasing it closes the connection and frees
/// its slot.
pub struct Checkout<T> {
    pooled: Option<PooledConnection<T>>,
    shared: Arc<Shared<T>>,
    _permit: OwnedSemaphorePermit,
}

impl<T> Deref for Checkout<T> {
    type Target = T;

    fn deref(&self) -> &T {
        match &self.pooled {
            Some(pooled) => &pooled.conn,
            None => unreachable!("checkout used after release"),
        }
    }
}

impl<T> DerefMut for Checkout<T> {
    fn deref_mut(&mut self) -> &mut T {
        match &mut self.pooled {
            Some(pooled) => &mut pooled.conn,
            None => unreachable!("checkout used after release"),
        }
    }
}

impl<T> Drop for Checkout<T> {
    fn drop(&mut self) {
        if self.pooled.take().is_some() {
            self.shared.state().mark_inactive();
            debug!(pool = %self.shared.name, "dropped checked-out connection");
        }
    }
}

/// Pool statistics
#[derive(Debug, Clone)]
pub struct PoolStats {
    /// Number of idle connections
    pub idle: usize,
    /// Number of checked-out connections
    pub active: usize,
    /// Total connections (idle + active)
    pub total: usize,
    /// Callers waiting for a slot
    pub waiting: usize,
    /// Highest number of simultaneously checked-out connections
    pub peak_active: usize,
    /// Maximum pool size
    pub max_size: usize,
}
