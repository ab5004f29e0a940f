//! Backpressure: bounded admission for waiting work
//!
//! A guard counts items that are queued but not yet served (callers waiting
//! for a pooled connection, jobs waiting for a worker). When the count reaches
//! the configured bound, new items are refused with
//! [`RpcError::PoolExhausted`] instead of queueing without limit.
//!
//! # Example
//!
//! ```
//! use relay_core_resilience::backpressure::{BackpressureConfig, BackpressureGuard};
//!
//! let guard = BackpressureGuard::new("waiters", BackpressureConfig { max_pending: 1 });
//!
//! let ticket = guard.try_enter().unwrap();
//! assert!(guard.try_enter().is_err());
//!
//! drop(ticket);
//! assert!(guard.can_accept());
//! ```

use relay_core_future::RpcError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Configuration for a backpressure bound
#[derive(Debug, Clone)]
pub struct BackpressureConfig {
    /// Maximum number of items allowed to wait at once
    pub max_pending: usize,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            max_pending: 10_000,
        }
    }
}

#[derive(Debug)]
struct Counter {
    name: String,
    config: BackpressureConfig,
    pending: AtomicUsize,
}

/// Counts waiting items against a bound
///
/// Thread-safe via atomic operations; no locking required.
#[derive(Debug, Clone)]
pub struct BackpressureGuard {
    counter: Arc<Counter>,
}

impl BackpressureGuard {
    /// Create a new guard for a named queue
    pub fn new(name: impl Into<String>, config: BackpressureConfig) -> Self {
        Self {
            counter: Arc::new(Counter {
                name: name.into(),
                config,
                pending: AtomicUsize::new(0),
            }),
        }
    }

    /// Admit one item, or refuse it when the bound is reached
    pub fn try_enter(&self) -> Result<BackpressureTicket, RpcError> {
        let max = self.counter.config.max_pending;
        self.counter
            .pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max).then_some(n + 1)
            })
            .map(|_| BackpressureTicket {
                counter: self.counter.clone(),
            })
            .map_err(|_| RpcError::PoolExhausted {
                resource: self.counter.name.clone(),
                capacity: max,
            })
    }

    /// Whether another item would be admitted right now
    pub fn can_accept(&self) -> bool {
        self.pending() < self.counter.config.max_pending
    }

    /// Items currently admitted and not yet released
    pub fn pending(&self) -> usize {
        self.counter.pending.load(Ordering::Acquire)
    }
}

/// Admission slot; released on drop
#[derive(Debug)]
pub struct BackpressureTicket {
    counter: Arc<Counter>,
}

impl Drop for BackpressureTicket {
    fn drop(&mut self) {
        let _ = self
            .counter
            .pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                Some(n.saturating_sub(1))
            });
    }
}
