//! Relay Core Resilience: connection pooling, retries and backpressure
//!
//! # Overview
//!
//! The client side of Relay needs three pieces of flow control that do not
//! depend on any wire protocol:
//!
//! - **Connection Pool**: a bounded, per-endpoint set of reusable connections
//!   with FIFO waiting and health checks
//! - **Retry Policy**: a bounded number of extra attempts for transient failures
//! - **Backpressure**: a counter that refuses work once a waiting queue is full
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │         Client call                     │
//! └─────────────┬───────────────────────────┘
//!               │
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Retry Policy                      │  ← Transient failures only
//! │  (retries + 1 attempts, backoff)        │
//! └─────────────┬───────────────────────────┘
//!               │
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Backpressure Guard                │  ← Bound on waiters
//! │  (refuses with PoolExhausted)           │
//! └─────────────┬───────────────────────────┘
//!               │
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Connection Pool                   │  ← At most max_size active
//! │  (FIFO wait, reuse, health checks)      │
//! └─────────────┬───────────────────────────┘
//!               │
//!               ▼
//!          Remote host
//! ```
//!
//! # Usage Example
//!
//! ```no_run
//! use relay_core_future::RpcError;
//! use relay_core_resilience::{retry, Backoff, RetryPolicy};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), RpcError> {
//! let policy = RetryPolicy {
//!     retries: 2,
//!     backoff: Backoff::Constant(Duration::from_millis(10)),
//! };
//!
//! let value = retry(&policy, |attempt| async move {
//!     // Your potentially failing operation
//!     Ok::<_, RpcError>(attempt)
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

pub mod backpressure;
pub mod connection_pool;
pub mod retry;

// Re-export main types for convenience
pub use backpressure::{BackpressureConfig, BackpressureGuard, BackpressureTicket};
pub use connection_pool::{Checkout, ConnectionFactory, ConnectionPool, PoolConfig, PoolStats};
pub use retry::{retry, Backoff, RetryPolicy};

