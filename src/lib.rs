/*!
 * Relay - an asynchronous RPC runtime
 *
 * A small runtime for calling remote services:
 * - Deferred results with listeners, combinators and timeouts
 * - Services and filters that compose around them
 * - A bounded worker pool for blocking handler logic
 * - Pooled, load-balanced, retrying client endpoints
 * - Server endpoints with read-timeout enforcement
 *
 * Wire formats stay pluggable: codecs turn typed requests and replies into
 * frames, and transports move the frames.
 *
 * Version: 0.1.0
 */

pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod filter;
pub mod logging;
pub mod server;
pub mod service;
pub mod stats;
pub mod transport;
pub mod worker_pool;

// Re-export commonly used types
pub use client::{Client, ClientBuilder};
pub use codec::{ClientCodec, JsonCodec, ServerCodec};
pub use config::{ClientConfig, LoadBalancerKind, RelayConfig, ServerConfig};
pub use error::{BuildError, Result};
pub use filter::{LoggingFilter, StatsFilter, TimeoutFilter};
pub use relay_core_future::{collect, join_all, Deferred, Promise, RpcError};
pub use relay_core_resilience::{Backoff, RetryPolicy};
pub use server::{Server, ServerBuilder};
pub use service::{service_fn, BoxService, Filter, FilterExt, Service};
pub use stats::{StatsReceiver, SummarizingStatsReceiver};
pub use worker_pool::{Interrupt, WorkerPool, WorkerPoolConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(VERSION, env!("CARGO_PKG_VERSION"));
    }
}
