use once_cell::sync::OnceCell;
use relay_core_resilience::{Backoff, ConnectionPool, PoolConfig, RetryPolicy};
use std::sync::atomic::{AtomicBool, AtomicUsize};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::{Handle, Runtime};
use tracing::info;

use super::balancer::Balancer;
use super::connection::HostConnector;
use super::{Client, ClientInner, Host};
use crate::codec::ClientCodec;
use crate::config::{ClientConfig, LoadBalancerKind};
use crate::error::{BuildError, Result};
use crate::stats::{NullStatsReceiver, ScopedStats, SharedStats};
use crate::transport::{Connector, Endpoint, TcpConnector};

/// Runtime for clients built outside of any tokio context
static CLIENT_RUNTIME: OnceCell<Runtime> = OnceCell::new();

fn client_runtime() -> Result<Handle> {
    CLIENT_RUNTIME
        .get_or_try_init(|| {
            tokio::runtime::Builder::new_multi_thread()
                .worker_threads(2)
                .thread_name("relay-client")
                .enable_all()
                .build()
        })
        .map(|rt| rt.handle().clone())
        .map_err(BuildError::Runtime)
}

/// Builder for [`Client`]
///
/// `hosts` and `codec` are required; everything else has a default:
///
/// | option                        | default      |
/// |-------------------------------|--------------|
/// | `host_connection_limit`       | 2            |
/// | `host_connection_max_waiters` | unbounded    |
/// | `connect_timeout`             | 1 s          |
/// | `request_timeout`             | 10 s         |
/// | `retries`                     | 2            |
/// | `load_balancer`               | round robin  |
pub struct ClientBuilder<Req, Rep> {
    name: String,
    hosts: Vec<String>,
    codec: Option<Arc<dyn ClientCodec<Req, Rep>>>,
    connector: Option<Arc<dyn Connector>>,
    host_connection_limit: usize,
    host_connection_max_waiters: Option<usize>,
    connect_timeout: Duration,
    request_timeout: Duration,
    retries: u32,
    backoff: Backoff,
    load_balancer: LoadBalancerKind,
    idle_timeout: Option<Duration>,
    stats: Option<SharedStats>,
    runtime: Option<Handle>,
}

impl<Req, Rep> Default for ClientBuilder<Req, Rep> {
    fn default() -> Self {
        Self::from_config(&ClientConfig::default())
    }
}

impl<Req, Rep> ClientBuilder<Req, Rep> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a loaded configuration section
    pub fn from_config(config: &ClientConfig) -> Self {
        let backoff = if config.retry_backoff_ms == 0 {
            Backoff::None
        } else {
            Backoff::Exponential {
                initial: Duration::from_millis(config.retry_backoff_ms),
                max: Duration::from_secs(1),
                multiplier: 2.0,
                jitter: 0.1,
            }
        };

        Self {
            name: config.name.clone(),
            hosts: config.hosts.clone(),
            codec: None,
            connector: None,
            host_connection_limit: config.host_connection_limit,
            host_connection_max_waiters: config.host_connection_max_waiters,
            connect_timeout: config.connect_timeout(),
            request_timeout: config.request_timeout(),
            retries: config.retries,
            backoff,
            load_balancer: config.load_balancer,
            idle_timeout: config.idle_timeout(),
            stats: None,
            runtime: None,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Candidate endpoints, as `host:port`
    pub fn hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hosts = hosts.into_iter().map(Into::into).collect();
        self
    }

    pub fn codec<C>(mut self, codec: C) -> Self
    where
        C: ClientCodec<Req, Rep> + 'static,
    {
        self.codec = Some(Arc::new(codec));
        self
    }

    /// Replace the TCP connector, e.g. with an in-memory one
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn host_connection_limit(mut self, limit: usize) -> Self {
        self.host_connection_limit = limit;
        self
    }

    pub fn host_connection_max_waiters(mut self, max: usize) -> Self {
        self.host_connection_max_waiters = Some(max);
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn load_balancer(mut self, kind: LoadBalancerKind) -> Self {
        self.load_balancer = kind;
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Report counters and latencies, scoped under the client name
    pub fn report_to(mut self, stats: SharedStats) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Run calls on this runtime instead of the ambient one
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    pub fn build(self) -> Result<Client<Req, Rep>>
    where
        Req: 'static,
        Rep: 'static,
    {
        if self.hosts.is_empty() {
            return Err(BuildError::Missing("hosts"));
        }
        if self.hosts.iter().any(|h| h.trim().is_empty()) {
            return Err(BuildError::invalid("hosts", "empty host address"));
        }
        if self.host_connection_limit == 0 {
            return Err(BuildError::invalid(
                "host_connection_limit",
                "must be at least 1",
            ));
        }
        let codec = self.codec.ok_or(BuildError::Missing("codec"))?;

        let runtime = match self.runtime {
            Some(handle) => handle,
            None => match Handle::try_current() {
                Ok(handle) => handle,
                Err(_) => client_runtime()?,
            },
        };

        let stats: SharedStats = match self.stats {
            Some(inner) => Arc::new(ScopedStats::new(self.name.clone(), inner)),
            None => Arc::new(NullStatsReceiver),
        };
        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(TcpConnector::new()));

        let hosts = self
            .hosts
            .iter()
            .map(|addr| {
                let endpoint = Endpoint::new(addr.trim());
                let factory = HostConnector::new(
                    endpoint.clone(),
                    connector.clone(),
                    self.connect_timeout,
                    stats.clone(),
                );
                let pool = ConnectionPool::new(
                    endpoint.to_string(),
                    Arc::new(factory),
                    PoolConfig {
                        max_size: self.host_connection_limit,
                        idle_timeout: self.idle_timeout,
                        max_lifetime: None,
                        acquire_timeout: self.connect_timeout,
                        max_waiters: self.host_connection_max_waiters,
                    },
                );
                Host {
                    endpoint,
                    pool,
                    outstanding: AtomicUsize::new(0),
                }
            })
            .collect::<Vec<_>>();

        info!(
            "client {} ready: {} host(s), {} connection(s) per host, {} retries",
            self.name,
            hosts.len(),
            self.host_connection_limit,
            self.retries
        );

        Ok(Client {
            inner: Arc::new(ClientInner {
                name: self.name,
                hosts,
                codec,
                balancer: Balancer::new(self.load_balancer),
                policy: RetryPolicy {
                    retries: self.retries,
                    backoff: self.backoff,
                },
                request_timeout: self.request_timeout,
                stats,
                runtime,
                released: AtomicBool::new(false),
            }),
        })
    }
}
