use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::info;

use super::connection::ConnectionHandler;
use super::{accept_loop, Server};
use crate::codec::ServerCodec;
use crate::config::ServerConfig;
use crate::error::{BuildError, Result};
use crate::service::Service;
use crate::stats::{NullStatsReceiver, ScopedStats, SharedStats};
use crate::transport::DEFAULT_MAX_FRAME_LENGTH;

/// Builder for [`Server`]
///
/// `codec` and `bind_to` are required. `read_timeout` defaults to 2 s.
pub struct ServerBuilder<Req, Rep> {
    name: String,
    codec: Option<Arc<dyn ServerCodec<Req, Rep>>>,
    bind_to: Option<String>,
    read_timeout: Duration,
    max_frame_length: usize,
    stats: Option<SharedStats>,
}

impl<Req, Rep> Default for ServerBuilder<Req, Rep> {
    fn default() -> Self {
        let defaults = ServerConfig::default();
        Self {
            name: defaults.name,
            codec: None,
            bind_to: None,
            read_timeout: Duration::from_millis(defaults.read_timeout_ms),
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
            stats: None,
        }
    }
}

impl<Req, Rep> ServerBuilder<Req, Rep> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            name: config.name.clone(),
            codec: None,
            bind_to: Some(config.bind_to.clone()),
            read_timeout: config.read_timeout(),
            max_frame_length: config.max_frame_length,
            stats: None,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn codec<C>(mut self, codec: C) -> Self
    where
        C: ServerCodec<Req, Rep> + 'static,
    {
        self.codec = Some(Arc::new(codec));
        self
    }

    /// Listening address; port 0 picks a free port
    pub fn bind_to(mut self, addr: impl Into<String>) -> Self {
        self.bind_to = Some(addr.into());
        self
    }

    /// Close connections that send no request for this long
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn max_frame_length(mut self, max: usize) -> Self {
        self.max_frame_length = max;
        self
    }

    /// Report counters and latencies, scoped under the server name
    pub fn report_to(mut self, stats: SharedStats) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Bind the listener and start accepting connections for `service`
    ///
    /// Must be called from within a tokio runtime.
    pub async fn build<S>(self, service: S) -> Result<Server>
    where
        S: Service<Req, Rep> + 'static,
        Req: Send + 'static,
        Rep: Clone + Send + 'static,
    {
        let codec = self.codec.ok_or(BuildError::Missing("codec"))?;
        let addr = self.bind_to.ok_or(BuildError::Missing("bind_to"))?;
        if self.read_timeout.is_zero() {
            return Err(BuildError::invalid("read_timeout", "must be non-zero"));
        }
        if self.max_frame_length == 0 {
            return Err(BuildError::invalid("max_frame_length", "must be non-zero"));
        }

        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| BuildError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| BuildError::Bind { addr, source })?;

        let stats: SharedStats = match self.stats {
            Some(inner) => Arc::new(ScopedStats::new(self.name.clone(), inner)),
            None => Arc::new(NullStatsReceiver),
        };
        let handler = Arc::new(ConnectionHandler::new(
            self.name.clone(),
            Arc::new(service),
            codec,
            self.read_timeout,
            stats,
        ));

        let shutdown = CancellationToken::new();
        let tracker = TaskTracker::new();
        let closer = handler.clone();
        tracker.spawn(accept_loop(
            listener,
            handler,
            self.max_frame_length,
            shutdown.clone(),
            tracker.clone(),
        ));

        info!(
            "server {} listening on {} (read timeout {:?})",
            self.name, local_addr, self.read_timeout
        );

        Ok(Server {
            name: self.name,
            local_addr,
            shutdown,
            tracker,
            gauges: closer.gauges().clone(),
            close_service: Box::new(move || closer.service().close()),
        })
    }
}
