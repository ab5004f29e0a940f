use async_trait::async_trait;
use bytes::Bytes;
use relay_core_future::RpcError;
use relay_core_resilience::ConnectionFactory;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

use crate::stats::StatsReceiver;
use crate::transport::{connect_within, Connector, Endpoint, Transport};

/// Lifecycle of one client connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Ready for a request
    Idle,
    /// A request is in flight
    Active,
    /// Unusable; never handed out again
    Closed(String),
}

/// One logical channel to a host
///
/// Carries one request at a time. A request that fails in any way closes
/// the connection, since a late reply could otherwise be read as the answer
/// to the next request.
pub struct Connection {
    id: u64,
    endpoint: Endpoint,
    transport: Box<dyn Transport>,
    state: ConnectionState,
    served: u64,
}

impl Connection {
    pub fn new(id: u64, endpoint: Endpoint, transport: Box<dyn Transport>) -> Self {
        Self {
            id,
            endpoint,
            transport,
            state: ConnectionState::Idle,
            served: 0,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Requests completed on this connection
    pub fn served(&self) -> u64 {
        self.served
    }

    /// Send one request frame and wait up to `timeout` for its reply
    pub async fn dispatch(&mut self, frame: Bytes, timeout: Duration) -> Result<Bytes, RpcError> {
        if let ConnectionState::Closed(reason) = &self.state {
            return Err(RpcError::ChannelClosed(format!(
                "connection {} to {} closed: {}",
                self.id, self.endpoint, reason
            )));
        }

        self.state = ConnectionState::Active;
        trace!(conn = self.id, host = %self.endpoint, "request sent");

        match tokio::time::timeout(timeout, exchange(self.transport.as_mut(), frame)).await {
            Ok(Ok(reply)) => {
                self.state = ConnectionState::Idle;
                self.served += 1;
                Ok(reply)
            }
            Ok(Err(e)) => {
                self.state = ConnectionState::Closed(e.to_string());
                // Peer dropped a reused idle connection before the request
                match e {
                    RpcError::ChannelClosed(reason) if self.served > 0 => Err(RpcError::Connect {
                        endpoint: self.endpoint.to_string(),
                        reason: format!("stale connection: {}", reason),
                    }),
                    other => Err(other),
                }
            }
            Err(_) => {
                self.state = ConnectionState::Closed("request timed out".to_string());
                Err(RpcError::Timeout(timeout))
            }
        }
    }

    /// Close the underlying transport
    pub async fn shutdown(&mut self) {
        if !matches!(self.state, ConnectionState::Closed(_)) {
            self.state = ConnectionState::Closed("closed by pool".to_string());
        }
        if let Err(e) = self.transport.close().await {
            debug!(conn = self.id, "error closing connection: {}", e);
        }
    }
}

async fn exchange(transport: &mut dyn Transport, frame: Bytes) -> Result<Bytes, RpcError> {
    transport.send(frame).await?;
    match transport.receive().await {
        Some(reply) => reply,
        None => Err(RpcError::ChannelClosed(format!(
            "{} closed the connection",
            transport.peer()
        ))),
    }
}

/// Opens connections to a single host for its pool
pub(crate) struct HostConnector {
    endpoint: Endpoint,
    connector: Arc<dyn Connector>,
    connect_timeout: Duration,
    stats: Arc<dyn StatsReceiver>,
    next_id: AtomicU64,
}

impl HostConnector {
    pub(crate) fn new(
        endpoint: Endpoint,
        connector: Arc<dyn Connector>,
        connect_timeout: Duration,
        stats: Arc<dyn StatsReceiver>,
    ) -> Self {
        Self {
            endpoint,
            connector,
            connect_timeout,
            stats,
            next_id: AtomicU64::new(1),
        }
    }
}

#[async_trait]
impl ConnectionFactory<Connection> for HostConnector {
    async fn create(&self) -> Result<Connection, RpcError> {
        let transport =
            connect_within(self.connector.as_ref(), &self.endpoint, self.connect_timeout).await?;
        self.stats.counter("connects", 1);

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(conn = id, host = %self.endpoint, "connection established");
        Ok(Connection::new(id, self.endpoint.clone(), transport))
    }

    async fn is_healthy(&self, conn: &Connection) -> bool {
        conn.state == ConnectionState::Idle
    }

    async fn close(&self, mut conn: Connection) {
        conn.shutdown().await;
    }
}
