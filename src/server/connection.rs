use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::codec::ServerCodec;
use crate::filter::record_outcome;
use crate::service::{guarded, BoxService};
use crate::stats::SharedStats;
use crate::transport::Transport;

/// Why a server connection was closed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// No request arrived within the read timeout
    ReadTimeout,
    /// The client closed its end
    PeerClosed,
    /// Reading, writing or framing failed
    Io(String),
    /// The server is shutting down
    Shutdown,
    /// The codec requires closing after an error reply
    CodecMandated,
}

impl CloseReason {
    /// Stable label for stats
    pub fn label(&self) -> &'static str {
        match self {
            CloseReason::ReadTimeout => "read_timeout",
            CloseReason::PeerClosed => "peer_closed",
            CloseReason::Io(_) => "io",
            CloseReason::Shutdown => "shutdown",
            CloseReason::CodecMandated => "codec_mandated",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::ReadTimeout => f.write_str("read timeout"),
            CloseReason::PeerClosed => f.write_str("closed by peer"),
            CloseReason::Io(reason) => write!(f, "i/o error: {}", reason),
            CloseReason::Shutdown => f.write_str("server shutdown"),
            CloseReason::CodecMandated => f.write_str("closed after error reply"),
        }
    }
}

/// Lifecycle of one server connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// Waiting for the next request
    Idle,
    /// A request is being handled
    Active,
    Closed(CloseReason),
}

/// Live connection and request counts for a server
#[derive(Debug, Default)]
pub(crate) struct Gauges {
    connections: AtomicUsize,
    peak_connections: AtomicUsize,
    active_requests: AtomicUsize,
}

impl Gauges {
    pub(crate) fn connections(&self) -> usize {
        self.connections.load(Ordering::Acquire)
    }

    pub(crate) fn peak_connections(&self) -> usize {
        self.peak_connections.load(Ordering::Acquire)
    }

    pub(crate) fn active_requests(&self) -> usize {
        self.active_requests.load(Ordering::Acquire)
    }

    pub(crate) fn open(self: &Arc<Self>) -> OpenConnection {
        let now = self.connections.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak_connections.fetch_max(now, Ordering::AcqRel);
        OpenConnection(self.clone())
    }
}

/// Holds a connection in the gauges until dropped
pub(crate) struct OpenConnection(Arc<Gauges>);

impl Drop for OpenConnection {
    fn drop(&mut self) {
        self.0.connections.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Serves requests on one connection at a time
///
/// Shared by every connection of a server; each connection runs
/// [`ConnectionHandler::serve`] on its own task.
pub struct ConnectionHandler<Req, Rep> {
    server: String,
    service: BoxService<Req, Rep>,
    codec: Arc<dyn ServerCodec<Req, Rep>>,
    read_timeout: Duration,
    stats: SharedStats,
    gauges: Arc<Gauges>,
}

impl<Req, Rep> ConnectionHandler<Req, Rep>
where
    Req: Send + 'static,
    Rep: Clone + Send + 'static,
{
    pub fn new(
        server: impl Into<String>,
        service: BoxService<Req, Rep>,
        codec: Arc<dyn ServerCodec<Req, Rep>>,
        read_timeout: Duration,
        stats: SharedStats,
    ) -> Self {
        Self {
            server: server.into(),
            service,
            codec,
            read_timeout,
            stats,
            gauges: Arc::new(Gauges::default()),
        }
    }

    pub(crate) fn gauges(&self) -> &Arc<Gauges> {
        &self.gauges
    }

    pub(crate) fn service(&self) -> &BoxService<Req, Rep> {
        &self.service
    }

    /// Run the request/reply cycle until the connection closes
    ///
    /// A request that is already being handled when `shutdown` fires is
    /// completed and answered before the connection closes.
    pub async fn serve<T>(&self, transport: &mut T, shutdown: &CancellationToken) -> CloseReason
    where
        T: Transport + ?Sized,
    {
        let mut phase = ConnectionPhase::Idle;
        let mut served = 0u64;

        let reason = loop {
            let frame = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break CloseReason::Shutdown,
                next = tokio::time::timeout(self.read_timeout, transport.receive()) => match next {
                    Err(_) => break CloseReason::ReadTimeout,
                    Ok(None) => break CloseReason::PeerClosed,
                    Ok(Some(Err(e))) => break CloseReason::Io(e.to_string()),
                    Ok(Some(Ok(frame))) => frame,
                },
            };

            phase = ConnectionPhase::Active;
            trace!(server = %self.server, peer = transport.peer(), ?phase, "request received");
            self.gauges.active_requests.fetch_add(1, Ordering::AcqRel);
            self.stats.counter("requests", 1);
            let started = Instant::now();

            let result = match self.codec.decode_request(&frame) {
                Ok(request) => guarded(|| self.service.apply(request)).await,
                Err(e) => Err(e),
            };
            self.gauges.active_requests.fetch_sub(1, Ordering::AcqRel);
            record_outcome(self.stats.as_ref(), &result, started.elapsed());

            if let Err(e) = &result {
                debug!(server = %self.server, peer = transport.peer(), "replying with error: {}", e);
            }
            let reply = match self.codec.encode_response(&result) {
                Ok(reply) => reply,
                Err(e) => break CloseReason::Io(e.to_string()),
            };
            if let Err(e) = transport.send(reply).await {
                break CloseReason::Io(e.to_string());
            }
            served += 1;

            if result.is_err() && self.codec.close_on_error() {
                break CloseReason::CodecMandated;
            }
            phase = ConnectionPhase::Idle;
        };

        if let Err(e) = transport.close().await {
            trace!(peer = transport.peer(), "close after {}: {}", reason, e);
        }
        self.stats.counter(&format!("closes/{}", reason.label()), 1);
        let was = std::mem::replace(&mut phase, ConnectionPhase::Closed(reason.clone()));

        match &reason {
            CloseReason::Io(_) => warn!(
                server = %self.server,
                peer = transport.peer(),
                "connection closed after {} request(s): {}",
                served,
                reason
            ),
            _ => debug!(
                server = %self.server,
                peer = transport.peer(),
                ?was,
                ?phase,
                "connection closed after {} request(s): {}",
                served,
                reason
            ),
        }
        reason
    }
}

impl<Req, Rep> fmt::Debug for ConnectionHandler<Req, Rep> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandler")
            .field("server", &self.server)
            .field("read_timeout", &self.read_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{ClientCodec, JsonCodec};
    use crate::service::service_fn;
    use crate::stats::{NullStatsReceiver, SummarizingStatsReceiver};
    use crate::transport::FramedTransport;
    use bytes::Bytes;
    use relay_core_future::{Deferred, RpcError};

    type Codec = JsonCodec<i32, i32>;

    fn handler(read_timeout: Duration, codec: Codec) -> ConnectionHandler<i32, i32> {
        let service = service_fn(|n: i32| {
            if n < 0 {
                Deferred::exception(RpcError::application("negative"))
            } else if n == 13 {
                panic!("unlucky")
            } else {
                Deferred::value(n * 2)
            }
        });
        ConnectionHandler::new(
            "test",
            Arc::new(service),
            Arc::new(codec),
            read_timeout,
            Arc::new(NullStatsReceiver),
        )
    }

    fn pipe() -> (
        FramedTransport<tokio::io::DuplexStream>,
        FramedTransport<tokio::io::DuplexStream>,
    ) {
        let (a, b) = tokio::io::duplex(4096);
        (
            FramedTransport::new(a, "client", 1024),
            FramedTransport::new(b, "server", 1024),
        )
    }

    async fn call(client: &mut FramedTransport<tokio::io::DuplexStream>, n: i32) -> Result<i32, RpcError> {
        let codec = Codec::new();
        client.send(codec.encode_request(&n).unwrap()).await.unwrap();
        let reply = client.receive().await.unwrap().unwrap();
        codec.decode_response(&reply)
    }

    #[tokio::test]
    async fn test_serves_until_peer_closes() {
        let handler = handler(Duration::from_secs(5), Codec::new());
        let (mut client, mut server) = pipe();
        let token = CancellationToken::new();

        let served = tokio::spawn(async move { handler.serve(&mut server, &token).await });

        assert_eq!(call(&mut client, 1).await.unwrap(), 2);
        assert_eq!(call(&mut client, 21).await.unwrap(), 42);
        drop(client);

        assert_eq!(served.await.unwrap(), CloseReason::PeerClosed);
    }

    #[tokio::test]
    async fn test_errors_keep_connection_open() {
        let handler = handler(Duration::from_secs(5), Codec::new());
        let (mut client, mut server) = pipe();
        let token = CancellationToken::new();
        let served = tokio::spawn(async move { handler.serve(&mut server, &token).await });

        let err = call(&mut client, -1).await.unwrap_err();
        assert!(err.to_string().contains("negative"));

        let err = call(&mut client, 13).await.unwrap_err();
        assert!(err.to_string().contains("unlucky"));

        client.send(Bytes::from_static(b"garbage")).await.unwrap();
        let reply = client.receive().await.unwrap().unwrap();
        assert!(Codec::new().decode_response(&reply).is_err());

        assert_eq!(call(&mut client, 4).await.unwrap(), 8);
        drop(client);
        assert_eq!(served.await.unwrap(), CloseReason::PeerClosed);
    }

    #[tokio::test]
    async fn test_close_on_error_codec() {
        let handler = handler(Duration::from_secs(5), Codec::new().closing_on_error());
        let (mut client, mut server) = pipe();
        let token = CancellationToken::new();
        let served = tokio::spawn(async move { handler.serve(&mut server, &token).await });

        assert!(call(&mut client, -1).await.is_err());
        assert_eq!(served.await.unwrap(), CloseReason::CodecMandated);
        assert!(client.receive().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_connection_times_out() {
        let handler = handler(Duration::from_secs(2), Codec::new());
        let (mut client, mut server) = pipe();
        let token = CancellationToken::new();
        let served = tokio::spawn(async move { handler.serve(&mut server, &token).await });

        assert_eq!(call(&mut client, 5).await.unwrap(), 10);
        assert_eq!(served.await.unwrap(), CloseReason::ReadTimeout);
    }

    #[tokio::test]
    async fn test_shutdown_closes_idle_connection() {
        let handler = handler(Duration::from_secs(60), Codec::new());
        let (_client, mut server) = pipe();
        let token = CancellationToken::new();
        let trigger = token.clone();
        let served = tokio::spawn(async move { handler.serve(&mut server, &token).await });

        trigger.cancel();
        assert_eq!(served.await.unwrap(), CloseReason::Shutdown);
    }

    #[tokio::test]
    async fn test_reports_requests_and_closes() {
        let stats = SummarizingStatsReceiver::new();
        let service = service_fn(|n: i32| Deferred::value(n));
        let handler = ConnectionHandler::new(
            "test",
            Arc::new(service),
            Arc::new(Codec::new()),
            Duration::from_secs(5),
            Arc::new(stats.clone()),
        );
        let (mut client, mut server) = pipe();
        let token = CancellationToken::new();
        let served = tokio::spawn(async move { handler.serve(&mut server, &token).await });

        call(&mut client, 1).await.unwrap();
        drop(client);
        served.await.unwrap();

        assert_eq!(stats.counter_value("requests"), 1);
        assert_eq!(stats.counter_value("success"), 1);
        assert_eq!(stats.counter_value("closes/peer_closed"), 1);
    }
}
