/*!
 * Frame transport
 *
 * A [`Transport`] moves whole frames over one connection. [`FramedTransport`]
 * implements it for any byte stream with a 4-byte big-endian length prefix,
 * so the same server loop runs over TCP sockets and in-memory pipes alike.
 */

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use relay_core_future::RpcError;
use std::fmt;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::debug;

/// Default bound on a single frame
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 8 * 1024 * 1024;

/// Sends and receives whole frames over one connection
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&mut self, frame: Bytes) -> Result<(), RpcError>;

    /// Next frame; `None` once the peer has closed
    async fn receive(&mut self) -> Option<Result<Bytes, RpcError>>;

    async fn close(&mut self) -> Result<(), RpcError>;

    /// Peer description for logs
    fn peer(&self) -> &str;
}

/// Length-prefixed frames over a byte stream
pub struct FramedTransport<IO> {
    framed: Framed<IO, LengthDelimitedCodec>,
    peer: String,
}

impl<IO> FramedTransport<IO>
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(io: IO, peer: impl Into<String>, max_frame_length: usize) -> Self {
        let codec = LengthDelimitedCodec::builder()
            .length_field_length(4)
            .big_endian()
            .max_frame_length(max_frame_length)
            .new_codec();
        Self {
            framed: Framed::new(io, codec),
            peer: peer.into(),
        }
    }

    fn io_error(&self, e: io::Error) -> RpcError {
        if e.kind() == io::ErrorKind::InvalidData {
            RpcError::Codec(format!("{}: {}", self.peer, e))
        } else {
            RpcError::ChannelClosed(format!("{}: {}", self.peer, e))
        }
    }
}

#[async_trait]
impl<IO> Transport for FramedTransport<IO>
where
    IO: AsyncRead + AsyncWrite + Unpin + Send + Sync,
{
    async fn send(&mut self, frame: Bytes) -> Result<(), RpcError> {
        let sent = self.framed.send(frame).await;
        sent.map_err(|e| self.io_error(e))
    }

    async fn receive(&mut self) -> Option<Result<Bytes, RpcError>> {
        let next = self.framed.next().await?;
        Some(next.map(|frame| frame.freeze()).map_err(|e| self.io_error(e)))
    }

    async fn close(&mut self) -> Result<(), RpcError> {
        let closed = SinkExt::<Bytes>::close(&mut self.framed).await;
        closed.map_err(|e| self.io_error(e))
    }

    fn peer(&self) -> &str {
        &self.peer
    }
}

/// A remote address, as `host:port`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint(String);

impl Endpoint {
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Endpoint {
    fn from(addr: &str) -> Self {
        Self::new(addr)
    }
}

/// Opens transports to endpoints
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Transport>, RpcError>;
}

/// Plain TCP with length-prefixed framing
#[derive(Debug, Clone)]
pub struct TcpConnector {
    max_frame_length: usize,
    nodelay: bool,
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self {
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
            nodelay: true,
        }
    }
}

impl TcpConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_frame_length(mut self, max: usize) -> Self {
        self.max_frame_length = max;
        self
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Transport>, RpcError> {
        let connect_failure = |reason: String| RpcError::Connect {
            endpoint: endpoint.to_string(),
            reason,
        };

        let stream = TcpStream::connect(endpoint.as_str())
            .await
            .map_err(|e| connect_failure(e.to_string()))?;
        stream
            .set_nodelay(self.nodelay)
            .map_err(|e| connect_failure(e.to_string()))?;

        debug!("connected to {}", endpoint);
        Ok(Box::new(FramedTransport::new(
            stream,
            endpoint.to_string(),
            self.max_frame_length,
        )))
    }
}

/// Connect with a deadline; a timeout is a connect failure
pub async fn connect_within(
    connector: &dyn Connector,
    endpoint: &Endpoint,
    timeout: Duration,
) -> Result<Box<dyn Transport>, RpcError> {
    match tokio::time::timeout(timeout, connector.connect(endpoint)).await {
        Ok(result) => result,
        Err(_) => Err(RpcError::Connect {
            endpoint: endpoint.to_string(),
            reason: format!("connect timed out after {:?}", timeout),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_frames_over_duplex() {
        let (a, b) = tokio::io::duplex(1024);
        let mut left = FramedTransport::new(a, "left", 64);
        let mut right = FramedTransport::new(b, "right", 64);

        left.send(Bytes::from_static(b"hello")).await.unwrap();
        left.send(Bytes::from_static(b"")).await.unwrap();

        assert_eq!(&right.receive().await.unwrap().unwrap()[..], b"hello");
        assert!(right.receive().await.unwrap().unwrap().is_empty());

        left.close().await.unwrap();
        drop(left);
        assert!(right.receive().await.is_none());
    }

    #[tokio::test]
    async fn test_oversized_frame_is_codec_error() {
        let (a, b) = tokio::io::duplex(1024);
        let mut left = FramedTransport::new(a, "left", 256);
        let mut right = FramedTransport::new(b, "right", 8);

        left.send(Bytes::from(vec![0u8; 32])).await.unwrap();
        assert!(matches!(
            right.receive().await,
            Some(Err(RpcError::Codec(_)))
        ));
    }

    #[tokio::test]
    async fn test_tcp_connector() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (stream, peer) = listener.accept().await.unwrap();
            let mut transport = FramedTransport::new(stream, peer.to_string(), 1024);
            let frame = transport.receive().await.unwrap().unwrap();
            transport.send(frame).await.unwrap();
        });

        let connector = TcpConnector::new();
        let endpoint = Endpoint::new(addr.to_string());
        let mut transport = connect_within(&connector, &endpoint, Duration::from_secs(1))
            .await
            .unwrap();
        transport.send(Bytes::from_static(b"ping")).await.unwrap();
        assert_eq!(&transport.receive().await.unwrap().unwrap()[..], b"ping");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_refused_connection_is_connect_failure() {
        // Bind then drop to find a port nobody listens on
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };

        let result = TcpConnector::new()
            .connect(&Endpoint::new(addr.to_string()))
            .await;
        assert!(matches!(result, Err(RpcError::Connect { .. })));
    }
}
