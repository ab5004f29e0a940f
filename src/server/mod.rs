//! Server endpoint: binds a [`Service`](crate::service::Service) to a listening socket
//!
//! ```text
//!  accept ──► connection task ──► receive ─(read_timeout)─► decode ──► service.apply
//!                  ▲                                                        │
//!                  └──────────────── send reply ◄── encode ◄── await ◄──────┘
//! ```
//!
//! Each accepted connection gets its own task and handles one request at a
//! time. Connections never wait on each other, so a handler that blocks (for
//! instance one that waits on a [`WorkerPool`](crate::worker_pool::WorkerPool))
//! only holds up its own connection.
//!
//! A connection closes when no request arrives within `read_timeout`, when
//! the peer goes away, on I/O failure, on shutdown, or after an error reply
//! if the codec asks for it. Failed calls (decode errors and handler panics
//! included) are answered with the codec's error reply.

mod builder;
mod connection;

pub use builder::ServerBuilder;
pub use connection::{CloseReason, ConnectionHandler, ConnectionPhase};

use relay_core_future::Deferred;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::transport::FramedTransport;
use connection::Gauges;

/// Pause after a failed accept, e.g. when out of file descriptors
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// A running server
///
/// Dropping the server stops accepting and closes idle connections without
/// waiting; [`Server::close`] also waits for connections to finish.
pub struct Server {
    name: String,
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    gauges: Arc<Gauges>,
    close_service: Box<dyn Fn() -> Deferred<()> + Send + Sync>,
}

impl Server {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The bound address, with the real port when bound to port 0
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Connections currently open
    pub fn active_connections(&self) -> usize {
        self.gauges.connections()
    }

    pub fn peak_connections(&self) -> usize {
        self.gauges.peak_connections()
    }

    /// Requests currently being handled, across all connections
    pub fn active_requests(&self) -> usize {
        self.gauges.active_requests()
    }

    /// Stop accepting, close connections once their current request is
    /// answered, then close the service
    pub async fn close(&self) {
        info!("closing server {}", self.name);
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;

        if let Err(e) = (self.close_service)().await {
            warn!("server {}: service close failed: {}", self.name, e);
        }
        info!("server {} closed", self.name);
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("name", &self.name)
            .field("local_addr", &self.local_addr)
            .field("connections", &self.gauges.connections())
            .finish()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn accept_loop<Req, Rep>(
    listener: TcpListener,
    handler: Arc<ConnectionHandler<Req, Rep>>,
    max_frame_length: usize,
    shutdown: CancellationToken,
    tracker: TaskTracker,
) where
    Req: Send + 'static,
    Rep: Clone + Send + 'static,
{
    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        let (stream, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("accept failed: {}", e);
                tokio::time::sleep(ACCEPT_BACKOFF).await;
                continue;
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!(%peer, "set_nodelay failed: {}", e);
        }
        debug!(%peer, "connection accepted");

        let open = handler.gauges().open();
        let handler = handler.clone();
        let shutdown = shutdown.child_token();
        tracker.spawn(async move {
            let _open = open;
            let mut transport = FramedTransport::new(stream, peer.to_string(), max_frame_length);
            handler.serve(&mut transport, &shutdown).await;
        });
    }
    debug!("accept loop stopped");
}
