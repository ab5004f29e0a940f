//! Error taxonomy shared by every layer of Relay
//!
//! A `Deferred` fails with exactly one of these variants. Clients use
//! [`RpcError::is_transient`] to decide whether a call may be retried.

use std::any::Any;
use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Shared, cloneable error cause
pub type Cause = Arc<dyn StdError + Send + Sync + 'static>;

/// Errors carried by a failed `Deferred`
#[derive(Debug, Clone, Error)]
pub enum RpcError {
    /// Could not acquire or establish a connection in time
    #[error("connect failure to {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },

    /// A request (or a wait) exceeded its timeout
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The handler logic itself failed
    #[error("application error: {message}")]
    Application {
        message: String,
        #[source]
        cause: Option<Cause>,
    },

    /// A bounded queue refused more work
    #[error("{resource} exhausted (capacity {capacity})")]
    PoolExhausted { resource: String, capacity: usize },

    /// Interest in the result was withdrawn
    #[error("cancelled")]
    Cancelled,

    /// The completer went away without producing a result
    #[error("promise dropped without a result")]
    BrokenPromise,

    /// A frame could not be encoded or decoded
    #[error("codec error: {0}")]
    Codec(String),

    /// The channel closed while a request was in flight
    #[error("channel closed: {0}")]
    ChannelClosed(String),
}

impl RpcError {
    /// Build an application error from a message
    pub fn application(message: impl Into<String>) -> Self {
        RpcError::Application {
            message: message.into(),
            cause: None,
        }
    }

    /// Wrap an arbitrary error as an application error, keeping it as the cause
    pub fn from_cause<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        RpcError::Application {
            message: err.to_string(),
            cause: Some(Arc::new(err)),
        }
    }

    /// Convert a caught panic payload into an application error
    pub fn panicked(payload: Box<dyn Any + Send>) -> Self {
        let detail = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        RpcError::application(format!("panicked: {}", detail))
    }

    /// Connect and timeout failures may be retried; everything else may not
    pub fn is_transient(&self) -> bool {
        matches!(self, RpcError::Connect { .. } | RpcError::Timeout(_))
    }

    /// Stable label used for stats names and the wire error envelope
    pub fn kind(&self) -> &'static str {
        match self {
            RpcError::Connect { .. } => "connect",
            RpcError::Timeout(_) => "timeout",
            RpcError::Application { .. } => "application",
            RpcError::PoolExhausted { .. } => "pool_exhausted",
            RpcError::Cancelled => "cancelled",
            RpcError::BrokenPromise => "broken_promise",
            RpcError::Codec(_) => "codec",
            RpcError::ChannelClosed(_) => "channel_closed",
        }
    }
}
