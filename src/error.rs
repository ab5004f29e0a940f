/*!
 * Error types for Relay
 *
 * Call-time failures travel inside a `Deferred` as [`RpcError`]. Failures to
 * assemble a client or server from its builder are reported synchronously as
 * [`BuildError`].
 */

use std::io;
use thiserror::Error;

pub use relay_core_future::RpcError;

pub type Result<T> = std::result::Result<T, BuildError>;

/// Reasons a client, server or worker pool could not be built
#[derive(Debug, Error)]
pub enum BuildError {
    /// A required builder option was never set
    #[error("missing required option `{0}`")]
    Missing(&'static str),

    /// An option was set to an unusable value
    #[error("invalid value for `{option}`: {reason}")]
    Invalid { option: &'static str, reason: String },

    /// The listening socket could not be bound
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// No async runtime was available and one could not be started
    #[error("failed to start runtime: {0}")]
    Runtime(#[source] io::Error),

    /// Configuration could not be loaded
    #[error("configuration error: {0}")]
    Config(String),
}

impl BuildError {
    pub(crate) fn invalid(option: &'static str, reason: impl Into<String>) -> Self {
        BuildError::Invalid {
            option,
            reason: reason.into(),
        }
    }
}

impl From<toml::de::Error> for BuildError {
    fn from(err: toml::de::Error) -> Self {
        BuildError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BuildError::Missing("hosts");
        assert_eq!(err.to_string(), "missing required option `hosts`");

        let err = BuildError::invalid("host_connection_limit", "must be at least 1");
        assert_eq!(
            err.to_string(),
            "invalid value for `host_connection_limit`: must be at least 1"
        );
    }

    #[test]
    fn test_bind_error_keeps_source() {
        use std::error::Error as _;

        let err = BuildError::Bind {
            addr: "127.0.0.1:1".to_string(),
            source: io::Error::new(io::ErrorKind::AddrInUse, "in use"),
        };
        assert!(err.to_string().starts_with("failed to bind 127.0.0.1:1"));
        assert!(err.source().is_some());
    }
}
