/*!
 * Request and reply encoding
 *
 * Codecs turn typed requests and replies into frame payloads and back.
 * Framing itself (length prefixes) belongs to the transport.
 *
 * [`JsonCodec`] is the stock codec. A reply travels in an envelope so that a
 * failure on the server reaches the client as a failure:
 *
 * ```text
 * {"ok": <reply>}
 * {"error": {"kind": "application", "message": "..."}}
 * ```
 */

use bytes::Bytes;
use relay_core_future::RpcError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;

/// Client half of a codec
pub trait ClientCodec<Req, Rep>: Send + Sync {
    fn encode_request(&self, request: &Req) -> Result<Bytes, RpcError>;

    /// Decode a reply frame; a remote failure decodes to `Err`
    fn decode_response(&self, frame: &[u8]) -> Result<Rep, RpcError>;
}

/// Server half of a codec
pub trait ServerCodec<Req, Rep>: Send + Sync {
    fn decode_request(&self, frame: &[u8]) -> Result<Req, RpcError>;

    fn encode_response(&self, reply: &Result<Rep, RpcError>) -> Result<Bytes, RpcError>;

    /// Whether the connection must close after a failed reply
    fn close_on_error(&self) -> bool {
        false
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Envelope<T> {
    Ok(T),
    Error(RemoteError),
}

#[derive(Debug, Serialize, Deserialize)]
struct RemoteError {
    kind: String,
    message: String,
}

/// JSON codec for any serde request and reply types
pub struct JsonCodec<Req, Rep> {
    close_on_error: bool,
    _types: PhantomData<fn(Req) -> Rep>,
}

impl<Req, Rep> JsonCodec<Req, Rep> {
    pub fn new() -> Self {
        Self {
            close_on_error: false,
            _types: PhantomData,
        }
    }

    /// Close server connections after sending an error reply
    pub fn closing_on_error(mut self) -> Self {
        self.close_on_error = true;
        self
    }
}

impl<Req, Rep> Default for JsonCodec<Req, Rep> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Req, Rep> Clone for JsonCodec<Req, Rep> {
    fn clone(&self) -> Self {
        Self {
            close_on_error: self.close_on_error,
            _types: PhantomData,
        }
    }
}

impl<Req, Rep> ClientCodec<Req, Rep> for JsonCodec<Req, Rep>
where
    Req: Serialize,
    Rep: DeserializeOwned,
{
    fn encode_request(&self, request: &Req) -> Result<Bytes, RpcError> {
        serde_json::to_vec(request)
            .map(Bytes::from)
            .map_err(|e| RpcError::Codec(format!("encode request: {}", e)))
    }

    fn decode_response(&self, frame: &[u8]) -> Result<Rep, RpcError> {
        let envelope: Envelope<Rep> = serde_json::from_slice(frame)
            .map_err(|e| RpcError::Codec(format!("decode reply: {}", e)))?;
        match envelope {
            Envelope::Ok(reply) => Ok(reply),
            Envelope::Error(remote) => Err(RpcError::application(format!(
                "remote {} error: {}",
                remote.kind, remote.message
            ))),
        }
    }
}

impl<Req, Rep> ServerCodec<Req, Rep> for JsonCodec<Req, Rep>
where
    Req: DeserializeOwned,
    Rep: Serialize,
{
    fn decode_request(&self, frame: &[u8]) -> Result<Req, RpcError> {
        serde_json::from_slice(frame).map_err(|e| RpcError::Codec(format!("decode request: {}", e)))
    }

    fn encode_response(&self, reply: &Result<Rep, RpcError>) -> Result<Bytes, RpcError> {
        let envelope = match reply {
            Ok(value) => Envelope::Ok(value),
            Err(e) => Envelope::Error(RemoteError {
                kind: e.kind().to_string(),
                message: e.to_string(),
            }),
        };
        serde_json::to_vec(&envelope)
            .map(Bytes::from)
            .map_err(|e| RpcError::Codec(format!("encode reply: {}", e)))
    }

    fn close_on_error(&self) -> bool {
        self.close_on_error
    }
}
