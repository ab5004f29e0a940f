//! Requests and replies of the Hello service

use relay::codec::JsonCodec;
use serde::{Deserialize, Serialize};

/// A call to the Hello service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum HelloRequest {
    /// Immediate greeting
    Hi,
    /// Immediate sum
    Add { a: i32, b: i32 },
    /// Busy work on the server's worker pool; a random whole number of
    /// seconds when `delay_ms` is absent
    BlockingCall {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        delay_ms: Option<u64>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HelloReply {
    Greeting(String),
    Sum(i32),
    /// Milliseconds of work done
    Blocked(u64),
}

pub type HelloCodec = JsonCodec<HelloRequest, HelloReply>;
