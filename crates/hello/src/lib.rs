//! Relay Hello - a sample service on the Relay RPC runtime
//!
//! Three calls:
//! - `hi`: an immediate greeting
//! - `add(a, b)`: an immediate sum
//! - `blocking_call`: CPU busy work run on a [`relay::WorkerPool`] so the
//!   server's connection tasks never block
//!
//! [`HelloService`] is the server side; [`HelloClient`] turns any
//! `Service<HelloRequest, HelloReply>` (normally a [`relay::Client`]) into
//! typed method calls.

pub mod client;
pub mod protocol;
pub mod service;

pub use client::HelloClient;
pub use protocol::{HelloCodec, HelloReply, HelloRequest};
pub use service::HelloService;
