//! Relay Core Future: deferred results for an RPC runtime
//!
//! # Overview
//!
//! - **Deferred / Promise**: a write-once result with listeners, combinators
//!   (`map`, `flat_map`, `transform`, `rescue`), blocking `get` and `within`
//! - **Timer**: the deadline thread behind `within`
//! - **join_all / collect**: completion-counter joins over many deferreds
//! - **RpcError**: the failure taxonomy every Relay layer reports through
//!
//! # Example
//!
//! ```
//! use relay_core_future::{Deferred, Promise, RpcError};
//! use std::time::Duration;
//!
//! let promise = Promise::new();
//! let doubled: Deferred<u32> = promise.deferred().map(|v: u32| v * 2);
//!
//! doubled.add_listener(
//!     |value| println!("got {}", value),
//!     |error: &RpcError| println!("failed: {}", error),
//! );
//!
//! promise.succeed(21);
//! assert_eq!(doubled.get(Duration::from_secs(1)).unwrap(), 42);
//! ```

pub mod deferred;
pub mod error;
pub mod join;
pub mod timer;

pub use deferred::{Deferred, Promise};
pub use error::{Cause, RpcError};
pub use join::{collect, join_all};
pub use timer::{Timer, TimerTask};
