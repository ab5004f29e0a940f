//! Typed client for the Hello service

use relay::service::Service;
use relay::{Deferred, RpcError};
use std::time::Duration;

use crate::protocol::{HelloReply, HelloRequest};

/// Method-per-call view over any `Service<HelloRequest, HelloReply>`
///
/// Usually wraps a [`relay::Client`], possibly behind filters.
pub struct HelloClient<S> {
    service: S,
}

fn unexpected(reply: HelloReply) -> RpcError {
    RpcError::Codec(format!("unexpected reply: {:?}", reply))
}

impl<S> HelloClient<S>
where
    S: Service<HelloRequest, HelloReply>,
{
    pub fn new(service: S) -> Self {
        Self { service }
    }

    pub fn hi(&self) -> Deferred<String> {
        self.service.apply(HelloRequest::Hi).transform(
            |reply| match reply {
                HelloReply::Greeting(text) => Ok(text),
                other => Err(unexpected(other)),
            },
            Err,
        )
    }

    pub fn add(&self, a: i32, b: i32) -> Deferred<i32> {
        self.service.apply(HelloRequest::Add { a, b }).transform(
            |reply| match reply {
                HelloReply::Sum(sum) => Ok(sum),
                other => Err(unexpected(other)),
            },
            Err,
        )
    }

    /// Ask for busy work of a server-chosen length
    pub fn blocking_call(&self) -> Deferred<u64> {
        self.blocking(None)
    }

    /// Ask for busy work of a given length
    pub fn blocking_call_for(&self, delay: Duration) -> Deferred<u64> {
        self.blocking(Some(delay.as_millis() as u64))
    }

    fn blocking(&self, delay_ms: Option<u64>) -> Deferred<u64> {
        self.service
            .apply(HelloRequest::BlockingCall { delay_ms })
            .transform(
                |reply| match reply {
                    HelloReply::Blocked(ms) => Ok(ms),
                    other => Err(unexpected(other)),
                },
                Err,
            )
    }

    pub fn close(&self) -> Deferred<()> {
        self.service.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay::service::service_fn;

    #[test]
    fn test_replies_unwrap_to_values() {
        let client = HelloClient::new(service_fn(|request: HelloRequest| {
            Deferred::value(match request {
                HelloRequest::Hi => HelloReply::Greeting("hello".into()),
                HelloRequest::Add { a, b } => HelloReply::Sum(a + b),
                HelloRequest::BlockingCall { delay_ms } => {
                    HelloReply::Blocked(delay_ms.unwrap_or(0))
                }
            })
        }));

        assert_eq!(client.hi().poll().unwrap().unwrap(), "hello");
        assert_eq!(client.add(2, 3).poll().unwrap().unwrap(), 5);
        assert_eq!(
            client
                .blocking_call_for(Duration::from_millis(7))
                .poll()
                .unwrap()
                .unwrap(),
            7
        );
    }

    #[test]
    fn test_mismatched_reply_is_codec_error() {
        let client = HelloClient::new(service_fn(|_: HelloRequest| {
            Deferred::value(HelloReply::Sum(1))
        }));
        assert!(matches!(client.hi().poll(), Some(Err(RpcError::Codec(_)))));
    }
}
