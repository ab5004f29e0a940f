use crate::service::{BoxService, Filter};
use relay_core_future::{Deferred, RpcError};
use std::time::Duration;

/// Fails calls that do not complete within a fixed bound
///
/// On timeout the underlying call is interrupted with the timeout error; the
/// service may or may not stop early.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutFilter {
    timeout: Duration,
}

impl TimeoutFilter {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl<Req, Rep> Filter<Req, Rep> for TimeoutFilter
where
    Rep: Clone + Send + 'static,
{
    fn apply(&self, request: Req, next: &BoxService<Req, Rep>) -> Deferred<Rep> {
        let call = next.apply(request);
        let bounded = call.within(self.timeout);
        bounded.on_failure(move |e| {
            if matches!(e, RpcError::Timeout(_)) {
                call.raise(e.clone());
            }
        });
        bounded
    }
}
