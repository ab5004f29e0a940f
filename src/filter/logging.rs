use crate::service::{BoxService, Filter};
use relay_core_future::Deferred;
use std::fmt::Debug;
use tracing::{debug, warn};

/// Logs requests, replies and failures without altering them
#[derive(Debug, Clone)]
pub struct LoggingFilter {
    name: String,
}

impl LoggingFilter {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl<Req, Rep> Filter<Req, Rep> for LoggingFilter
where
    Req: Debug,
    Rep: Debug + Clone + Send + 'static,
{
    fn apply(&self, request: Req, next: &BoxService<Req, Rep>) -> Deferred<Rep> {
        debug!(service = %self.name, "request: {:?}", request);

        let reply = next.apply(request);
        let name = self.name.clone();
        reply.respond(move |result| match result {
            Ok(value) => debug!(service = %name, "reply: {:?}", value),
            Err(e) => warn!(service = %name, kind = e.kind(), "failure: {}", e),
        });
        reply
    }
}
