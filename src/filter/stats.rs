use crate::service::{BoxService, Filter};
use crate::stats::SharedStats;
use relay_core_future::{Deferred, RpcError};
use std::time::{Duration, Instant};

/// Reports `requests`, `success`, `failures/<kind>` and `request_latency_ms`
#[derive(Clone)]
pub struct StatsFilter {
    stats: SharedStats,
}

impl StatsFilter {
    pub fn new(stats: SharedStats) -> Self {
        Self { stats }
    }
}

impl<Req, Rep> Filter<Req, Rep> for StatsFilter
where
    Rep: Clone + Send + 'static,
{
    fn apply(&self, request: Req, next: &BoxService<Req, Rep>) -> Deferred<Rep> {
        let started = Instant::now();
        self.stats.counter("requests", 1);

        let reply = next.apply(request);
        let stats = self.stats.clone();
        reply.respond(move |result| record_outcome(&*stats, result, started.elapsed()));
        reply
    }
}

/// Count one finished call and its latency
pub fn record_outcome<T>(
    stats: &dyn crate::stats::StatsReceiver,
    result: &Result<T, RpcError>,
    elapsed: Duration,
) {
    match result {
        Ok(_) => stats.counter("success", 1),
        Err(e) => stats.counter(&format!("failures/{}", e.kind()), 1),
    }
    stats.stat("request_latency_ms", elapsed.as_secs_f64() * 1000.0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{service_fn, FilterExt, Service};
    use crate::stats::SummarizingStatsReceiver;
    use std::sync::Arc;

    #[test]
    fn test_counts_success_and_failure_kinds() {
        let receiver = SummarizingStatsReceiver::new();
        let svc = StatsFilter::new(Arc::new(receiver.clone())).and_then(service_fn(|ok: bool| {
            if ok {
                Deferred::value(())
            } else {
                Deferred::exception(RpcError::Timeout(Duration::from_millis(1)))
            }
        }));

        svc.apply(true);
        svc.apply(true);
        svc.apply(false);

        assert_eq!(receiver.counter_value("requests"), 3);
        assert_eq!(receiver.counter_value("success"), 2);
        assert_eq!(receiver.counter_value("failures/timeout"), 1);
        assert_eq!(
            receiver.stat_summary("request_latency_ms").unwrap().count,
            3
        );
    }
}
