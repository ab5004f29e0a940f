/*!
 * Statistics hook for clients and servers
 *
 * Endpoints report counters (`requests`, `success`, `failures/<kind>`) and
 * timing samples (`request_latency_ms`) through a [`StatsReceiver`]. The
 * default receiver discards everything; [`SummarizingStatsReceiver`] keeps
 * them in memory and prints a percentile summary.
 */

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex, PoisonError};

/// Sink for call statistics
pub trait StatsReceiver: Send + Sync {
    /// Add `delta` to the counter `name`
    fn counter(&self, name: &str, delta: u64);

    /// Record one sample of the distribution `name`
    fn stat(&self, name: &str, value: f64);
}

/// Shared handle to a stats receiver
pub type SharedStats = Arc<dyn StatsReceiver>;

/// Receiver that drops everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullStatsReceiver;

impl StatsReceiver for NullStatsReceiver {
    fn counter(&self, _name: &str, _delta: u64) {}

    fn stat(&self, _name: &str, _value: f64) {}
}

/// Prefixes every name with `<scope>/` before forwarding
#[derive(Clone)]
pub struct ScopedStats {
    scope: String,
    inner: SharedStats,
}

impl ScopedStats {
    pub fn new(scope: impl Into<String>, inner: SharedStats) -> Self {
        Self {
            scope: scope.into(),
            inner,
        }
    }
}

impl StatsReceiver for ScopedStats {
    fn counter(&self, name: &str, delta: u64) {
        self.inner.counter(&format!("{}/{}", self.scope, name), delta);
    }

    fn stat(&self, name: &str, value: f64) {
        self.inner.stat(&format!("{}/{}", self.scope, name), value);
    }
}

/// Distribution summary of one stat
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub p50: f64,
    pub p90: f64,
    pub p99: f64,
}

#[derive(Default)]
struct Recorded {
    counters: BTreeMap<String, u64>,
    stats: BTreeMap<String, Vec<f64>>,
}

/// In-memory receiver with counters and percentile summaries
#[derive(Clone, Default)]
pub struct SummarizingStatsReceiver {
    recorded: Arc<Mutex<Recorded>>,
}

impl SummarizingStatsReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of a counter (0 if never incremented)
    pub fn counter_value(&self, name: &str) -> u64 {
        self.recorded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .counters
            .get(name)
            .copied()
            .unwrap_or(0)
    }

    /// Summary of a stat, if any samples were recorded
    pub fn stat_summary(&self, name: &str) -> Option<Summary> {
        let recorded = self.recorded.lock().unwrap_or_else(PoisonError::into_inner);
        let samples = recorded.stats.get(name)?;
        summarize(samples)
    }

    /// Human-readable report of every counter and stat
    pub fn summary(&self) -> String {
        let recorded = self.recorded.lock().unwrap_or_else(PoisonError::into_inner);
        let mut out = String::new();

        let _ = writeln!(out, "# counters");
        for (name, value) in &recorded.counters {
            let _ = writeln!(out, "{:<40} {}", name, value);
        }

        let _ = writeln!(out, "# stats");
        for (name, samples) in &recorded.stats {
            if let Some(s) = summarize(samples) {
                let _ = writeln!(
                    out,
                    "{:<40} n={} min={:.1} p50={:.1} p90={:.1} p99={:.1} max={:.1}",
                    name, s.count, s.min, s.p50, s.p90, s.p99, s.max
                );
            }
        }
        out
    }
}

impl StatsReceiver for SummarizingStatsReceiver {
    fn counter(&self, name: &str, delta: u64) {
        let mut recorded = self.recorded.lock().unwrap_or_else(PoisonError::into_inner);
        *recorded.counters.entry(name.to_string()).or_insert(0) += delta;
    }

    fn stat(&self, name: &str, value: f64) {
        let mut recorded = self.recorded.lock().unwrap_or_else(PoisonError::into_inner);
        recorded
            .stats
            .entry(name.to_string())
            .or_default()
            .push(value);
    }
}

fn summarize(samples: &[f64]) -> Option<Summary> {
    if samples.is_empty() {
        return None;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let percentile = |p: f64| {
        let rank = ((p / 100.0) * (sorted.len() - 1) as f64).round() as usize;
        sorted[rank.min(sorted.len() - 1)]
    };

    Some(Summary {
        count: sorted.len(),
        min: sorted[0],
        max: sorted[sorted.len() - 1],
        p50: percentile(50.0),
        p90: percentile(90.0),
        p99: percentile(99.0),
    })
}
