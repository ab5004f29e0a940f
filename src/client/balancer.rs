use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::config::LoadBalancerKind;

/// Picks the host for the first attempt of each call
#[derive(Debug)]
pub(crate) struct Balancer {
    kind: LoadBalancerKind,
    next: AtomicUsize,
}

impl Balancer {
    pub(crate) fn new(kind: LoadBalancerKind) -> Self {
        Self {
            kind,
            next: AtomicUsize::new(0),
        }
    }

    /// Index of the chosen host given each host's outstanding requests
    pub(crate) fn pick(&self, loads: &[usize]) -> usize {
        let n = loads.len();
        if n <= 1 {
            return 0;
        }

        match self.kind {
            LoadBalancerKind::RoundRobin => self.next.fetch_add(1, Ordering::Relaxed) % n,
            LoadBalancerKind::LeastLoaded => {
                // Random starting point spreads ties
                let start = rand::rng().random_range(0..n);
                (0..n)
                    .map(|i| (start + i) % n)
                    .min_by_key(|&i| loads[i])
                    .unwrap_or(start)
            }
        }
    }
}
