//! Stock filters
//!
//! - [`LoggingFilter`]: logs each request and its outcome, passes both through
//! - [`TimeoutFilter`]: fails a call that takes longer than a bound
//! - [`StatsFilter`]: reports counters and latency to a `StatsReceiver`

mod logging;
mod stats;
mod timeout;

pub use logging::LoggingFilter;
pub use stats::{record_outcome, StatsFilter};
pub use timeout::TimeoutFilter;
