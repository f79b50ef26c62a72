//! Scoped timers that record into the tracking context.

use std::future::Future;
use std::time::{Duration, Instant};

use tracing::trace;

use crate::tracking::context::TrackingContext;

/// Whole milliseconds in `duration`, saturating.
#[must_use]
pub fn as_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Measures the time between creation and drop and records it, in
/// milliseconds, under `key` in the context's `tracking_data`.
///
/// The guard may be held across `.await` points and also records when the
/// scope is left by an early return or a panic.
///
/// ```
/// use matomo_middleware::tracking::{PerfMsTracker, TrackingContext};
///
/// let context = TrackingContext::default();
/// {
///     let _timer = PerfMsTracker::start(&context, "pf_srv");
///     // fetch or compute data
/// }
/// assert!(context.snapshot().tracking_data.get("pf_srv").is_some());
/// ```
#[derive(Debug)]
#[must_use = "the timer records when dropped"]
pub struct PerfMsTracker {
    context: TrackingContext,
    key: String,
    start: Instant,
}

impl PerfMsTracker {
    /// Start timing.
    pub fn start(context: &TrackingContext, key: impl Into<String>) -> Self {
        Self {
            context: context.clone(),
            key: key.into(),
            start: Instant::now(),
        }
    }

    /// Time elapsed so far.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for PerfMsTracker {
    fn drop(&mut self) {
        let elapsed_ms = as_millis(self.start.elapsed());
        trace!(key = %self.key, elapsed_ms, "recording timer");
        self.context.set(self.key.clone(), elapsed_ms);
    }
}

impl TrackingContext {
    /// Start a [`PerfMsTracker`] recording under `key`.
    pub fn timer(&self, key: impl Into<String>) -> PerfMsTracker {
        PerfMsTracker::start(self, key)
    }

    /// Await `future` and record how long it took under `key`.
    pub async fn measure<F: Future>(&self, key: impl Into<String>, future: F) -> F::Output {
        let _timer = self.timer(key);
        future.await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn recorded(context: &TrackingContext, key: &str) -> Option<u64> {
        context
            .snapshot()
            .tracking_data
            .get(key)
            .and_then(Value::as_u64)
    }

    #[tokio::test]
    async fn test_measure_across_await() {
        let context = TrackingContext::default();
        let value = context
            .measure("pf_srv", async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                4000
            })
            .await;

        assert_eq!(value, 4000);
        assert!(recorded(&context, "pf_srv").is_some_and(|ms| ms >= 20));
    }

    #[test]
    fn test_records_on_early_exit() {
        fn compute(context: &TrackingContext) -> Result<(), &'static str> {
            let _timer = context.timer("pf_db");
            Err("nothing to compute")
        }

        let context = TrackingContext::default();
        assert!(compute(&context).is_err());
        assert!(recorded(&context, "pf_db").is_some());
    }

    #[test]
    fn test_as_millis() {
        assert_eq!(as_millis(Duration::from_micros(2500)), 2);
        assert_eq!(as_millis(Duration::from_secs(1)), 1000);
    }
}
