//! Shared tracking core used by both request interceptors.
//!
//! A [`Tracker`] owns everything that lives for the whole process: the
//! configuration, the compiled exclusion rules, the field builder and the
//! delivery client. For each tracked request it hands out a [`PendingEvent`],
//! which finalizes the event exactly once:
//!
//! - [`PendingEvent::finish`] builds and dispatches in place
//! - [`PendingEvent::finish_detached`] settles the outcome now and dispatches
//!   from a background task, so the response is not held back
//! - dropping an unfinished event (the request future was cancelled) still
//!   dispatches from a background task, best effort

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Instant;

use axum::http::StatusCode;
use tracing::{debug, warn};

use crate::collector::{dispatch, Collector, HttpCollector};
use crate::config::TrackingConfig;
use crate::error::TrackerResult;
use crate::lifespan::CollectorLifespan;
use crate::tracking::builder::TrackingStateBuilder;
use crate::tracking::context::{ContextSnapshot, TrackingContext};
use crate::tracking::exclusion::ExclusionPolicy;
use crate::tracking::facts::RequestFacts;
use crate::tracking::merge::{merge, RequestOutcome, TrackingEvent};

/// Process-wide tracking state.
#[derive(Debug)]
pub struct Tracker {
    config: TrackingConfig,
    builder: TrackingStateBuilder,
    exclusions: ExclusionPolicy,
    collector: Arc<dyn Collector>,
}

impl Tracker {
    /// Create a tracker with its own HTTP client, using the configured timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if an exclusion pattern is invalid or the client
    /// cannot be built.
    pub fn new(config: TrackingConfig) -> TrackerResult<Self> {
        let collector = HttpCollector::new(config.http_timeout())?;
        Self::with_collector(config, Arc::new(collector))
    }

    /// Create a tracker delivering through `collector`.
    ///
    /// The configured timeout does not apply to a supplied collector.
    ///
    /// # Errors
    ///
    /// Returns an error if an exclusion pattern is invalid.
    pub fn with_collector(
        config: TrackingConfig,
        collector: Arc<dyn Collector>,
    ) -> TrackerResult<Self> {
        let exclusions = ExclusionPolicy::from_config(&config)?;
        let builder = TrackingStateBuilder::from_config(&config);
        Ok(Self {
            config,
            builder,
            exclusions,
            collector,
        })
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &TrackingConfig {
        &self.config
    }

    /// Delivery client.
    #[must_use]
    pub fn collector(&self) -> Arc<dyn Collector> {
        self.collector.clone()
    }

    /// Hooks closing the delivery client at shutdown.
    #[must_use]
    pub fn lifespan_hooks(&self) -> CollectorLifespan {
        CollectorLifespan::new(self.collector.clone())
    }

    /// Whether `facts` describe a request that is not tracked.
    #[must_use]
    pub fn is_excluded(&self, facts: &RequestFacts) -> bool {
        self.exclusions.is_excluded(&facts.path, &facts.method)
    }

    /// Build the event for a finished request.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the server cannot be resolved.
    pub fn build_event(
        &self,
        facts: &RequestFacts,
        outcome: &RequestOutcome,
        context: Option<&ContextSnapshot>,
    ) -> TrackerResult<TrackingEvent> {
        let base = self.builder.build(facts)?;
        Ok(merge(base, outcome, context))
    }

    /// Build and deliver the event for a finished request.
    ///
    /// Failures are logged and discarded.
    pub async fn track(
        &self,
        facts: &RequestFacts,
        outcome: &RequestOutcome,
        context: Option<&ContextSnapshot>,
    ) {
        let event = match self.build_event(facts, outcome, context) {
            Ok(event) => event,
            Err(e) => {
                debug!(path = %facts.path, error = %e, "tracking skipped");
                return;
            }
        };

        if let Err(e) = dispatch(self.collector.as_ref(), self.config.matomo_url(), &event).await {
            debug!(path = %facts.path, error = %e, "tracking event discarded");
        }
    }

    /// Start tracking a request.
    ///
    /// The timer starts now. The returned event must be finished once the
    /// application is done with the request.
    pub fn begin(
        self: &Arc<Self>,
        facts: RequestFacts,
        context: Option<TrackingContext>,
    ) -> PendingEvent {
        PendingEvent {
            inner: Some(PendingInner {
                tracker: self.clone(),
                facts,
                context,
                status: CapturedStatus::default(),
                start: Instant::now(),
            }),
        }
    }
}

/// Status code observed on the response path, shared with the response wrapper.
///
/// Reads as 500 until a status is recorded.
#[derive(Debug, Clone)]
pub struct CapturedStatus(Arc<AtomicU16>);

impl Default for CapturedStatus {
    fn default() -> Self {
        Self(Arc::new(AtomicU16::new(
            StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
        )))
    }
}

impl CapturedStatus {
    /// Record the status emitted by the application.
    pub fn record(&self, status: StatusCode) {
        self.0.store(status.as_u16(), Ordering::Release);
    }

    /// Status recorded so far.
    #[must_use]
    pub fn get(&self) -> StatusCode {
        StatusCode::from_u16(self.0.load(Ordering::Acquire))
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

#[derive(Debug)]
struct PendingInner {
    tracker: Arc<Tracker>,
    facts: RequestFacts,
    context: Option<TrackingContext>,
    status: CapturedStatus,
    start: Instant,
}

impl PendingInner {
    fn settle(self, error: Option<String>) -> Settled {
        let mut outcome = RequestOutcome::completed(
            self.status.get(),
            self.facts.method.clone(),
            self.start.elapsed(),
        );
        outcome.error = error;

        Settled {
            tracker: self.tracker,
            facts: self.facts,
            outcome,
            snapshot: self.context.map(|context| context.snapshot()),
        }
    }
}

struct Settled {
    tracker: Arc<Tracker>,
    facts: RequestFacts,
    outcome: RequestOutcome,
    snapshot: Option<ContextSnapshot>,
}

impl Settled {
    async fn dispatch(self) {
        self.tracker
            .track(&self.facts, &self.outcome, self.snapshot.as_ref())
            .await;
    }

    fn spawn(self) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(self.dispatch());
            }
            Err(_) => warn!(path = %self.facts.path, "no runtime available, tracking event dropped"),
        }
    }
}

/// A tracked request that has not been reported yet.
#[derive(Debug)]
#[must_use = "a pending event is dispatched when finished or dropped"]
pub struct PendingEvent {
    inner: Option<PendingInner>,
}

impl PendingEvent {
    /// Handle for recording the response status.
    #[must_use]
    pub fn status(&self) -> CapturedStatus {
        self.inner
            .as_ref()
            .map(|inner| inner.status.clone())
            .unwrap_or_default()
    }

    /// Settle and dispatch the event, waiting for delivery.
    ///
    /// `error` describes the application failure, if any.
    pub async fn finish(mut self, error: Option<String>) {
        if let Some(inner) = self.inner.take() {
            inner.settle(error).dispatch().await;
        }
    }

    /// Settle the event now and dispatch it from a background task.
    pub fn finish_detached(mut self, error: Option<String>) {
        if let Some(inner) = self.inner.take() {
            inner.settle(error).spawn();
        }
    }
}

impl Drop for PendingEvent {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            warn!(path = %inner.facts.path, "request ended before tracking finished, dispatching in background");
            inner.settle(None).spawn();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::collector::RecordingCollector;
    use axum::http::Method;
    use serde_json::json;
    use std::time::Duration;

    fn tracker(config: TrackingConfig) -> (Arc<Tracker>, Arc<RecordingCollector>) {
        let collector = Arc::new(RecordingCollector::new());
        let tracker = Tracker::with_collector(config, collector.clone()).unwrap();
        (Arc::new(tracker), collector)
    }

    fn config() -> TrackingConfig {
        TrackingConfig::new("http://trackingserver", 1)
    }

    fn facts(path: &str) -> RequestFacts {
        RequestFacts::builder(Method::GET, path)
            .server("testserver", None)
            .build()
    }

    #[test]
    fn test_captured_status_defaults_to_500() {
        let status = CapturedStatus::default();
        assert_eq!(status.get(), StatusCode::INTERNAL_SERVER_ERROR);
        status.record(StatusCode::CREATED);
        assert_eq!(status.get(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn test_finish_dispatches_once() {
        let (tracker, collector) = tracker(config());
        let context = TrackingContext::default();
        let pending = tracker.begin(facts("/foo"), Some(context.clone()));

        pending.status().record(StatusCode::OK);
        context.set_custom("e_c", "Foo");
        pending.finish(None).await;

        let events = collector.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].get("action_name"), Some(&json!("/foo")));
        assert_eq!(events[0].get("e_c"), Some(&json!("Foo")));
        assert_eq!(
            events[0].custom_dimensions()["http_status_code"],
            json!(200)
        );
        assert_eq!(collector.calls()[0].url, "http://trackingserver");
    }

    #[tokio::test]
    async fn test_finish_with_error_marks_event() {
        let (tracker, collector) = tracker(config());
        let pending = tracker.begin(facts("/foo"), None);
        pending.finish(Some("boom".to_string())).await;

        let event = &collector.events()[0];
        assert_eq!(event.get("ca"), Some(&json!(1)));
        assert_eq!(event.get("cra"), Some(&json!("boom")));
        assert_eq!(event.custom_dimensions()["http_status_code"], json!(500));
    }

    #[tokio::test]
    async fn test_dropped_event_is_dispatched_in_background() {
        let (tracker, collector) = tracker(config());
        let pending = tracker.begin(facts("/foo"), None);
        pending.status().record(StatusCode::ACCEPTED);
        drop(pending);

        assert!(collector.wait_for_calls(1, Duration::from_secs(2)).await);
        assert_eq!(
            collector.events()[0].custom_dimensions()["http_status_code"],
            json!(202)
        );
    }

    #[tokio::test]
    async fn test_finish_detached() {
        let (tracker, collector) = tracker(config());
        tracker.begin(facts("/bar"), None).finish_detached(None);

        assert!(collector.wait_for_calls(1, Duration::from_secs(2)).await);
        assert_eq!(collector.call_count(), 1);
    }

    #[tokio::test]
    async fn test_unresolvable_server_skips_delivery() {
        let (tracker, collector) = tracker(config());
        let request = RequestFacts::builder(Method::GET, "/foo").build();
        tracker.begin(request, None).finish(None).await;

        assert_eq!(collector.call_count(), 0);
    }

    #[tokio::test]
    async fn test_collector_failures_are_swallowed() {
        let collector = Arc::new(RecordingCollector::failing("connection refused"));
        let tracker = Arc::new(Tracker::with_collector(config(), collector.clone()).unwrap());

        tracker.begin(facts("/foo"), None).finish(None).await;
        assert_eq!(collector.call_count(), 1);
    }

    #[test]
    fn test_is_excluded() {
        let (tracker, _collector) = tracker(config().with_exclude_paths(["/health"]));
        assert!(tracker.is_excluded(&facts("/health")));
        assert!(!tracker.is_excluded(&facts("/foo")));
    }
}
