//! Delivery of tracking events to the collector.
//!
//! The middleware only needs one capability from the outside world: posting a
//! flat event to a URL. [`Collector`] is that seam. [`HttpCollector`] is the
//! production implementation on top of a pooled `reqwest` client and
//! [`RecordingCollector`] keeps events in memory for tests and dry runs.
//!
//! [`dispatch`] makes exactly one attempt and logs the outcome. It never
//! retries.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, error};

use crate::error::{TrackerError, TrackerResult};
use crate::tracking::merge::TrackingEvent;

/// Status and body returned by the collector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectorResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body as text.
    pub body: String,
}

impl CollectorResponse {
    /// Whether the collector accepted the event.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status < 300
    }
}

/// Something tracking events can be posted to.
#[async_trait]
pub trait Collector: Send + Sync + fmt::Debug {
    /// Post one event to `url`.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the collector could not be reached.
    async fn post(&self, url: &str, event: &TrackingEvent) -> TrackerResult<CollectorResponse>;

    /// Release the underlying resources. Called once at shutdown.
    async fn close(&self) {}
}

/// [`Collector`] posting form-encoded events over HTTP.
#[derive(Debug)]
pub struct HttpCollector {
    client: reqwest::Client,
    closed: AtomicBool,
}

impl HttpCollector {
    /// Create a collector with its own client.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the client cannot be built.
    pub fn new(timeout: Option<Duration>) -> TrackerResult<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(|e| {
            TrackerError::transport("failed to build HTTP client", Some(Box::new(e)))
        })?;
        Ok(Self::with_client(client))
    }

    /// Use an existing client as-is.
    #[must_use]
    pub const fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            closed: AtomicBool::new(false),
        }
    }

    /// Whether [`Collector::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Collector for HttpCollector {
    async fn post(&self, url: &str, event: &TrackingEvent) -> TrackerResult<CollectorResponse> {
        if self.is_closed() {
            return Err(TrackerError::transport("client has been closed", None));
        }

        let response = self.client.post(url).form(&event.to_form()).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();

        Ok(CollectorResponse { status, body })
    }

    async fn close(&self) {
        debug!("closing tracking client");
        self.closed.store(true, Ordering::Release);
    }
}

/// How a [`RecordingCollector`] answers.
#[derive(Debug, Clone)]
pub enum RecordingMode {
    /// Answer with this status and body.
    Respond {
        /// HTTP status code
        status: u16,
        /// Response body
        body: String,
    },
    /// Fail with a transport error carrying this message.
    Fail(String),
}

/// One recorded delivery attempt.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    /// Target URL.
    pub url: String,
    /// Event that was posted.
    pub event: TrackingEvent,
}

/// In-memory [`Collector`] that records every event.
#[derive(Debug)]
pub struct RecordingCollector {
    mode: Mutex<RecordingMode>,
    calls: Mutex<Vec<RecordedCall>>,
    closed: AtomicBool,
    notify: Notify,
}

impl Default for RecordingCollector {
    fn default() -> Self {
        Self::responding(200, "")
    }
}

impl RecordingCollector {
    /// Collector answering `200` with an empty body.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Collector answering with `status` and `body`.
    #[must_use]
    pub fn responding(status: u16, body: impl Into<String>) -> Self {
        Self::with_mode(RecordingMode::Respond {
            status,
            body: body.into(),
        })
    }

    /// Collector failing every call with a transport error.
    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_mode(RecordingMode::Fail(message.into()))
    }

    fn with_mode(mode: RecordingMode) -> Self {
        Self {
            mode: Mutex::new(mode),
            calls: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Change how later calls are answered.
    pub fn set_mode(&self, mode: RecordingMode) {
        *self.mode.lock() = mode;
    }

    /// All recorded calls.
    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    /// Events of all recorded calls.
    #[must_use]
    pub fn events(&self) -> Vec<TrackingEvent> {
        self.calls.lock().iter().map(|call| call.event.clone()).collect()
    }

    /// Number of recorded calls.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Whether [`Collector::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Wait until at least `count` calls were recorded or `timeout` passes.
    ///
    /// Returns whether the count was reached.
    pub async fn wait_for_calls(&self, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            if self.call_count() >= count {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.call_count() >= count;
            }
        }
    }
}

#[async_trait]
impl Collector for RecordingCollector {
    async fn post(&self, url: &str, event: &TrackingEvent) -> TrackerResult<CollectorResponse> {
        self.calls.lock().push(RecordedCall {
            url: url.to_string(),
            event: event.clone(),
        });
        self.notify.notify_waiters();

        let mode = self.mode.lock().clone();
        match mode {
            RecordingMode::Respond { status, body } => Ok(CollectorResponse { status, body }),
            RecordingMode::Fail(message) => Err(TrackerError::transport(message, None)),
        }
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Deliver one event, logging the outcome.
///
/// # Errors
///
/// Returns the transport error, or a [`TrackerError::CollectorRejection`] for
/// a status of 300 or above. Callers in the request path log and discard it.
pub async fn dispatch(
    collector: &dyn Collector,
    url: &str,
    event: &TrackingEvent,
) -> TrackerResult<()> {
    debug!(url = %url, tracking_data = ?event.fields(), "Making tracking call");

    match collector.post(url, event).await {
        Ok(response) => {
            debug!(status = response.status, content = %response.body, "tracking response");
            if response.is_success() {
                Ok(())
            } else {
                error!(
                    status_code = response.status,
                    text = %response.body,
                    "Tracking call failed (status_code={})",
                    response.status
                );
                Err(TrackerError::rejected(response.status, response.body))
            }
        }
        Err(err) => {
            error!(error = %err, "Error tracking view");
            Err(err)
        }
    }
}
