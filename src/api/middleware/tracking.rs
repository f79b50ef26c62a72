//! Tower layer reporting every request of an axum router.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use axum::{routing::get, Router};
//! use matomo_middleware::api::middleware::TrackingLayer;
//! use matomo_middleware::config::TrackingConfig;
//! use matomo_middleware::tracker::Tracker;
//!
//! # fn example() -> matomo_middleware::error::TrackerResult<()> {
//! let tracker = Arc::new(Tracker::new(TrackingConfig::new(
//!     "https://matomo.example.org/matomo.php",
//!     12345,
//! ))?);
//!
//! let app: Router = Router::new()
//!     .route("/", get(|| async { "hello" }))
//!     .layer(TrackingLayer::new(tracker));
//! # Ok(())
//! # }
//! ```
//!
//! # Flow
//!
//! 1. Insert a [`TrackingContext`] into the request extensions (reusing one
//!    that is already there)
//! 2. Capture [`RequestFacts`] from the request head
//! 3. Upgrade requests and excluded requests are passed through untouched
//! 4. Otherwise call the inner service, capture the response status (500 if it
//!    panicked) and dispatch the event from a background task
//!
//! A panic in the inner service is tracked and then resumed unchanged.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::{extract::Request, response::Response};
use futures_util::FutureExt;
use tower::{Layer, Service};

use crate::api::middleware::error::HandlerFailure;
use crate::tracker::Tracker;
use crate::tracking::{RequestFacts, TrackingContext};

/// Layer adding request tracking.
#[derive(Clone, Debug)]
pub struct TrackingLayer {
    tracker: Arc<Tracker>,
}

impl TrackingLayer {
    /// Track requests with `tracker`.
    #[must_use]
    pub const fn new(tracker: Arc<Tracker>) -> Self {
        Self { tracker }
    }
}

impl<S> Layer<S> for TrackingLayer {
    type Service = TrackingService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TrackingService {
            inner,
            tracker: self.tracker.clone(),
        }
    }
}

/// Middleware service tracking each request.
#[derive(Clone, Debug)]
pub struct TrackingService<S> {
    inner: S,
    tracker: Arc<Tracker>,
}

impl<S> Service<Request> for TrackingService<S>
where
    S: Service<Request, Response = Response> + Send + 'static,
    S::Future: Send + 'static,
    S::Error: std::fmt::Display,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        let context = req
            .extensions()
            .get::<TrackingContext>()
            .cloned()
            .unwrap_or_default();
        req.extensions_mut().insert(context.clone());

        let (parts, body) = req.into_parts();
        let facts = RequestFacts::from_parts(&parts);
        let req = Request::from_parts(parts, body);

        if facts.is_upgrade() || self.tracker.is_excluded(&facts) {
            return Box::pin(self.inner.call(req));
        }

        let pending = self.tracker.begin(facts, Some(context));
        let fut = self.inner.call(req);

        Box::pin(async move {
            match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(Ok(response)) => {
                    pending.status().record(response.status());
                    let failure = response
                        .extensions()
                        .get::<HandlerFailure>()
                        .map(|failure| failure.0.clone());
                    pending.finish_detached(failure);
                    Ok(response)
                }
                Ok(Err(err)) => {
                    pending.finish_detached(Some(err.to_string()));
                    Err(err)
                }
                Err(panic) => {
                    pending.finish_detached(Some(panic_message(panic.as_ref())));
                    std::panic::resume_unwind(panic)
                }
            }
        })
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|msg| (*msg).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "handler panicked".to_string())
}
