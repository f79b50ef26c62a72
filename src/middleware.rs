//! Tracking middleware speaking the inbound application protocol.
//!
//! [`TrackingMiddleware`] wraps any [`Application`]:
//!
//! - lifecycle scopes go through the [`LifecycleBridge`], which closes the
//!   delivery client at shutdown
//! - upgrade scopes are forwarded untouched
//! - HTTP scopes are forwarded with a response wrapper capturing the status,
//!   then reported to the collector
//!
//! For axum routers use [`TrackingLayer`](crate::api::middleware::TrackingLayer)
//! instead, which does the same as a tower layer.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::BoxError;
use crate::lifespan::{HookChain, LifecycleBridge, LifespanHooks};
use crate::protocol::{Application, HttpScope, Message, MessageSink, Scope, SharedSink, SharedSource};
use crate::tracker::{CapturedStatus, Tracker};

/// Records the status of `http.response.start` before passing it on.
struct StatusCapturingSink {
    inner: SharedSink,
    status: CapturedStatus,
}

#[async_trait]
impl MessageSink for StatusCapturingSink {
    async fn send(&self, message: Message) -> Result<(), BoxError> {
        if let Message::HttpResponseStart { status, .. } = &message {
            self.status.record(*status);
        }
        self.inner.send(message).await
    }
}

/// Wraps an application and reports every tracked request.
pub struct TrackingMiddleware {
    app: Arc<dyn Application>,
    tracker: Arc<Tracker>,
    bridge: LifecycleBridge,
}

impl std::fmt::Debug for TrackingMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackingMiddleware")
            .field("tracker", &self.tracker)
            .field("bridge", &self.bridge)
            .finish_non_exhaustive()
    }
}

impl TrackingMiddleware {
    /// Wrap `app`.
    #[must_use]
    pub fn new(app: Arc<dyn Application>, tracker: Arc<Tracker>) -> Self {
        let hooks: Arc<dyn LifespanHooks> = Arc::new(tracker.lifespan_hooks());
        let bridge = LifecycleBridge::new(app.clone(), hooks);
        Self {
            app,
            tracker,
            bridge,
        }
    }

    /// Wrap `app`, running `hooks` at startup and shutdown.
    ///
    /// `hooks` shut down before the delivery client is closed.
    #[must_use]
    pub fn with_hooks(
        app: Arc<dyn Application>,
        tracker: Arc<Tracker>,
        hooks: Arc<dyn LifespanHooks>,
    ) -> Self {
        let chain = HookChain::new()
            .with(Arc::new(tracker.lifespan_hooks()))
            .with(hooks);
        let bridge = LifecycleBridge::new(app.clone(), Arc::new(chain));
        Self {
            app,
            tracker,
            bridge,
        }
    }

    /// Tracker in use.
    #[must_use]
    pub const fn tracker(&self) -> &Arc<Tracker> {
        &self.tracker
    }

    async fn handle_http(
        &self,
        mut scope: HttpScope,
        receive: SharedSource,
        send: SharedSink,
    ) -> Result<(), BoxError> {
        let context = scope.tracking_context();

        if self.tracker.is_excluded(&scope.request) {
            return self.app.call(Scope::Http(scope), receive, send).await;
        }

        let pending = self.tracker.begin(scope.request.clone(), Some(context));
        let send: SharedSink = Arc::new(StatusCapturingSink {
            inner: send,
            status: pending.status(),
        });

        let result = self.app.call(Scope::Http(scope), receive, send).await;
        if let Err(e) = &result {
            debug!(error = %e, "application raised, tracking before re-raising");
        }

        pending
            .finish(result.as_ref().err().map(ToString::to_string))
            .await;
        result
    }
}

#[async_trait]
impl Application for TrackingMiddleware {
    async fn call(
        &self,
        scope: Scope,
        receive: SharedSource,
        send: SharedSink,
    ) -> Result<(), BoxError> {
        match scope {
            Scope::Lifespan => self.bridge.run(receive, send).await,
            Scope::WebSocket(_) => self.app.call(scope, receive, send).await,
            Scope::Http(http) => self.handle_http(http, receive, send).await,
        }
    }
}
