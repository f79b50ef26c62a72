//! Inbound application protocol.
//!
//! The middleware talks to the host runtime and to the wrapped application with
//! the three-part call convention used by async web servers: a [`Scope`]
//! describing the unit of work, a [`MessageSource`] yielding inbound messages and
//! a [`MessageSink`] accepting outbound ones.
//!
//! ## Message flow
//!
//! ```text
//! host ── receive ──► middleware ── receive ──► application
//! host ◄── send ───── middleware ◄── send ───── application
//! ```
//!
//! Lifecycle messages (`lifespan.*`) flow once per process. HTTP messages flow
//! once per request; the middleware only inspects `http.response.start`.
//!
//! Channel-backed implementations are provided by [`channel`] for hosts and tests.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::{HeaderMap, StatusCode};
use tokio::sync::{mpsc, Mutex};

use crate::error::{BoxError, TrackerError};
use crate::tracking::context::TrackingContext;
use crate::tracking::facts::RequestFacts;

/// Discriminant of a [`Message`], used for handshake bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// `lifespan.startup`
    LifespanStartup,
    /// `lifespan.startup.complete`
    LifespanStartupComplete,
    /// `lifespan.startup.failed`
    LifespanStartupFailed,
    /// `lifespan.shutdown`
    LifespanShutdown,
    /// `lifespan.shutdown.complete`
    LifespanShutdownComplete,
    /// `lifespan.shutdown.failed`
    LifespanShutdownFailed,
    /// `http.request`
    HttpRequest,
    /// `http.response.start`
    HttpResponseStart,
    /// `http.response.body`
    HttpResponseBody,
    /// `http.disconnect`
    HttpDisconnect,
}

impl MessageType {
    /// Wire name of the message type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LifespanStartup => "lifespan.startup",
            Self::LifespanStartupComplete => "lifespan.startup.complete",
            Self::LifespanStartupFailed => "lifespan.startup.failed",
            Self::LifespanShutdown => "lifespan.shutdown",
            Self::LifespanShutdownComplete => "lifespan.shutdown.complete",
            Self::LifespanShutdownFailed => "lifespan.shutdown.failed",
            Self::HttpRequest => "http.request",
            Self::HttpResponseStart => "http.response.start",
            Self::HttpResponseBody => "http.response.body",
            Self::HttpDisconnect => "http.disconnect",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A protocol message exchanged between host, middleware and application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Host asks the application to start.
    LifespanStartup,
    /// Application finished starting.
    LifespanStartupComplete,
    /// Application failed to start.
    LifespanStartupFailed {
        /// Description of the failure
        message: String,
    },
    /// Host asks the application to shut down.
    LifespanShutdown,
    /// Application finished shutting down.
    LifespanShutdownComplete,
    /// Application failed to shut down cleanly.
    LifespanShutdownFailed {
        /// Description of the failure
        message: String,
    },
    /// A chunk of the request body.
    HttpRequest {
        /// Body bytes
        body: Bytes,
        /// Whether more chunks follow
        more_body: bool,
    },
    /// Start of the response, carrying the status code.
    HttpResponseStart {
        /// Response status
        status: StatusCode,
        /// Response headers
        headers: HeaderMap,
    },
    /// A chunk of the response body.
    HttpResponseBody {
        /// Body bytes
        body: Bytes,
        /// Whether more chunks follow
        more_body: bool,
    },
    /// The client went away.
    HttpDisconnect,
}

impl Message {
    /// Type of this message.
    #[must_use]
    pub const fn kind(&self) -> MessageType {
        match self {
            Self::LifespanStartup => MessageType::LifespanStartup,
            Self::LifespanStartupComplete => MessageType::LifespanStartupComplete,
            Self::LifespanStartupFailed { .. } => MessageType::LifespanStartupFailed,
            Self::LifespanShutdown => MessageType::LifespanShutdown,
            Self::LifespanShutdownComplete => MessageType::LifespanShutdownComplete,
            Self::LifespanShutdownFailed { .. } => MessageType::LifespanShutdownFailed,
            Self::HttpRequest { .. } => MessageType::HttpRequest,
            Self::HttpResponseStart { .. } => MessageType::HttpResponseStart,
            Self::HttpResponseBody { .. } => MessageType::HttpResponseBody,
            Self::HttpDisconnect => MessageType::HttpDisconnect,
        }
    }

    /// Convenience constructor for a response start without headers.
    #[must_use]
    pub fn response_start(status: StatusCode) -> Self {
        Self::HttpResponseStart {
            status,
            headers: HeaderMap::new(),
        }
    }

    /// Convenience constructor for a final response body chunk.
    #[must_use]
    pub fn response_body(body: impl Into<Bytes>) -> Self {
        Self::HttpResponseBody {
            body: body.into(),
            more_body: false,
        }
    }
}

/// HTTP unit of work: the request snapshot plus its tracking context.
#[derive(Debug, Clone)]
pub struct HttpScope {
    /// Facts captured when the request arrived.
    pub request: RequestFacts,
    tracking: Option<TrackingContext>,
}

impl HttpScope {
    /// Create a scope without a tracking context.
    #[must_use]
    pub const fn new(request: RequestFacts) -> Self {
        Self {
            request,
            tracking: None,
        }
    }

    /// Create a scope that already carries a tracking context.
    #[must_use]
    pub const fn with_tracking(request: RequestFacts, tracking: TrackingContext) -> Self {
        Self {
            request,
            tracking: Some(tracking),
        }
    }

    /// Tracking context of this request, created on first access.
    ///
    /// Repeated calls return handles to the same context.
    pub fn tracking_context(&mut self) -> TrackingContext {
        self.tracking
            .get_or_insert_with(TrackingContext::default)
            .clone()
    }

    /// Tracking context if one has been created.
    #[must_use]
    pub const fn existing_tracking_context(&self) -> Option<&TrackingContext> {
        self.tracking.as_ref()
    }
}

/// Unit of work handed to an [`Application`].
#[derive(Debug, Clone)]
pub enum Scope {
    /// A plain HTTP request.
    Http(HttpScope),
    /// A protocol upgrade; never tracked.
    WebSocket(RequestFacts),
    /// The process lifecycle handshake.
    Lifespan,
}

impl Scope {
    /// Short name of the scope type.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Http(_) => "http",
            Self::WebSocket(_) => "websocket",
            Self::Lifespan => "lifespan",
        }
    }
}

/// Source of inbound messages.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Wait for the next inbound message.
    async fn receive(&self) -> Result<Message, BoxError>;
}

/// Sink for outbound messages.
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Emit one outbound message.
    async fn send(&self, message: Message) -> Result<(), BoxError>;
}

/// Shared handle to a [`MessageSource`].
pub type SharedSource = Arc<dyn MessageSource>;

/// Shared handle to a [`MessageSink`].
pub type SharedSink = Arc<dyn MessageSink>;

/// An application speaking the inbound protocol.
#[async_trait]
pub trait Application: Send + Sync {
    /// Handle one unit of work.
    ///
    /// # Errors
    ///
    /// Any error the application raises. Middleware hands it back unchanged.
    async fn call(
        &self,
        scope: Scope,
        receive: SharedSource,
        send: SharedSink,
    ) -> Result<(), BoxError>;
}

/// [`Application`] backed by an async closure.
pub struct FnApplication<F>(F);

/// Wrap an async closure as an [`Application`].
///
/// # Example
///
/// ```
/// use matomo_middleware::protocol::{app_fn, Message, Scope};
/// use axum::http::StatusCode;
///
/// let app = app_fn(|scope, _receive, send| async move {
///     if let Scope::Http(_) = scope {
///         send.send(Message::response_start(StatusCode::OK)).await?;
///         send.send(Message::response_body("ok")).await?;
///     }
///     Ok(())
/// });
/// # let _ = app;
/// ```
pub const fn app_fn<F, Fut>(f: F) -> FnApplication<F>
where
    F: Fn(Scope, SharedSource, SharedSink) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    FnApplication(f)
}

#[async_trait]
impl<F, Fut> Application for FnApplication<F>
where
    F: Fn(Scope, SharedSource, SharedSink) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    async fn call(
        &self,
        scope: Scope,
        receive: SharedSource,
        send: SharedSink,
    ) -> Result<(), BoxError> {
        (self.0)(scope, receive, send).await
    }
}

/// Receiving half of an in-memory message channel.
#[derive(Debug)]
pub struct ChannelSource {
    rx: Mutex<mpsc::UnboundedReceiver<Message>>,
}

/// Sending half of an in-memory message channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Message>,
}

/// Create an in-memory message channel.
#[must_use]
pub fn channel() -> (ChannelSink, ChannelSource) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        ChannelSink { tx },
        ChannelSource { rx: Mutex::new(rx) },
    )
}

#[async_trait]
impl MessageSource for ChannelSource {
    async fn receive(&self) -> Result<Message, BoxError> {
        self.rx
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| TrackerError::protocol("receive channel closed").into())
    }
}

#[async_trait]
impl MessageSink for ChannelSink {
    async fn send(&self, message: Message) -> Result<(), BoxError> {
        self.tx.send(message).map_err(|e| {
            TrackerError::protocol(format!("send channel closed, dropped {}", e.0.kind())).into()
        })
    }
}
