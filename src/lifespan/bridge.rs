//! Bridging the lifecycle handshake between the host and the wrapped application.
//!
//! The host expects a strict exchange:
//!
//! ```text
//! host                    bridge                      application
//!  │ lifespan.startup ──►   │  (startup hooks)           │
//!  │                        │ ── lifespan.startup ──────►│
//!  │                        │ ◄─ lifespan.startup.complete
//!  │ ◄─ startup.complete ── │                            │
//!  │ lifespan.shutdown ──►  │ ── lifespan.shutdown ─────►│
//!  │                        │ ◄─ shutdown.complete (suppressed)
//!  │                        │  (shutdown hooks)          │
//!  │ ◄─ shutdown.complete ─ │                            │
//! ```
//!
//! Wrapped applications fall into one of several behaviour classes, see
//! [`InnerOutcome`]. Whatever the class, the bridge runs its startup hook once,
//! its shutdown hook once (if startup succeeded) and emits exactly one terminal
//! message of its own.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::error::{BoxError, HookPhase, TrackerError};
use crate::lifespan::LifespanHooks;
use crate::protocol::{
    Application, Message, MessageSink, MessageSource, MessageType, Scope, SharedSink, SharedSource,
};

/// Where the outward handshake stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    /// Startup has not completed.
    Idle,
    /// `lifespan.startup.complete` went out.
    Started,
    /// The host asked for shutdown.
    ShutdownRequested,
    /// The bridge emitted its terminal message.
    Terminal,
}

#[derive(Debug, Default)]
struct LogInner {
    received: HashSet<MessageType>,
    sent: HashSet<MessageType>,
    terminal: bool,
}

/// Message types observed during one bridge invocation.
///
/// `sent` holds what the application tried to send (suppressed messages
/// included) and what the bridge emitted itself.
#[derive(Debug, Default)]
pub struct HandshakeLog {
    inner: Mutex<LogInner>,
}

impl HandshakeLog {
    fn record_received(&self, kind: MessageType) {
        self.inner.lock().received.insert(kind);
    }

    fn record_sent(&self, kind: MessageType) {
        self.inner.lock().sent.insert(kind);
    }

    fn mark_terminal(&self) {
        self.inner.lock().terminal = true;
    }

    /// Whether a message of this type was received from the host.
    #[must_use]
    pub fn received(&self, kind: MessageType) -> bool {
        self.inner.lock().received.contains(&kind)
    }

    /// Whether a message of this type was sent.
    #[must_use]
    pub fn sent(&self, kind: MessageType) -> bool {
        self.inner.lock().sent.contains(&kind)
    }

    /// Whether a failure message was sent.
    #[must_use]
    pub fn sent_failure(&self) -> bool {
        self.sent(MessageType::LifespanStartupFailed)
            || self.sent(MessageType::LifespanShutdownFailed)
    }

    /// Current handshake state.
    #[must_use]
    pub fn state(&self) -> BridgeState {
        let inner = self.inner.lock();
        if inner.terminal {
            BridgeState::Terminal
        } else if inner.received.contains(&MessageType::LifespanShutdown) {
            BridgeState::ShutdownRequested
        } else if inner.sent.contains(&MessageType::LifespanStartupComplete) {
            BridgeState::Started
        } else {
            BridgeState::Idle
        }
    }
}

struct LoggingSource {
    inner: SharedSource,
    log: Arc<HandshakeLog>,
}

#[async_trait]
impl MessageSource for LoggingSource {
    async fn receive(&self) -> Result<Message, BoxError> {
        let message = self.inner.receive().await?;
        self.log.record_received(message.kind());
        Ok(message)
    }
}

struct LoggingSink {
    inner: SharedSink,
    log: Arc<HandshakeLog>,
}

#[async_trait]
impl MessageSink for LoggingSink {
    async fn send(&self, message: Message) -> Result<(), BoxError> {
        let kind = message.kind();
        self.log.record_sent(kind);
        if kind == MessageType::LifespanShutdownComplete {
            debug!("holding back application's lifespan.shutdown.complete");
            return Ok(());
        }
        self.inner.send(message).await
    }
}

/// How the wrapped application handled the lifecycle scope.
#[derive(Debug)]
pub enum InnerOutcome {
    /// Raised after sending a failure message itself. The error is re-raised.
    RaisedAfterOwnFailureSignal(BoxError),
    /// Raised without sending a failure message. The application does not
    /// speak the protocol; the error is dropped.
    RaisedWithoutFailureSignal(BoxError),
    /// Sent `lifespan.startup.failed` and returned.
    ReportedStartupFailure,
    /// Returned without sending `lifespan.startup.complete`. The bridge
    /// completes the handshake itself.
    CompletedWithoutHandshake,
    /// Ran the handshake and returned after shutdown.
    CompletedHandshake,
}

impl InnerOutcome {
    /// Classify the result of one invocation using the handshake log.
    #[must_use]
    pub fn classify(result: Result<(), BoxError>, log: &HandshakeLog) -> Self {
        match result {
            Err(err) if log.sent_failure() => Self::RaisedAfterOwnFailureSignal(err),
            Err(err) => Self::RaisedWithoutFailureSignal(err),
            Ok(()) if log.sent(MessageType::LifespanStartupFailed) => Self::ReportedStartupFailure,
            Ok(()) if !log.sent(MessageType::LifespanStartupComplete) => {
                Self::CompletedWithoutHandshake
            }
            Ok(()) => Self::CompletedHandshake,
        }
    }

    const fn label(&self) -> &'static str {
        match self {
            Self::RaisedAfterOwnFailureSignal(_) => "raised_after_own_failure_signal",
            Self::RaisedWithoutFailureSignal(_) => "raised_without_failure_signal",
            Self::ReportedStartupFailure => "reported_startup_failure",
            Self::CompletedWithoutHandshake => "completed_without_handshake",
            Self::CompletedHandshake => "completed_handshake",
        }
    }
}

/// Runs the shutdown hook from a detached task if the bridge is dropped
/// between startup and shutdown.
struct ShutdownGuard {
    hooks: Option<Arc<dyn LifespanHooks>>,
}

impl ShutdownGuard {
    fn disarm(&mut self) -> Option<Arc<dyn LifespanHooks>> {
        self.hooks.take()
    }
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        let Some(hooks) = self.hooks.take() else {
            return;
        };
        warn!("lifespan cancelled, running shutdown hook in the background");
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = hooks.shutdown().await {
                        error!(error = %e, "shutdown hook failed after cancellation");
                    }
                });
            }
            Err(_) => error!("no runtime available, shutdown hook skipped"),
        }
    }
}

/// Adapts the wrapped application's lifecycle handshake to the host.
pub struct LifecycleBridge {
    app: Arc<dyn Application>,
    hooks: Arc<dyn LifespanHooks>,
}

impl std::fmt::Debug for LifecycleBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleBridge")
            .field("hooks", &self.hooks.name())
            .finish_non_exhaustive()
    }
}

impl LifecycleBridge {
    /// Bridge `app` with `hooks` run around it.
    #[must_use]
    pub fn new(app: Arc<dyn Application>, hooks: Arc<dyn LifespanHooks>) -> Self {
        Self { app, hooks }
    }

    /// Run the whole lifecycle scope.
    ///
    /// Returns once the terminal message was sent.
    ///
    /// # Errors
    ///
    /// Hook failures, as [`TrackerError::LifecycleHookFailure`], and errors the
    /// application raised after reporting its own failure, unchanged.
    pub async fn run(&self, receive: SharedSource, send: SharedSink) -> Result<(), BoxError> {
        let log = Arc::new(HandshakeLog::default());

        if let Err(e) = self.hooks.startup().await {
            let err = TrackerError::hook(HookPhase::Startup, e);
            error!(hook = self.hooks.name(), error = %err, "lifespan startup hook failed");
            return finish(&log, &send, Err(err.into())).await;
        }

        let mut guard = ShutdownGuard {
            hooks: Some(self.hooks.clone()),
        };
        let body = self.run_inner(&log, receive, send.clone()).await;
        let shutdown = match guard.disarm() {
            Some(hooks) => hooks.shutdown().await,
            None => Ok(()),
        };

        let result = match (body, shutdown) {
            (Ok(()), Ok(())) => Ok(()),
            (Ok(()), Err(e)) => {
                let err = TrackerError::hook(HookPhase::Shutdown, e);
                error!(hook = self.hooks.name(), error = %err, "lifespan shutdown hook failed");
                Err(err.into())
            }
            (Err(body), Ok(())) => Err(body),
            (Err(body), Err(e)) => {
                error!(
                    hook = self.hooks.name(),
                    error = %e,
                    "lifespan shutdown hook failed while handling another error"
                );
                Err(body)
            }
        };

        finish(&log, &send, result).await
    }

    async fn run_inner(
        &self,
        log: &Arc<HandshakeLog>,
        receive: SharedSource,
        send: SharedSink,
    ) -> Result<(), BoxError> {
        let wrapped_receive: SharedSource = Arc::new(LoggingSource {
            inner: receive.clone(),
            log: log.clone(),
        });
        let wrapped_send: SharedSink = Arc::new(LoggingSink {
            inner: send.clone(),
            log: log.clone(),
        });

        let result = self
            .app
            .call(Scope::Lifespan, wrapped_receive, wrapped_send)
            .await;
        let outcome = InnerOutcome::classify(result, log);
        debug!(outcome = outcome.label(), "application lifespan finished");

        match outcome {
            InnerOutcome::RaisedAfterOwnFailureSignal(err) => Err(err),
            InnerOutcome::RaisedWithoutFailureSignal(err) => {
                debug!(error = %err, "application does not support lifespan, ignoring error");
                if log.sent(MessageType::LifespanStartupComplete) {
                    Ok(())
                } else {
                    complete_handshake(log, &receive, &send).await
                }
            }
            InnerOutcome::ReportedStartupFailure | InnerOutcome::CompletedHandshake => Ok(()),
            InnerOutcome::CompletedWithoutHandshake => {
                complete_handshake(log, &receive, &send).await
            }
        }
    }
}

/// Answer the host on behalf of an application that did not.
///
/// Waits for `lifespan.startup` unless the application already consumed
/// it, confirms startup, then blocks until the host asks for shutdown.
async fn complete_handshake(
    log: &HandshakeLog,
    receive: &SharedSource,
    send: &SharedSink,
) -> Result<(), BoxError> {
    if !log.received(MessageType::LifespanStartup) {
        let message = receive.receive().await?;
        log.record_received(message.kind());
        debug!(message = %message.kind(), "received on behalf of application");
    }

    send.send(Message::LifespanStartupComplete).await?;
    log.record_sent(MessageType::LifespanStartupComplete);

    if !log.received(MessageType::LifespanShutdown) {
        let message = receive.receive().await?;
        log.record_received(message.kind());
        debug!(message = %message.kind(), "received on behalf of application");
    }
    Ok(())
}

async fn finish(
    log: &HandshakeLog,
    send: &SharedSink,
    result: Result<(), BoxError>,
) -> Result<(), BoxError> {
    let message = match &result {
        Ok(()) => Message::LifespanShutdownComplete,
        Err(err) if log.sent(MessageType::LifespanStartupComplete) => {
            Message::LifespanShutdownFailed {
                message: describe(&**err),
            }
        }
        Err(err) => Message::LifespanStartupFailed {
            message: describe(&**err),
        },
    };

    let kind = message.kind();
    log.record_sent(kind);
    log.mark_terminal();
    debug!(message = %kind, "sending terminal lifespan message");

    if let Err(send_err) = send.send(message).await {
        warn!(error = %send_err, message = %kind, "could not deliver terminal lifespan message");
        if result.is_ok() {
            return Err(send_err);
        }
    }
    result
}

/// Error message followed by its causes.
fn describe(err: &(dyn std::error::Error + 'static)) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let cause_text = cause.to_string();
        if !text.ends_with(&cause_text) {
            text.push_str("\ncaused by: ");
            text.push_str(&cause_text);
        }
        source = cause.source();
    }
    text
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn log_with(sent: &[MessageType]) -> HandshakeLog {
        let log = HandshakeLog::default();
        for kind in sent {
            log.record_sent(*kind);
        }
        log
    }

    #[test]
    fn test_classify_raised() {
        let log = log_with(&[MessageType::LifespanStartupFailed]);
        assert!(matches!(
            InnerOutcome::classify(Err("boom".into()), &log),
            InnerOutcome::RaisedAfterOwnFailureSignal(_)
        ));

        let log = log_with(&[MessageType::LifespanStartupComplete, MessageType::LifespanShutdownFailed]);
        assert!(matches!(
            InnerOutcome::classify(Err("boom".into()), &log),
            InnerOutcome::RaisedAfterOwnFailureSignal(_)
        ));

        let log = log_with(&[]);
        assert!(matches!(
            InnerOutcome::classify(Err("unsupported scope".into()), &log),
            InnerOutcome::RaisedWithoutFailureSignal(_)
        ));
    }

    #[test]
    fn test_classify_returned() {
        let log = log_with(&[MessageType::LifespanStartupFailed]);
        assert!(matches!(
            InnerOutcome::classify(Ok(()), &log),
            InnerOutcome::ReportedStartupFailure
        ));

        let log = log_with(&[]);
        assert!(matches!(
            InnerOutcome::classify(Ok(()), &log),
            InnerOutcome::CompletedWithoutHandshake
        ));

        let log = log_with(&[
            MessageType::LifespanStartupComplete,
            MessageType::LifespanShutdownComplete,
        ]);
        assert!(matches!(
            InnerOutcome::classify(Ok(()), &log),
            InnerOutcome::CompletedHandshake
        ));
    }

    #[test]
    fn test_state_progression() {
        let log = HandshakeLog::default();
        assert_eq!(log.state(), BridgeState::Idle);

        log.record_received(MessageType::LifespanStartup);
        log.record_sent(MessageType::LifespanStartupComplete);
        assert_eq!(log.state(), BridgeState::Started);

        log.record_received(MessageType::LifespanShutdown);
        assert_eq!(log.state(), BridgeState::ShutdownRequested);

        log.mark_terminal();
        assert_eq!(log.state(), BridgeState::Terminal);
    }

    #[test]
    fn test_describe_includes_causes() {
        let err = TrackerError::hook(
            HookPhase::Startup,
            Box::new(TrackerError::config("missing database url", None)),
        );
        let text = describe(&err);
        assert!(text.starts_with("startup hook failed: Configuration error: missing database url"));
        assert!(!text.contains("caused by"));

        let err = TrackerError::transport(
            "request failed",
            Some(Box::new(std::io::Error::other("connection reset"))),
        );
        assert_eq!(
            describe(&err),
            "Transport error: request failed\ncaused by: connection reset"
        );
    }
}
