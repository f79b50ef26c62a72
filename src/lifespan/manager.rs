//! Host-side driver of the lifecycle handshake.
//!
//! ```no_run
//! use std::sync::Arc;
//! use matomo_middleware::lifespan::LifespanManager;
//! use matomo_middleware::protocol::{app_fn, Application};
//!
//! # async fn example() -> matomo_middleware::error::TrackerResult<()> {
//! let app: Arc<dyn Application> = Arc::new(app_fn(|_scope, _receive, _send| async { Ok(()) }));
//! let lifespan = LifespanManager::start(app).await?;
//! // serve requests
//! lifespan.shutdown().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{BoxError, HookPhase, TrackerError, TrackerResult};
use crate::protocol::{channel, Application, ChannelSink, ChannelSource, Message, MessageSink, MessageSource, Scope};

/// Default time allowed for each handshake phase.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Drives an application's lifecycle scope from the host side.
#[derive(Debug)]
pub struct LifespanManager {
    to_app: ChannelSink,
    from_app: ChannelSource,
    task: JoinHandle<Result<(), BoxError>>,
    shutdown_timeout: Duration,
}

impl LifespanManager {
    /// Start `app` with the default timeouts.
    ///
    /// # Errors
    ///
    /// See [`LifespanManager::start_with_timeouts`].
    pub async fn start(app: Arc<dyn Application>) -> TrackerResult<Self> {
        Self::start_with_timeouts(app, DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_HANDSHAKE_TIMEOUT).await
    }

    /// Spawn the lifecycle scope of `app`, send `lifespan.startup` and wait
    /// for the answer.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::HandshakeFailed`] if the application reported a
    /// startup failure, or a protocol error if it answered with something else,
    /// stopped answering or timed out.
    pub async fn start_with_timeouts(
        app: Arc<dyn Application>,
        startup_timeout: Duration,
        shutdown_timeout: Duration,
    ) -> TrackerResult<Self> {
        let (to_app, app_receive) = channel();
        let (app_send, from_app) = channel();

        let task = tokio::spawn(async move {
            app.call(Scope::Lifespan, Arc::new(app_receive), Arc::new(app_send))
                .await
        });

        let manager = Self {
            to_app,
            from_app,
            task,
            shutdown_timeout,
        };

        info!("sending lifespan.startup");
        match manager.exchange(Message::LifespanStartup, startup_timeout).await? {
            Message::LifespanStartupComplete => {
                info!("lifespan startup complete");
                Ok(manager)
            }
            Message::LifespanStartupFailed { message } => {
                warn!(message = %message, "lifespan startup failed");
                manager.join(startup_timeout).await;
                Err(TrackerError::handshake(HookPhase::Startup, message))
            }
            other => Err(TrackerError::protocol(format!(
                "unexpected {} during startup",
                other.kind()
            ))),
        }
    }

    /// Whether the lifecycle scope has returned.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Send `lifespan.shutdown`, wait for the answer and for the scope to
    /// return.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::HandshakeFailed`] if the application reported a
    /// shutdown failure, or a protocol error if it answered with something else,
    /// stopped answering or timed out.
    pub async fn shutdown(self) -> TrackerResult<()> {
        info!("sending lifespan.shutdown");
        let reply = self
            .exchange(Message::LifespanShutdown, self.shutdown_timeout)
            .await;
        let timeout = self.shutdown_timeout;

        match reply? {
            Message::LifespanShutdownComplete => {
                self.join(timeout).await;
                info!("lifespan shutdown complete");
                Ok(())
            }
            Message::LifespanShutdownFailed { message } => {
                warn!(message = %message, "lifespan shutdown failed");
                self.join(timeout).await;
                Err(TrackerError::handshake(HookPhase::Shutdown, message))
            }
            other => Err(TrackerError::protocol(format!(
                "unexpected {} during shutdown",
                other.kind()
            ))),
        }
    }

    async fn exchange(&self, message: Message, timeout: Duration) -> TrackerResult<Message> {
        let expected = message.kind();
        self.to_app
            .send(message)
            .await
            .map_err(|e| TrackerError::protocol(format!("could not send {expected}: {e}")))?;

        match tokio::time::timeout(timeout, self.from_app.receive()).await {
            Ok(Ok(reply)) => {
                debug!(request = %expected, reply = %reply.kind(), "lifespan reply");
                Ok(reply)
            }
            Ok(Err(e)) => Err(TrackerError::protocol(format!(
                "lifespan scope stopped answering after {expected}: {e}"
            ))),
            Err(_) => Err(TrackerError::protocol(format!(
                "timed out after {timeout:?} waiting for reply to {expected}"
            ))),
        }
    }

    /// Wait for the lifecycle scope to return, logging how it ended.
    async fn join(self, timeout: Duration) {
        match tokio::time::timeout(timeout, self.task).await {
            Ok(Ok(Ok(()))) => debug!("lifespan scope returned"),
            Ok(Ok(Err(e))) => warn!(error = %e, "lifespan scope raised"),
            Ok(Err(e)) => warn!(error = %e, "lifespan task aborted"),
            Err(_) => warn!(?timeout, "lifespan scope did not return in time"),
        }
    }
}
