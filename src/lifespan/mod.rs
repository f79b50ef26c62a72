//! Process lifecycle handling.
//!
//! - [`bridge`]: adapts the wrapped application's startup/shutdown handshake to
//!   the host and runs the middleware's own hooks around it
//! - [`manager`]: host-side driver of the handshake, used by the binary and tests
//!
//! Hooks are registered as [`LifespanHooks`] implementations. The tracking
//! middleware always registers [`CollectorLifespan`] so the delivery client is
//! closed exactly once at shutdown.

pub mod bridge;
pub mod manager;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info};

use crate::collector::Collector;
use crate::error::BoxError;

pub use bridge::{BridgeState, HandshakeLog, InnerOutcome, LifecycleBridge};
pub use manager::LifespanManager;

/// Work to run when the process starts and stops.
#[async_trait]
pub trait LifespanHooks: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Runs before the wrapped application is invoked.
    ///
    /// # Errors
    ///
    /// A failure aborts the handshake with `lifespan.startup.failed`.
    async fn startup(&self) -> Result<(), BoxError> {
        Ok(())
    }

    /// Runs after the wrapped application finished, on every exit path.
    ///
    /// # Errors
    ///
    /// A failure is reported with the matching failure message.
    async fn shutdown(&self) -> Result<(), BoxError> {
        Ok(())
    }
}

/// Hooks that do nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl LifespanHooks for NoHooks {
    fn name(&self) -> &str {
        "none"
    }
}

/// Closes the delivery client at shutdown.
#[derive(Debug, Clone)]
pub struct CollectorLifespan {
    collector: Arc<dyn Collector>,
}

impl CollectorLifespan {
    /// Close `collector` at shutdown.
    #[must_use]
    pub fn new(collector: Arc<dyn Collector>) -> Self {
        Self { collector }
    }
}

#[async_trait]
impl LifespanHooks for CollectorLifespan {
    fn name(&self) -> &str {
        "tracking-client"
    }

    async fn shutdown(&self) -> Result<(), BoxError> {
        self.collector.close().await;
        Ok(())
    }
}

/// Several hooks run as one.
///
/// Startup runs in registration order and stops at the first failure. Shutdown
/// runs in reverse order, always runs every hook and reports the first failure.
#[derive(Clone, Default)]
pub struct HookChain {
    hooks: Vec<Arc<dyn LifespanHooks>>,
}

impl HookChain {
    /// Create an empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a hook.
    #[must_use]
    pub fn with(mut self, hooks: Arc<dyn LifespanHooks>) -> Self {
        debug!(hook = hooks.name(), "registered lifespan hook");
        self.hooks.push(hooks);
        self
    }

    /// Number of registered hooks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    /// Whether no hooks are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}

impl std::fmt::Debug for HookChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.hooks.iter().map(|hooks| hooks.name()))
            .finish()
    }
}

#[async_trait]
impl LifespanHooks for HookChain {
    fn name(&self) -> &str {
        "chain"
    }

    async fn startup(&self) -> Result<(), BoxError> {
        for hooks in &self.hooks {
            info!(hook = hooks.name(), "running startup hook");
            hooks.startup().await?;
        }
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), BoxError> {
        let mut first_error = None;
        for hooks in self.hooks.iter().rev() {
            info!(hook = hooks.name(), "running shutdown hook");
            if let Err(e) = hooks.shutdown().await {
                error!(hook = hooks.name(), error = %e, "shutdown hook failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::collector::RecordingCollector;
    use parking_lot::Mutex;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        fail_startup: bool,
        fail_shutdown: bool,
    }

    #[async_trait]
    impl LifespanHooks for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        async fn startup(&self) -> Result<(), BoxError> {
            self.log.lock().push(format!("{}:startup", self.name));
            if self.fail_startup {
                return Err(format!("{} refused to start", self.name).into());
            }
            Ok(())
        }

        async fn shutdown(&self) -> Result<(), BoxError> {
            self.log.lock().push(format!("{}:shutdown", self.name));
            if self.fail_shutdown {
                return Err(format!("{} refused to stop", self.name).into());
            }
            Ok(())
        }
    }

    fn recorder(
        name: &'static str,
        log: &Arc<Mutex<Vec<String>>>,
        fail_startup: bool,
        fail_shutdown: bool,
    ) -> Arc<dyn LifespanHooks> {
        Arc::new(Recorder {
            name,
            log: log.clone(),
            fail_startup,
            fail_shutdown,
        })
    }

    #[tokio::test]
    async fn test_chain_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = HookChain::new()
            .with(recorder("db", &log, false, false))
            .with(recorder("cache", &log, false, false));

        chain.startup().await.unwrap();
        chain.shutdown().await.unwrap();

        assert_eq!(
            *log.lock(),
            ["db:startup", "cache:startup", "cache:shutdown", "db:shutdown"]
        );
    }

    #[tokio::test]
    async fn test_chain_startup_stops_at_first_failure() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = HookChain::new()
            .with(recorder("db", &log, true, false))
            .with(recorder("cache", &log, false, false));

        let err = chain.startup().await.unwrap_err();
        assert_eq!(err.to_string(), "db refused to start");
        assert_eq!(*log.lock(), ["db:startup"]);
    }

    #[tokio::test]
    async fn test_chain_shutdown_runs_all_hooks() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = HookChain::new()
            .with(recorder("db", &log, false, true))
            .with(recorder("cache", &log, false, true));

        let err = chain.shutdown().await.unwrap_err();
        assert_eq!(err.to_string(), "cache refused to stop");
        assert_eq!(*log.lock(), ["cache:shutdown", "db:shutdown"]);
    }

    #[tokio::test]
    async fn test_collector_lifespan_closes_client() {
        let collector = Arc::new(RecordingCollector::new());
        let hooks = CollectorLifespan::new(collector.clone());

        hooks.startup().await.unwrap();
        assert!(!collector.is_closed());
        hooks.shutdown().await.unwrap();
        assert!(collector.is_closed());
    }
}
