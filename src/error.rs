//! Error types for the tracking middleware.
//!
//! This module provides a unified error type [`TrackerError`] that covers every
//! failure the middleware itself can produce while building, delivering, or
//! bridging.
//!
//! # Design
//!
//! The error hierarchy is organized by where the failure is contained:
//! - [`TrackerError::ConfigError`]: bad configuration, or a request whose server
//!   identity cannot be resolved (tracking is skipped for that request only)
//! - [`TrackerError::TransportError`]: the collector could not be reached
//! - [`TrackerError::CollectorRejection`]: the collector answered with a non-success status
//! - [`TrackerError::LifecycleHookFailure`]: a startup or shutdown hook failed
//! - [`TrackerError::HandshakeFailed`]: the application reported a failed lifecycle phase
//! - [`TrackerError::ProtocolError`]: a message channel closed or carried an unexpected message
//!
//! Only hook failures leave the middleware. Configuration, transport and
//! rejection errors are logged and discarded inside the tracking path.
//!
//! Errors raised by the wrapped application are *not* represented here. They
//! travel as [`BoxError`] and are handed back to the caller untouched.
//!
//! # Example
//!
//! ```
//! use matomo_middleware::error::{TrackerError, TrackerResult};
//!
//! fn resolve_server(header: Option<&str>) -> TrackerResult<String> {
//!     header
//!         .map(str::to_string)
//!         .ok_or_else(|| TrackerError::config("'server' is not set", None))
//! }
//!
//! assert!(resolve_server(None).is_err());
//! ```

use std::fmt;

/// Result type alias using [`TrackerError`].
pub type TrackerResult<T> = Result<T, TrackerError>;

/// Type-erased error used by the inbound application protocol.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Lifecycle phase a hook belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPhase {
    /// The startup hook, run before the wrapped application is invoked.
    Startup,
    /// The shutdown hook, run on every exit path of the bridge.
    Shutdown,
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Startup => f.write_str("startup"),
            Self::Shutdown => f.write_str("shutdown"),
        }
    }
}

/// Unified error type for the tracking middleware.
#[derive(Debug)]
pub enum TrackerError {
    /// Configuration errors.
    ///
    /// Variants include:
    /// - Missing or invalid environment variables
    /// - Invalid exclusion patterns or route details
    /// - A request without any resolvable server identity
    ConfigError {
        /// Human-readable error message
        message: String,
        /// Optional underlying error
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The delivery attempt failed at the network layer.
    TransportError {
        /// Human-readable error message
        message: String,
        /// Optional underlying error
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The collector was reached but answered with a non-success status.
    CollectorRejection {
        /// HTTP status returned by the collector
        status: u16,
        /// Response body returned by the collector
        body: String,
    },

    /// A startup or shutdown hook failed.
    LifecycleHookFailure {
        /// Which hook failed
        phase: HookPhase,
        /// Human-readable error message
        message: String,
        /// Optional underlying error
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The application answered a lifecycle handshake with a failure message.
    HandshakeFailed {
        /// Which handshake failed
        phase: HookPhase,
        /// Message reported by the application
        message: String,
    },

    /// A protocol channel was closed or delivered an unexpected message.
    ProtocolError {
        /// Human-readable error message
        message: String,
    },
}

impl TrackerError {
    /// Create a new configuration error.
    ///
    /// # Example
    ///
    /// ```
    /// use matomo_middleware::error::TrackerError;
    ///
    /// let err = TrackerError::config("MATOMO_URL not set", None);
    /// assert!(matches!(err, TrackerError::ConfigError { .. }));
    /// ```
    #[must_use]
    pub fn config(
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::ConfigError {
            message: message.into(),
            source,
        }
    }

    /// Create a new transport error.
    ///
    /// # Example
    ///
    /// ```
    /// use matomo_middleware::error::TrackerError;
    ///
    /// let err = TrackerError::transport("connection refused", None);
    /// assert!(matches!(err, TrackerError::TransportError { .. }));
    /// ```
    #[must_use]
    pub fn transport(
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::TransportError {
            message: message.into(),
            source,
        }
    }

    /// Create a new collector rejection error.
    #[must_use]
    pub fn rejected(status: u16, body: impl Into<String>) -> Self {
        Self::CollectorRejection {
            status,
            body: body.into(),
        }
    }

    /// Create a new lifecycle hook failure.
    ///
    /// The message is taken from the source error.
    ///
    /// # Example
    ///
    /// ```
    /// use matomo_middleware::error::{HookPhase, TrackerError};
    ///
    /// let source = std::io::Error::new(std::io::ErrorKind::Other, "boom");
    /// let err = TrackerError::hook(HookPhase::Startup, Box::new(source));
    /// assert_eq!(err.to_string(), "startup hook failed: boom");
    /// ```
    #[must_use]
    pub fn hook(phase: HookPhase, source: Box<dyn std::error::Error + Send + Sync>) -> Self {
        Self::LifecycleHookFailure {
            phase,
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Create a new handshake failure.
    #[must_use]
    pub fn handshake(phase: HookPhase, message: impl Into<String>) -> Self {
        Self::HandshakeFailed {
            phase,
            message: message.into(),
        }
    }

    /// Create a new protocol error.
    #[must_use]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::ProtocolError {
            message: message.into(),
        }
    }
}

impl fmt::Display for TrackerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigError { message, .. } => write!(f, "Configuration error: {message}"),
            Self::TransportError { message, .. } => write!(f, "Transport error: {message}"),
            Self::CollectorRejection { status, body } => {
                write!(f, "Tracking call failed (status_code={status}): {body}")
            }
            Self::LifecycleHookFailure { phase, message, .. } => {
                write!(f, "{phase} hook failed: {message}")
            }
            Self::HandshakeFailed { phase, message } => {
                write!(f, "Lifespan {phase} failed: {message}")
            }
            Self::ProtocolError { message } => write!(f, "Protocol error: {message}"),
        }
    }
}

impl std::error::Error for TrackerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ConfigError { source, .. }
            | Self::TransportError { source, .. }
            | Self::LifecycleHookFailure { source, .. } => source
                .as_ref()
                .map(|e| e.as_ref() as &dyn std::error::Error),
            Self::CollectorRejection { .. }
            | Self::HandshakeFailed { .. }
            | Self::ProtocolError { .. } => None,
        }
    }
}

impl From<reqwest::Error> for TrackerError {
    fn from(err: reqwest::Error) -> Self {
        Self::TransportError {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}
