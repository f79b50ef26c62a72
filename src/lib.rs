//! # Matomo Tracking Middleware
//!
//! Request-tracking middleware that forwards every request unchanged to the
//! wrapped application, then reports a page view to a Matomo collector
//! without delaying or altering the response.
//!
//! ## Features
//!
//! - **Two integrations**: a tower layer for axum routers and a protocol-level
//!   [`middleware::TrackingMiddleware`] wrapping any [`protocol::Application`]
//! - **Lifecycle bridging**: the startup/shutdown handshake is reconciled for
//!   inner applications that implement it, fail it, or ignore it
//! - **Per-request overrides** written by handlers through a shared
//!   [`tracking::TrackingContext`], with key-by-key custom dimensions
//! - **Best effort delivery**: one POST per request, failures are logged and
//!   never reach the client
//!
//! ## Architecture
//!
//! 1. **Config** ([`config`]) - options, loaded in code or from the environment
//! 2. **Tracking** ([`tracking`]) - request facts, base fields, merge, timers
//! 3. **Delivery** ([`collector`]) - the outbound transport
//! 4. **Core** ([`tracker`]) - shared state and the finalize-once pending event
//! 5. **Interceptors** ([`middleware`], [`api::middleware`])
//! 6. **Lifecycle** ([`lifespan`]) - handshake bridge and host-side driver
//!
//! ## Quick Start
//!
//! ```bash
//! MATOMO_URL=https://matomo.example.org/matomo.php MATOMO_SITE_ID=1 \
//!     cargo run -- serve --port 8000
//! ```
//!
//! ### Using as a Library
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use axum::{routing::get, Router};
//! use matomo_middleware::{api::extractors::Tracking, api::middleware::TrackingLayer};
//! use matomo_middleware::{config::TrackingConfig, tracker::Tracker};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let config = TrackingConfig::new("https://matomo.example.org/matomo.php", 1)
//!         .with_exclude_paths(["/health"]);
//!     let tracker = Arc::new(Tracker::new(config)?);
//!
//!     let app: Router = Router::new()
//!         .route("/", get(|Tracking(tracking): Tracking| async move {
//!             tracking.set_custom("action_name", "Home");
//!             "hello"
//!         }))
//!         .layer(TrackingLayer::new(tracker));
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8000").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Environment Setup
//!
//! ```text
//! MATOMO_URL=https://matomo.example.org/matomo.php
//! MATOMO_SITE_ID=1
//! ```
//!
//! See [`config`] for every optional variable.
//!
//! ## Error Handling
//!
//! Fallible operations return [`error::TrackerResult<T>`](error::TrackerResult).
//! Errors raised by the wrapped application travel as [`error::BoxError`] and
//! are handed back unchanged:
//!
//! ```rust
//! use matomo_middleware::error::{TrackerError, TrackerResult};
//!
//! fn example() -> TrackerResult<()> {
//!     Err(TrackerError::config("'server' is not set in scope", None))
//! }
//! assert!(example().is_err());
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod api;
pub mod app_state;
pub mod cli;
pub mod collector;
pub mod config;
pub mod error;
pub mod lifespan;
pub mod middleware;
pub mod observability;
pub mod protocol;
pub mod tracker;
pub mod tracking;
