//! Demo server for the Matomo tracking middleware.
//!
//! ```text
//! main.rs (runtime + tracing)
//!     ↓
//! cli::run()
//!     ↓
//! TrackingConfig::from_env() → Tracker → LifespanManager (startup)
//!     ↓
//! axum router + TrackingLayer, served until Ctrl-C
//!     ↓
//! LifespanManager (shutdown) closes the delivery client
//! ```

use matomo_middleware::{cli, observability};
use tracing::error;

/// Entry point of the demo server.
///
/// Logging is controlled via environment variables:
/// - `RUST_LOG`: log level or filter directives
/// - `LOG_JSON`: JSON console output (`true`/`false`)
/// - `LOG_FILE`: additionally write JSON logs with daily rotation
#[tokio::main]
async fn main() {
    //   RUST_LOG=debug cargo run -- serve --dry-run
    //   RUST_LOG=matomo_middleware::collector=debug cargo run -- serve
    //   LOG_JSON=true LOG_FILE=./logs/tracking.log cargo run -- serve
    let log_level = std::env::var("RUST_LOG").ok();
    let log_file = std::env::var("LOG_FILE").ok().map(std::path::PathBuf::from);
    let json_output = std::env::var("LOG_JSON")
        .unwrap_or_else(|_| "false".to_string())
        .parse::<bool>()
        .unwrap_or(false);

    // Held until exit so buffered file output is flushed
    let _log_guard = match observability::init_tracing(log_level, log_file, json_output) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize tracing: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = cli::run().await {
        error!(error = %e, "Application error");
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
