//! Command-line interface of the demo tracking server.
//!
//! # Commands
//!
//! - `serve`: run the demo axum server with request tracking
//! - `check-config`: print the configuration loaded from the environment
//!
//! # Example
//!
//! ```bash
//! # Serve on port 8000, posting events to MATOMO_URL
//! matomo-middleware serve --port 8000
//!
//! # Serve without contacting the collector
//! matomo-middleware serve --dry-run
//!
//! # Show the effective configuration
//! matomo-middleware check-config
//! ```

use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::{error, info};

use crate::api::server::run_server;
use crate::app_state::AppState;
use crate::collector::{Collector, RecordingCollector};
use crate::config::{MethodFilter, TrackingConfig};
use crate::error::BoxError;
use crate::lifespan::LifespanManager;
use crate::middleware::TrackingMiddleware;
use crate::protocol::{app_fn, Application, Scope};
use crate::tracker::Tracker;

/// Matomo request tracking demo
#[derive(Parser, Debug)]
#[command(name = "matomo-middleware")]
#[command(about = "Demo server reporting every request to a Matomo collector", long_about = None)]
#[command(version)]
struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the demo server with request tracking
    Serve {
        /// Port to listen on (default: 8000)
        #[arg(short, long, default_value = "8000")]
        port: u16,

        /// Record events in memory instead of posting them
        #[arg(long)]
        dry_run: bool,
    },

    /// Print the configuration loaded from the environment
    CheckConfig,
}

/// Parse CLI arguments and execute the appropriate command.
///
/// # Errors
///
/// Returns an error if:
/// - Configuration loading fails
/// - The lifecycle handshake fails
/// - The server cannot be started
pub async fn run() -> Result<(), BoxError> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { port, dry_run } => run_serve_command(port, dry_run).await,
        Commands::CheckConfig => run_check_config_command(),
    }
}

/// Execute the serve command.
async fn run_serve_command(port: u16, dry_run: bool) -> Result<(), BoxError> {
    let config = TrackingConfig::from_env()?;

    let recorder = dry_run.then(|| Arc::new(RecordingCollector::new()));
    let tracker = match &recorder {
        Some(recorder) => {
            let collector: Arc<dyn Collector> = recorder.clone();
            Tracker::with_collector(config, collector)?
        }
        None => Tracker::new(config)?,
    };
    let tracker = Arc::new(tracker);

    // The demo app has no lifecycle of its own; the bridge completes the
    // handshake for it and closes the delivery client at shutdown.
    let app = app_fn(|scope, _receive, _send| async move {
        match scope {
            Scope::Lifespan => Ok(()),
            other => Err(format!("{} scopes are served by axum", other.kind()).into()),
        }
    });
    let middleware: Arc<dyn Application> =
        Arc::new(TrackingMiddleware::new(Arc::new(app), tracker.clone()));
    let lifespan = LifespanManager::start(middleware).await?;

    println!(
        "{} {} {}",
        "▶ Serving on port".cyan().bold(),
        port.to_string().bold(),
        if dry_run {
            "(dry run)".yellow().to_string()
        } else {
            format!("→ {}", tracker.config().matomo_url()).dimmed().to_string()
        }
    );

    let served = run_server(AppState::new(tracker), port).await;
    if let Err(e) = &served {
        error!(error = %e, "Server stopped with an error");
    }

    lifespan.shutdown().await?;
    info!("Shutdown complete");

    if let Some(recorder) = recorder {
        println!(
            "{} {}",
            "Events recorded:".cyan(),
            recorder.call_count().to_string().bold()
        );
    }

    served
}

/// Execute the check-config command.
fn run_check_config_command() -> Result<(), BoxError> {
    let config = TrackingConfig::from_env()?;
    print_config(&config);
    Ok(())
}

fn print_config(config: &TrackingConfig) {
    let unset = || "(unset)".dimmed().to_string();
    let list = |items: &[String]| {
        if items.is_empty() {
            unset()
        } else {
            items.join(", ")
        }
    };

    println!("{}", "Tracking configuration".green().bold());
    println!("  {:<18} {}", "collector:".bold(), config.matomo_url());
    println!("  {:<18} {}", "site id:".bold(), config.site_id());
    println!(
        "  {:<18} {}",
        "access token:".bold(),
        if config.access_token().is_some() {
            "set".to_string()
        } else {
            unset()
        }
    );
    println!("  {:<18} {}", "assume https:".bold(), config.assume_https());
    println!(
        "  {:<18} {}",
        "http timeout:".bold(),
        config
            .http_timeout()
            .map_or_else(unset, |timeout| format!("{}s", timeout.as_secs()))
    );
    println!("  {:<18} {}", "exclude paths:".bold(), list(config.exclude_paths()));
    println!(
        "  {:<18} {}",
        "exclude patterns:".bold(),
        list(config.exclude_patterns())
    );

    let allowed = match config.allowed_methods() {
        MethodFilter::All => "all".to_string(),
        MethodFilter::Only(methods) => sorted_methods(methods.iter()),
    };
    println!("  {:<18} {}", "allowed methods:".bold(), allowed);
    let ignored = config.ignored_methods();
    println!(
        "  {:<18} {}",
        "ignored methods:".bold(),
        if ignored.is_empty() {
            unset()
        } else {
            sorted_methods(ignored.iter())
        }
    );

    let mut routes: Vec<&String> = config.route_details().keys().collect();
    routes.sort();
    if routes.is_empty() {
        println!("  {:<18} {}", "route details:".bold(), unset());
    } else {
        println!("  {}", "route details:".bold());
        for route in routes {
            println!("    {}", route.yellow());
        }
    }
}

fn sorted_methods<'a>(methods: impl Iterator<Item = &'a axum::http::Method>) -> String {
    let mut names: Vec<&str> = methods.map(axum::http::Method::as_str).collect();
    names.sort_unstable();
    names.join(", ")
}
