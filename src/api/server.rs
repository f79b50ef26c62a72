//! Axum server setup and routing for the demo application.

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::api::handlers::{demo, health};
use crate::api::middleware as api_middleware;
use crate::app_state::AppState;
use crate::error::BoxError;

/// Build the demo router with tracking and request logging.
///
/// Tracking wraps request logging, so logged requests carry the context the
/// tracking layer inserted.
pub fn build_router(state: AppState) -> Router {
    let routes = Router::new()
        .route("/", get(demo::homepage))
        .route("/foo", get(demo::foo))
        .route("/bar", get(demo::bar))
        .route("/baz", post(demo::baz))
        .route("/custom", get(demo::custom))
        .route("/health", get(health::health_check));

    let middleware_stack = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(api_middleware::TrackingLayer::new(state.tracker.clone()))
        .layer(middleware::from_fn(api_middleware::logging::log_requests));

    routes.layer(middleware_stack).with_state(state)
}

/// Run the demo server until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the port cannot be bound or serving fails.
pub async fn run_server(state: AppState, port: u16) -> Result<(), BoxError> {
    let app = build_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!(addr = %addr, "Starting demo server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Demo server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
