//! Request logging middleware using tracing.

use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;
use tracing::{info, Span};

use crate::tracking::TrackingContext;

/// Logs incoming requests and response metadata.
///
/// When the tracking layer runs outside this middleware, the fields recorded
/// in the request's tracking context so far are logged as well.
pub async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let context = request.extensions().get::<TrackingContext>().cloned();
    let start = Instant::now();

    Span::current().record("method", method.as_str());
    Span::current().record("uri", uri.path());

    let response = next.run(request).await;

    let duration = start.elapsed();
    let status = response.status();
    let tracked_fields = context.map_or(0, |context| {
        let snapshot = context.snapshot();
        snapshot.tracking_data.fields().len() + snapshot.custom_tracking_data.fields().len()
    });

    info!(
        method = %method,
        uri = %uri,
        status = status.as_u16(),
        duration_ms = duration.as_millis(),
        tracked_fields,
        "Request completed"
    );

    response
}
