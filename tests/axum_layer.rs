//! Request tracking through the tower layer on an axum router.

#![allow(clippy::unwrap_used, clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::routing::get;
use axum::Router;
use matomo_middleware::api::extractors::Tracking;
use matomo_middleware::api::middleware::TrackingLayer;
use matomo_middleware::api::server::build_router;
use matomo_middleware::app_state::AppState;
use matomo_middleware::collector::RecordingCollector;
use matomo_middleware::config::TrackingConfig;
use matomo_middleware::tracker::Tracker;
use matomo_middleware::tracking::TrackingEvent;
use serde_json::{json, Value};
use tower::ServiceExt;

const WAIT: Duration = Duration::from_secs(2);

fn tracker(config: TrackingConfig) -> (Arc<Tracker>, Arc<RecordingCollector>) {
    let collector = Arc::new(RecordingCollector::new());
    let tracker = Tracker::with_collector(config, collector.clone()).unwrap();
    (Arc::new(tracker), collector)
}

fn demo_router() -> (Router, Arc<RecordingCollector>) {
    let config = TrackingConfig::new("https://example.com/tracking/endpoint/", 1)
        .with_exclude_paths(["/health"]);
    let (tracker, collector) = tracker(config);
    (build_router(AppState::new(tracker)), collector)
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("host", "testserver")
        .header("user-agent", "testclient")
        .body(Body::empty())
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn single_event(collector: &RecordingCollector) -> TrackingEvent {
    assert!(collector.wait_for_calls(1, WAIT).await, "no tracking call");
    let events = collector.events();
    assert_eq!(events.len(), 1);
    events.into_iter().next().unwrap()
}

#[tokio::test]
async fn test_plain_route_is_tracked() {
    let (app, collector) = demo_router();

    let response = app.oneshot(get_request("/foo?x=1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let event = single_event(&collector).await;
    assert_eq!(event.get_str("action_name").as_deref(), Some("/foo"));
    assert_eq!(
        event.get_str("url").as_deref(),
        Some("https://testserver/foo?x=1")
    );
    assert_eq!(event.get_str("ua").as_deref(), Some("testclient"));
    assert!(event.get("ca").is_none());
    assert_eq!(
        event.custom_dimensions().get("http_status_code"),
        Some(&json!(200))
    );
}

#[tokio::test]
async fn test_handler_error_is_tracked_with_error_markers() {
    let (app, collector) = demo_router();

    let response = app.oneshot(get_request("/bar")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(response).await,
        json!({"error": "bad_request", "message": "bar"})
    );

    let event = single_event(&collector).await;
    assert_eq!(event.get_str("ca").as_deref(), Some("1"));
    assert_eq!(event.get_str("cra").as_deref(), Some("bad request: bar"));
    assert_eq!(
        event.custom_dimensions().get("http_status_code"),
        Some(&json!(400))
    );
}

#[tokio::test]
async fn test_custom_overrides_from_the_extractor() {
    let (app, collector) = demo_router();

    let response = app.oneshot(get_request("/custom")).await.unwrap();
    assert_eq!(body_json(response).await, json!({"name": "foo"}));

    let event = single_event(&collector).await;
    assert_eq!(event.get_str("action_name").as_deref(), Some("Foo/foo"));
    assert_eq!(event.get_str("e_c").as_deref(), Some("Foo"));
    assert_eq!(event.get_str("e_a").as_deref(), Some("Playing"));

    let dimensions = event.custom_dimensions();
    assert_eq!(dimensions.get("anything"), Some(&json!("goes")));
    assert_eq!(dimensions.get("http_method"), Some(&json!("GET")));
}

#[tokio::test]
async fn test_homepage_records_server_time() {
    let (app, collector) = demo_router();

    let response = app.oneshot(get_request("/")).await.unwrap();
    assert_eq!(body_json(response).await, json!({"data": 4000}));

    let event = single_event(&collector).await;
    let pf_srv = event.get("pf_srv").and_then(Value::as_u64).unwrap();
    assert!(pf_srv >= 200, "pf_srv was {pf_srv}");
}

#[tokio::test]
async fn test_post_body_reaches_the_handler() {
    let (app, collector) = demo_router();

    let request = Request::builder()
        .method("POST")
        .uri("/baz")
        .header("host", "testserver")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"name": "foo"}"#))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(
        body_json(response).await,
        json!({"data": {"name": "foo"}})
    );

    let event = single_event(&collector).await;
    assert_eq!(
        event.custom_dimensions().get("http_method"),
        Some(&json!("POST"))
    );
}

#[tokio::test]
async fn test_excluded_health_check_is_not_tracked() {
    let (app, collector) = demo_router();

    let response = app.oneshot(get_request("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], json!("healthy"));
    assert_eq!(body["tracked"], json!(false));

    assert!(!collector.wait_for_calls(1, Duration::from_millis(100)).await);
}

async fn explode() -> &'static str {
    panic!("handler exploded")
}

#[tokio::test]
async fn test_panicking_handler_is_tracked_as_500_and_resumes() {
    let config = TrackingConfig::new("https://example.com/tracking/endpoint/", 1);
    let (tracker, collector) = tracker(config);
    let app = Router::new()
        .route("/explode", get(explode))
        .layer(TrackingLayer::new(tracker));

    let outcome = tokio::spawn(app.oneshot(get_request("/explode"))).await;
    assert!(outcome.unwrap_err().is_panic());

    let event = single_event(&collector).await;
    assert_eq!(
        event.custom_dimensions().get("http_status_code"),
        Some(&json!(500))
    );
    assert_eq!(event.get_str("cra").as_deref(), Some("handler exploded"));
}

#[tokio::test]
async fn test_extractor_shares_the_layer_context() {
    let config = TrackingConfig::new("https://example.com/tracking/endpoint/", 1);
    let (tracker, collector) = tracker(config);
    let app = Router::new()
        .route(
            "/checkout",
            get(|Tracking(tracking): Tracking| async move {
                tracking.set("revenue", 42);
                tracking.set_custom_dimension("plan", "pro");
                "ok"
            }),
        )
        .layer(TrackingLayer::new(tracker));

    app.oneshot(get_request("/checkout")).await.unwrap();

    let event = single_event(&collector).await;
    assert_eq!(event.get("revenue"), Some(&json!(42)));
    assert_eq!(event.custom_dimensions().get("plan"), Some(&json!("pro")));
}

#[tokio::test]
async fn test_missing_host_skips_tracking() {
    let config = TrackingConfig::new("https://example.com/tracking/endpoint/", 1);
    let (tracker, collector) = tracker(config);
    let app = Router::new()
        .route("/foo", get(|| async { "foo" }))
        .layer(TrackingLayer::new(tracker));

    let request = Request::builder().uri("/foo").body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    assert!(!collector.wait_for_calls(1, Duration::from_millis(100)).await);
}
