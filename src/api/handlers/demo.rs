//! Demo endpoints showing what handlers can do with the tracking context.

use std::time::Duration;

use axum::Json;
use serde_json::{json, Value};
use tracing::debug;

use crate::api::extractors::Tracking;
use crate::api::middleware::error::ApiError;

/// Pretend to fetch or compute data.
async fn fetch_data() -> Value {
    tokio::time::sleep(Duration::from_millis(200)).await;
    json!({"data": 4000})
}

/// Measures data fetching under `pf_srv`.
pub async fn homepage(Tracking(tracking): Tracking) -> Json<Value> {
    let data = tracking.measure("pf_srv", fetch_data()).await;
    debug!("homepage data fetched");
    Json(data)
}

/// Plain endpoint without any tracking adjustments.
pub async fn foo() -> &'static str {
    "foo"
}

/// Always fails with 400.
pub async fn bar() -> Result<&'static str, ApiError> {
    Err(ApiError::BadRequest("bar".to_string()))
}

/// Echoes the posted JSON document.
pub async fn baz(Json(data): Json<Value>) -> Json<Value> {
    Json(json!({"data": data}))
}

/// Overrides the reported action and adds custom dimensions.
pub async fn custom(Tracking(tracking): Tracking) -> Json<Value> {
    tracking.update_custom(|fields| {
        fields.set("action_name", "Foo/foo");
        fields.set("e_c", "Foo");
        fields.set("e_a", "Playing");
        fields.set("cvar", json!({"anything": "goes"}));
    });
    Json(json!({"name": "foo"}))
}
