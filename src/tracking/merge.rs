//! Combining base fields, middleware stamps and context overrides into the
//! final event.
//!
//! Precedence, lowest first:
//!
//! 1. base fields from [`TrackingStateBuilder`](crate::tracking::TrackingStateBuilder),
//!    static route details included
//! 2. middleware stamps: `gt_ms`, `cvar.http_status_code`, `cvar.http_method`
//! 3. context `tracking_data`
//! 4. context `custom_tracking_data`
//! 5. error markers `ca` / `cra` when the application failed
//!
//! Flat fields are last-writer-wins. The `cvar` map is merged key by key at
//! every step and finally serialized as a JSON string.

use std::collections::BTreeMap;
use std::time::Duration;

use axum::http::{Method, StatusCode};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::tracking::context::ContextSnapshot;
use crate::tracking::fields::{TrackingFields, CUSTOM_DIMENSIONS_KEY};
use crate::tracking::timing::as_millis;

/// What the middleware observed about a finished request.
#[derive(Debug, Clone)]
pub struct RequestOutcome {
    /// Status emitted by the application, or 500 if none was.
    pub status: StatusCode,
    /// Request method.
    pub method: Method,
    /// Time spent in the application.
    pub elapsed: Duration,
    /// Description of the application failure, if it failed.
    pub error: Option<String>,
}

impl RequestOutcome {
    /// Outcome of a request that completed without error.
    #[must_use]
    pub const fn completed(status: StatusCode, method: Method, elapsed: Duration) -> Self {
        Self {
            status,
            method,
            elapsed,
            error: None,
        }
    }

    /// Attach an application failure.
    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// The flat record sent to the collector.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct TrackingEvent {
    fields: BTreeMap<String, Value>,
}

impl TrackingEvent {
    /// Value of a field.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Value of a field as text, the way it is sent on the wire.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<String> {
        self.fields.get(key).and_then(form_value)
    }

    /// All fields.
    #[must_use]
    pub const fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    /// Custom dimensions, decoded back from the serialized `cvar` field.
    #[must_use]
    pub fn custom_dimensions(&self) -> Map<String, Value> {
        self.fields
            .get(CUSTOM_DIMENSIONS_KEY)
            .and_then(Value::as_str)
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default()
    }

    /// Fields as form pairs.
    ///
    /// Strings are sent verbatim, numbers as decimal text, booleans as `1`/`0`,
    /// objects and arrays as JSON text. Null fields are left out.
    #[must_use]
    pub fn to_form(&self) -> Vec<(String, String)> {
        self.fields
            .iter()
            .filter_map(|(key, value)| form_value(value).map(|text| (key.clone(), text)))
            .collect()
    }
}

fn form_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        Value::Bool(flag) => Some(if *flag { "1" } else { "0" }.to_string()),
        Value::Number(number) => Some(number.to_string()),
        Value::Array(_) | Value::Object(_) => Some(value.to_string()),
    }
}

/// Merge the base fields, the outcome and the context into one event.
#[must_use]
pub fn merge(
    base: TrackingFields,
    outcome: &RequestOutcome,
    context: Option<&ContextSnapshot>,
) -> TrackingEvent {
    let mut state = base;

    state.set("gt_ms", as_millis(outcome.elapsed));
    state.set_custom_dimension("http_status_code", outcome.status.as_u16());
    state.set_custom_dimension("http_method", outcome.method.as_str());

    if let Some(context) = context {
        state.apply(&context.tracking_data);
        state.apply(&context.custom_tracking_data);
    }

    if let Some(error) = &outcome.error {
        state.set("ca", 1);
        state.set("cra", error.as_str());
    }

    let (fields, custom_dimensions) = state.into_parts();
    let mut fields: BTreeMap<String, Value> = fields.into_iter().collect();
    fields.insert(
        CUSTOM_DIMENSIONS_KEY.to_string(),
        Value::String(Value::Object(custom_dimensions).to_string()),
    );

    TrackingEvent { fields }
}
