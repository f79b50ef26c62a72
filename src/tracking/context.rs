//! Request-scoped tracking context.
//!
//! Handlers receive a [`TrackingContext`] (through the protocol scope or the
//! [`Tracking`](crate::api::extractors::Tracking) extractor) and use it to adjust
//! the event that will be sent once the request completes.
//!
//! ## Regions
//!
//! - `tracking_data`: values written while handling, e.g. by [`PerfMsTracker`]
//!   timers or [`TrackingContext::set`].
//! - `custom_tracking_data`: explicit overrides, applied last, e.g. a custom
//!   action name or extra custom dimensions.
//!
//! ## Example
//!
//! ```
//! use matomo_middleware::tracking::TrackingContext;
//! use serde_json::json;
//!
//! let context = TrackingContext::default();
//! context.set_custom("action_name", "Foo/foo");
//! context.set_custom("cvar", json!({"anything": "goes"}));
//!
//! let snapshot = context.snapshot();
//! assert_eq!(snapshot.custom_tracking_data.get("action_name"), Some(&json!("Foo/foo")));
//! ```
//!
//! [`PerfMsTracker`]: crate::tracking::timing::PerfMsTracker

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use crate::tracking::fields::TrackingFields;

/// Copy of both context regions taken when the request completes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextSnapshot {
    /// Values written during handling.
    pub tracking_data: TrackingFields,
    /// Explicit overrides, applied last.
    pub custom_tracking_data: TrackingFields,
}

/// Shared, mutable per-request tracking area.
///
/// Cloning yields another handle to the same context.
#[derive(Debug, Clone, Default)]
pub struct TrackingContext {
    inner: Arc<Mutex<ContextSnapshot>>,
}

impl TrackingContext {
    /// Write a value into `tracking_data`.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.inner.lock().tracking_data.set(key, value);
    }

    /// Write a value into `custom_tracking_data`.
    ///
    /// An object written under `cvar` is merged into the custom dimensions.
    pub fn set_custom(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.inner.lock().custom_tracking_data.set(key, value);
    }

    /// Write one custom dimension into `custom_tracking_data`.
    pub fn set_custom_dimension(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.inner
            .lock()
            .custom_tracking_data
            .set_custom_dimension(key, value);
    }

    /// Edit `custom_tracking_data` in place.
    pub fn update_custom<R>(&self, f: impl FnOnce(&mut TrackingFields) -> R) -> R {
        f(&mut self.inner.lock().custom_tracking_data)
    }

    /// Copy both regions.
    #[must_use]
    pub fn snapshot(&self) -> ContextSnapshot {
        self.inner.lock().clone()
    }

    /// Whether both handles point at the same context.
    #[must_use]
    pub fn same_context(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
