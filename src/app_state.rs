//! Shared state of the demo server.

use std::sync::Arc;
use std::time::SystemTime;

use crate::tracker::Tracker;

/// Shared application state for API handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Tracker reporting the requests.
    pub tracker: Arc<Tracker>,
    /// Application start time for uptime tracking.
    pub start_time: SystemTime,
}

impl AppState {
    /// Create a new `AppState` instance.
    #[must_use]
    pub fn new(tracker: Arc<Tracker>) -> Self {
        Self {
            tracker,
            start_time: SystemTime::now(),
        }
    }
}
