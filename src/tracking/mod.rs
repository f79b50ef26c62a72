//! Per-request tracking state.
//!
//! ```text
//! RequestFacts ──► TrackingStateBuilder ──► base fields
//!                                              │
//!   RequestOutcome (gt_ms, status, method) ────┤
//!   TrackingContext.tracking_data ─────────────┤  merge
//!   TrackingContext.custom_tracking_data ──────┘
//!                                              ▼
//!                                        TrackingEvent
//! ```
//!
//! Every layer is applied with last-writer-wins semantics, except the
//! custom-dimension map (`cvar`) which is merged key by key.

pub mod builder;
pub mod context;
pub mod exclusion;
pub mod facts;
pub mod fields;
pub mod merge;
pub mod timing;

pub use builder::TrackingStateBuilder;
pub use context::TrackingContext;
pub use exclusion::ExclusionPolicy;
pub use facts::RequestFacts;
pub use fields::{TrackingFields, CUSTOM_DIMENSIONS_KEY};
pub use merge::{merge, RequestOutcome, TrackingEvent};
pub use timing::PerfMsTracker;
