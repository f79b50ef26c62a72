//! Axum middleware: request tracking, request logging and error responses.

pub mod error;
pub mod logging;
pub mod tracking;

pub use tracking::{TrackingLayer, TrackingService};
