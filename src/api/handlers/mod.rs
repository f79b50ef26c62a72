//! HTTP handlers of the demo server.

pub mod demo;
pub mod health;
