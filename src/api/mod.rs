//! axum integration: tracking layer, extractor and a small demo server.

pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod server;
