//! Custom extractors for handlers.

use std::convert::Infallible;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::tracking::TrackingContext;

/// The request's [`TrackingContext`].
///
/// Handlers write overrides and timings into it. Without the tracking layer a
/// fresh context is created and stored in the request, so repeated extraction
/// still yields the same context.
///
/// ```
/// use matomo_middleware::api::extractors::Tracking;
/// use serde_json::json;
///
/// async fn foo(Tracking(tracking): Tracking) -> &'static str {
///     tracking.set_custom("action_name", "Foo/foo");
///     tracking.set_custom("cvar", json!({"anything": "goes"}));
///     "foo"
/// }
/// ```
#[derive(Debug, Clone)]
pub struct Tracking(pub TrackingContext);

#[axum::async_trait]
impl<S> FromRequestParts<S> for Tracking
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(context) = parts.extensions.get::<TrackingContext>() {
            return Ok(Self(context.clone()));
        }
        let context = TrackingContext::default();
        parts.extensions.insert(context.clone());
        Ok(Self(context))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;

    #[tokio::test]
    async fn test_extraction_is_idempotent() {
        let (mut parts, _body) = Request::builder()
            .uri("/foo")
            .body(Body::empty())
            .unwrap()
            .into_parts();

        let Tracking(first) = Tracking::from_request_parts(&mut parts, &()).await.unwrap();
        let Tracking(second) = Tracking::from_request_parts(&mut parts, &()).await.unwrap();
        assert!(first.same_context(&second));
    }

    #[tokio::test]
    async fn test_reuses_layer_context() {
        let context = TrackingContext::default();
        let mut request = Request::builder().uri("/foo").body(Body::empty()).unwrap();
        request.extensions_mut().insert(context.clone());
        let (mut parts, _body) = request.into_parts();

        let Tracking(extracted) = Tracking::from_request_parts(&mut parts, &()).await.unwrap();
        assert!(extracted.same_context(&context));
    }
}
