//! Base event fields derived from an inbound request.
//!
//! The builder is a pure function of the [`RequestFacts`] and the static
//! configuration, apart from the random anti-cache token.
//!
//! ## Fields
//!
//! | Field | Source |
//! |---|---|
//! | `idsite` | configured site id |
//! | `action_name` | request path |
//! | `url` | scheme + server + root path + path + query |
//! | `rec`, `apiv` | always `1` |
//! | `rand` | random 32-bit integer |
//! | `send_image` | always `0` |
//! | `ua`, `lang`, `urlref` | request headers, when present |
//! | `token_auth`, `cip` | access token and client address, only when both exist |
//!
//! Static route details for the request path are applied last.

use std::collections::HashMap;

use tracing::{debug, error};

use crate::config::TrackingConfig;
use crate::error::{TrackerError, TrackerResult};
use crate::tracking::facts::RequestFacts;
use crate::tracking::fields::TrackingFields;

/// Builds the base [`TrackingFields`] of a request.
#[derive(Debug, Clone)]
pub struct TrackingStateBuilder {
    site_id: u64,
    assume_https: bool,
    access_token: Option<String>,
    route_details: HashMap<String, TrackingFields>,
}

impl TrackingStateBuilder {
    /// Create a builder for `site_id` with `https` URLs and no route details.
    #[must_use]
    pub fn new(site_id: u64) -> Self {
        Self {
            site_id,
            assume_https: true,
            access_token: None,
            route_details: HashMap::new(),
        }
    }

    /// Create a builder from the configuration.
    #[must_use]
    pub fn from_config(config: &TrackingConfig) -> Self {
        Self {
            site_id: config.site_id(),
            assume_https: config.assume_https(),
            access_token: config.access_token().map(str::to_string),
            route_details: config.route_details().clone(),
        }
    }

    /// Build the base fields for one request.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if no server identity can be resolved.
    pub fn build(&self, facts: &RequestFacts) -> TrackerResult<TrackingFields> {
        let server = resolve_server(facts)?;
        let client = resolve_client(facts);

        let path = if facts.root_path.is_empty() {
            facts.path.clone()
        } else {
            debug!(root_path = %facts.root_path, "using root_path");
            format!("{}{}", facts.root_path, facts.path)
        };

        let scheme = if self.assume_https {
            "https"
        } else {
            facts.scheme.as_str()
        };

        debug!(
            server = %server,
            path = %path,
            user_agent = ?facts.user_agent(),
            accept_lang = ?facts.accept_language(),
            "building url"
        );
        let url = absolute_url(scheme, &server, &path, &facts.query_string);

        let mut state = TrackingFields::new();
        state.set("idsite", self.site_id);
        state.set("action_name", facts.path.as_str());
        state.set("url", url);
        state.set("rec", 1);
        state.set("rand", rand::random::<u32>());
        state.set("apiv", 1);
        state.set("send_image", 0);

        if let Some(user_agent) = facts.user_agent() {
            state.set("ua", user_agent);
        }
        if let (Some(token), Some(client)) = (self.access_token.as_deref(), client) {
            state.set("token_auth", token);
            state.set("cip", client);
        }
        if let Some(lang) = facts.accept_language() {
            state.set("lang", lang);
        }
        if let Some(referer) = facts.referer() {
            state.set("urlref", referer);
        }

        if let Some(details) = self.route_details.get(&facts.path) {
            state.apply(details);
        }

        Ok(state)
    }
}

/// Server the request was addressed to.
///
/// Prefers `X-Forwarded-Server` over the connection's server address and keeps
/// only the first of several comma-separated entries.
///
/// # Errors
///
/// Returns a configuration error if neither is available.
pub fn resolve_server(facts: &RequestFacts) -> TrackerResult<String> {
    let server = match facts.forwarded_server() {
        Some(forwarded) => forwarded.to_string(),
        None => {
            let Some((host, port)) = facts.server.as_ref() else {
                error!(path = %facts.path, "'server' is not set in scope, skip tracking...");
                return Err(TrackerError::config("'server' is not set in scope", None));
            };
            debug!(host = %host, port = ?port, "setting server from scope");
            port.map_or_else(|| host.clone(), |port| format!("{host}:{port}"))
        }
    };

    if server.contains(',') {
        debug!(server_orig = %server, "splitting server addresses, using first");
        return Ok(server
            .split(',')
            .next()
            .map(str::trim)
            .unwrap_or_default()
            .to_string());
    }

    Ok(server)
}

/// Client address: `X-Forwarded-For`, else the connection peer.
#[must_use]
pub fn resolve_client(facts: &RequestFacts) -> Option<String> {
    facts
        .forwarded_for()
        .map(str::to_string)
        .or_else(|| facts.client.as_ref().map(|(host, _port)| host.clone()))
}

/// Compose `scheme://server/path?query`.
#[must_use]
pub fn absolute_url(scheme: &str, server: &str, path: &str, query: &str) -> String {
    if query.is_empty() {
        format!("{scheme}://{server}{path}")
    } else {
        format!("{scheme}://{server}{path}?{query}")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use axum::http::Method;
    use serde_json::json;

    fn facts(path: &str) -> crate::tracking::facts::RequestFactsBuilder {
        RequestFacts::builder(Method::GET, path).server("testserver", None)
    }

    #[test]
    fn test_mandatory_fields() {
        let state = TrackingStateBuilder::new(1).build(&facts("/foo").build()).unwrap();

        assert_eq!(state.get("idsite"), Some(&json!(1)));
        assert_eq!(state.get("action_name"), Some(&json!("/foo")));
        assert_eq!(state.get("url"), Some(&json!("https://testserver/foo")));
        assert_eq!(state.get("rec"), Some(&json!(1)));
        assert_eq!(state.get("apiv"), Some(&json!(1)));
        assert_eq!(state.get("send_image"), Some(&json!(0)));
        assert!(state.get("rand").is_some_and(serde_json::Value::is_u64));
        assert!(state.get("ua").is_none());
        assert!(state.get("lang").is_none());
        assert!(state.get("urlref").is_none());
        assert!(state.get("cip").is_none());
    }

    #[test]
    fn test_url_uses_request_scheme_port_root_path_and_query() {
        let builder = TrackingStateBuilder::from_config(
            &TrackingConfig::new("http://trackingserver", 1).with_assume_https(false),
        );
        let request = RequestFacts::builder(Method::GET, "/foo")
            .scheme("http")
            .server("localhost", Some(8000))
            .root_path("/api")
            .query("a=1&b=2")
            .build();

        let state = builder.build(&request).unwrap();
        assert_eq!(
            state.get("url"),
            Some(&json!("http://localhost:8000/api/foo?a=1&b=2"))
        );
        assert_eq!(state.get("action_name"), Some(&json!("/foo")));
    }

    #[test]
    fn test_forwarded_server_takes_first_entry() {
        let request = facts("/foo")
            .header("x-forwarded-server", "proxy.example.org, internal.local")
            .build();

        let state = TrackingStateBuilder::new(1).build(&request).unwrap();
        assert_eq!(
            state.get("url"),
            Some(&json!("https://proxy.example.org/foo"))
        );
    }

    #[test]
    fn test_missing_server_is_config_error() {
        let request = RequestFacts::builder(Method::GET, "/foo").build();
        let result = TrackingStateBuilder::new(1).build(&request);
        assert!(matches!(result, Err(TrackerError::ConfigError { .. })));
    }

    #[test]
    fn test_token_and_client_only_together() {
        let config = TrackingConfig::new("http://trackingserver", 1).with_access_token("secret");
        let builder = TrackingStateBuilder::from_config(&config);

        let without_client = builder.build(&facts("/foo").build()).unwrap();
        assert!(without_client.get("token_auth").is_none());
        assert!(without_client.get("cip").is_none());

        let with_peer = builder
            .build(&facts("/foo").client("10.0.0.1", 4000).build())
            .unwrap();
        assert_eq!(with_peer.get("token_auth"), Some(&json!("secret")));
        assert_eq!(with_peer.get("cip"), Some(&json!("10.0.0.1")));

        let forwarded = builder
            .build(
                &facts("/foo")
                    .client("10.0.0.1", 4000)
                    .header("x-forwarded-for", "203.0.113.9")
                    .build(),
            )
            .unwrap();
        assert_eq!(forwarded.get("cip"), Some(&json!("203.0.113.9")));

        let no_token = TrackingStateBuilder::new(1)
            .build(&facts("/foo").client("10.0.0.1", 4000).build())
            .unwrap();
        assert!(no_token.get("cip").is_none());
    }

    #[test]
    fn test_optional_headers() {
        let request = facts("/foo")
            .header("user-agent", "python-httpx/0.24.0")
            .header("accept-language", "sv-SE")
            .header("referer", "https://example.org/")
            .build();

        let state = TrackingStateBuilder::new(1).build(&request).unwrap();
        assert_eq!(state.get("ua"), Some(&json!("python-httpx/0.24.0")));
        assert_eq!(state.get("lang"), Some(&json!("sv-SE")));
        assert_eq!(state.get("urlref"), Some(&json!("https://example.org/")));
    }

    #[test]
    fn test_route_details_override_defaults() {
        let details: TrackingFields = [
            ("action_name", json!("Foo/foo")),
            ("e_c", json!("Foo")),
            ("cvar", json!({"section": "foo"})),
        ]
        .into_iter()
        .collect();
        let config = TrackingConfig::new("http://trackingserver", 1).with_route_details("/foo", details);
        let builder = TrackingStateBuilder::from_config(&config);

        let foo = builder.build(&facts("/foo").build()).unwrap();
        assert_eq!(foo.get("action_name"), Some(&json!("Foo/foo")));
        assert_eq!(foo.get("e_c"), Some(&json!("Foo")));
        assert_eq!(foo.custom_dimensions()["section"], json!("foo"));

        let bar = builder.build(&facts("/bar").build()).unwrap();
        assert_eq!(bar.get("action_name"), Some(&json!("/bar")));
        assert!(bar.get("e_c").is_none());
    }

    #[test]
    fn test_absolute_url() {
        assert_eq!(absolute_url("https", "a.b", "/", ""), "https://a.b/");
        assert_eq!(absolute_url("http", "a.b:81", "/x", "q=1"), "http://a.b:81/x?q=1");
    }
}
