//! Immutable snapshot of an inbound request.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, MatchedPath, OriginalUri};
use axum::http::header::{ACCEPT_LANGUAGE, REFERER, UPGRADE, USER_AGENT};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method};

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_FORWARDED_SERVER: &str = "x-forwarded-server";

/// Everything the tracker needs to know about a request, captured on arrival.
#[derive(Debug, Clone)]
pub struct RequestFacts {
    /// Request method.
    pub method: Method,
    /// Path relative to the mount point.
    pub path: String,
    /// Route template that matched, when known.
    pub route: Option<String>,
    /// Scheme the request arrived with.
    pub scheme: String,
    /// Request headers.
    pub headers: HeaderMap,
    /// Raw query string, without the leading `?`.
    pub query_string: String,
    /// Connection peer `(host, port)`.
    pub client: Option<(String, u16)>,
    /// Server the request was addressed to `(host, port)`.
    pub server: Option<(String, Option<u16>)>,
    /// Prefix the application is mounted under.
    pub root_path: String,
}

impl RequestFacts {
    /// Start building facts by hand.
    #[must_use]
    pub fn builder(method: Method, path: impl Into<String>) -> RequestFactsBuilder {
        RequestFactsBuilder {
            facts: Self {
                method,
                path: path.into(),
                route: None,
                scheme: "http".to_string(),
                headers: HeaderMap::new(),
                query_string: String::new(),
                client: None,
                server: None,
                root_path: String::new(),
            },
        }
    }

    /// Capture facts from the head of an axum request.
    ///
    /// The client address comes from [`ConnectInfo`], the server from the URI
    /// authority or the `Host` header, and the root path from the difference
    /// between [`OriginalUri`] and the (possibly nested) request URI.
    #[must_use]
    pub fn from_parts(parts: &Parts) -> Self {
        let path = parts.uri.path().to_string();

        let root_path = parts
            .extensions
            .get::<OriginalUri>()
            .and_then(|original| original.path().strip_suffix(path.as_str()).map(str::to_string))
            .unwrap_or_default();

        let server = parts
            .uri
            .authority()
            .map(|authority| (authority.host().to_string(), authority.port_u16()))
            .or_else(|| {
                parts
                    .headers
                    .get(axum::http::header::HOST)
                    .and_then(|host| host.to_str().ok())
                    .map(split_host_port)
            });

        let client = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| (addr.ip().to_string(), addr.port()));

        Self {
            method: parts.method.clone(),
            path,
            route: parts
                .extensions
                .get::<MatchedPath>()
                .map(|matched| matched.as_str().to_string()),
            scheme: parts.uri.scheme_str().unwrap_or("http").to_string(),
            headers: parts.headers.clone(),
            query_string: parts.uri.query().unwrap_or_default().to_string(),
            client,
            server,
            root_path,
        }
    }

    fn header(&self, name: impl axum::http::header::AsHeaderName) -> Option<&str> {
        self.headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
    }

    /// `User-Agent` header.
    #[must_use]
    pub fn user_agent(&self) -> Option<&str> {
        self.header(USER_AGENT)
    }

    /// `Accept-Language` header.
    #[must_use]
    pub fn accept_language(&self) -> Option<&str> {
        self.header(ACCEPT_LANGUAGE)
    }

    /// `Referer` header.
    #[must_use]
    pub fn referer(&self) -> Option<&str> {
        self.header(REFERER)
    }

    /// `X-Forwarded-For` header.
    #[must_use]
    pub fn forwarded_for(&self) -> Option<&str> {
        self.header(X_FORWARDED_FOR)
    }

    /// `X-Forwarded-Server` header.
    #[must_use]
    pub fn forwarded_server(&self) -> Option<&str> {
        self.header(X_FORWARDED_SERVER)
    }

    /// Whether the request asks for a protocol upgrade.
    #[must_use]
    pub fn is_upgrade(&self) -> bool {
        self.headers.contains_key(UPGRADE)
    }
}

fn split_host_port(host: &str) -> (String, Option<u16>) {
    match host.rsplit_once(':') {
        Some((name, port)) => port.parse::<u16>().map_or_else(
            |_| (host.to_string(), None),
            |port| (name.to_string(), Some(port)),
        ),
        None => (host.to_string(), None),
    }
}

/// Builder for [`RequestFacts`], mostly useful in tests and adapters.
#[derive(Debug, Clone)]
pub struct RequestFactsBuilder {
    facts: RequestFacts,
}

impl RequestFactsBuilder {
    /// Add a header. Invalid names or values are skipped.
    #[must_use]
    pub fn header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.facts.headers.append(name, value);
        }
        self
    }

    /// Set the raw query string.
    #[must_use]
    pub fn query(mut self, query: impl Into<String>) -> Self {
        self.facts.query_string = query.into();
        self
    }

    /// Set the scheme.
    #[must_use]
    pub fn scheme(mut self, scheme: impl Into<String>) -> Self {
        self.facts.scheme = scheme.into();
        self
    }

    /// Set the client address.
    #[must_use]
    pub fn client(mut self, host: impl Into<String>, port: u16) -> Self {
        self.facts.client = Some((host.into(), port));
        self
    }

    /// Set the server address.
    #[must_use]
    pub fn server(mut self, host: impl Into<String>, port: Option<u16>) -> Self {
        self.facts.server = Some((host.into(), port));
        self
    }

    /// Set the mount prefix.
    #[must_use]
    pub fn root_path(mut self, root_path: impl Into<String>) -> Self {
        self.facts.root_path = root_path.into();
        self
    }

    /// Set the matched route template.
    #[must_use]
    pub fn route(mut self, route: impl Into<String>) -> Self {
        self.facts.route = Some(route.into());
        self
    }

    /// Finish building.
    #[must_use]
    pub fn build(self) -> RequestFacts {
        self.facts
    }
}
