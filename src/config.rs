//! Configuration management for the tracking middleware.
//!
//! [`TrackingConfig`] can be built in code with the `with_*` methods or loaded
//! from environment variables with [`TrackingConfig::from_env`], which uses the
//! `dotenvy` crate to pick up a `.env` file first.
//!
//! ## Environment Variables
//!
//! Required:
//! - `MATOMO_URL`: tracking endpoint of the collector (e.g. `https://matomo.example.org/matomo.php`)
//! - `MATOMO_SITE_ID`: numeric id of the tracked site
//!
//! Optional (with defaults):
//! - `MATOMO_ACCESS_TOKEN`: API token; enables sending the client IP (default: unset)
//! - `MATOMO_ASSUME_HTTPS`: build tracked URLs with `https` (default: true)
//! - `MATOMO_HTTP_TIMEOUT_SECS`: collector request timeout (default: 5)
//! - `MATOMO_EXCLUDE_PATHS`: comma-separated literal paths never tracked
//! - `MATOMO_EXCLUDE_PATTERNS`: comma-separated regexes; matching paths are never tracked
//! - `MATOMO_ALLOWED_METHODS`: `all-methods` or comma-separated methods (default: `all-methods`)
//! - `MATOMO_IGNORED_METHODS`: comma-separated methods never tracked
//! - `MATOMO_ROUTE_DETAILS`: JSON object mapping a path to fields sent for it
//!
//! A delivery client is not part of the configuration; pass one to
//! [`Tracker::with_collector`](crate::tracker::Tracker::with_collector).
//!
//! ## Example
//!
//! ```
//! use matomo_middleware::config::{MethodFilter, TrackingConfig};
//!
//! let config = TrackingConfig::new("https://matomo.example.org/matomo.php", 12345)
//!     .with_exclude_paths(["/health"])
//!     .with_ignored_methods(["options"])
//!     .expect("valid methods");
//!
//! assert_eq!(config.site_id(), 12345);
//! assert!(matches!(config.allowed_methods(), MethodFilter::All));
//! ```

use std::collections::{HashMap, HashSet};
use std::env;
use std::time::Duration;

use axum::http::Method;
use serde_json::Value;

use crate::error::{TrackerError, TrackerResult};
use crate::tracking::fields::TrackingFields;

/// Sentinel accepted by `MATOMO_ALLOWED_METHODS` meaning "track every method".
pub const ALL_METHODS: &str = "all-methods";

/// Default collector request timeout.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(5);

/// Which request methods are tracked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum MethodFilter {
    /// Every method.
    #[default]
    All,
    /// Only the listed methods.
    Only(HashSet<Method>),
}

impl MethodFilter {
    /// Whether `method` passes the filter.
    #[must_use]
    pub fn allows(&self, method: &Method) -> bool {
        match self {
            Self::All => true,
            Self::Only(methods) => methods.contains(method),
        }
    }
}

/// Main configuration struct for the tracking middleware.
#[derive(Debug, Clone)]
pub struct TrackingConfig {
    /// Collector tracking endpoint
    matomo_url: String,

    /// Id of the tracked site
    site_id: u64,

    /// Optional API token (enables `token_auth` + `cip`)
    access_token: Option<String>,

    /// Build tracked URLs with `https` regardless of the request scheme
    assume_https: bool,

    /// Timeout of the default delivery client
    http_timeout: Option<Duration>,

    /// Paths never tracked
    exclude_paths: Vec<String>,

    /// Patterns of paths never tracked
    exclude_patterns: Vec<String>,

    /// Static fields per path
    route_details: HashMap<String, TrackingFields>,

    /// Methods that are tracked
    allowed_methods: MethodFilter,

    /// Methods never tracked; wins over `allowed_methods`
    ignored_methods: HashSet<Method>,
}

impl TrackingConfig {
    /// Create a configuration with defaults for every optional setting.
    #[must_use]
    pub fn new(matomo_url: impl Into<String>, site_id: u64) -> Self {
        Self {
            matomo_url: matomo_url.into(),
            site_id,
            access_token: None,
            assume_https: true,
            http_timeout: Some(DEFAULT_HTTP_TIMEOUT),
            exclude_paths: Vec::new(),
            exclude_patterns: Vec::new(),
            route_details: HashMap::new(),
            allowed_methods: MethodFilter::All,
            ignored_methods: HashSet::new(),
        }
    }

    /// Load configuration from environment variables.
    ///
    /// This function:
    /// 1. Loads `.env` file using `dotenvy` (if present)
    /// 2. Reads and validates all environment variables
    /// 3. Applies defaults for optional variables
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `MATOMO_URL` or `MATOMO_SITE_ID` is missing
    /// - A numeric or boolean variable cannot be parsed
    /// - A method name is invalid
    /// - `MATOMO_ROUTE_DETAILS` is not a JSON object of objects
    pub fn from_env() -> TrackerResult<Self> {
        // Load .env file if present (ignore error if file doesn't exist)
        dotenvy::dotenv().ok();

        let matomo_url = env::var("MATOMO_URL").map_err(|e| {
            TrackerError::config("MATOMO_URL environment variable is required", Some(Box::new(e)))
        })?;

        if matomo_url.is_empty() || matomo_url == "YOUR MATOMO TRACKING URL" {
            return Err(TrackerError::config(
                "MATOMO_URL must be set to the collector's tracking URL",
                None,
            ));
        }

        let site_id = env::var("MATOMO_SITE_ID")
            .map_err(|e| {
                TrackerError::config(
                    "MATOMO_SITE_ID environment variable is required",
                    Some(Box::new(e)),
                )
            })?
            .parse::<u64>()
            .map_err(|e| {
                TrackerError::config("MATOMO_SITE_ID must be a valid number", Some(Box::new(e)))
            })?;

        let mut config = Self::new(matomo_url, site_id);

        if let Ok(token) = env::var("MATOMO_ACCESS_TOKEN") {
            if !token.is_empty() {
                config = config.with_access_token(token);
            }
        }

        // Optional: https assumption (default: true)
        let assume_https = env::var("MATOMO_ASSUME_HTTPS")
            .unwrap_or_else(|_| "true".to_string())
            .parse::<bool>()
            .map_err(|e| {
                TrackerError::config(
                    "MATOMO_ASSUME_HTTPS must be 'true' or 'false'",
                    Some(Box::new(e)),
                )
            })?;
        config = config.with_assume_https(assume_https);

        // Optional: collector timeout (default: 5 seconds)
        let timeout_secs = env::var("MATOMO_HTTP_TIMEOUT_SECS")
            .unwrap_or_else(|_| "5".to_string())
            .parse::<u64>()
            .map_err(|e| {
                TrackerError::config(
                    "MATOMO_HTTP_TIMEOUT_SECS must be a valid number",
                    Some(Box::new(e)),
                )
            })?;
        config = config.with_http_timeout(Some(Duration::from_secs(timeout_secs)));

        config = config
            .with_exclude_paths(list_var("MATOMO_EXCLUDE_PATHS"))
            .with_exclude_patterns(list_var("MATOMO_EXCLUDE_PATTERNS"));

        let allowed = env::var("MATOMO_ALLOWED_METHODS").unwrap_or_else(|_| ALL_METHODS.to_string());
        if allowed.trim() != ALL_METHODS {
            config = config.with_allowed_methods(split_list(&allowed))?;
        }

        config = config.with_ignored_methods(list_var("MATOMO_IGNORED_METHODS"))?;

        if let Ok(raw) = env::var("MATOMO_ROUTE_DETAILS") {
            for (path, fields) in parse_route_details(&raw)? {
                config = config.with_route_details(path, fields);
            }
        }

        Ok(config)
    }

    /// Set the collector API token.
    #[must_use]
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// Use `https` for tracked URLs (`true`) or the request scheme (`false`).
    #[must_use]
    pub const fn with_assume_https(mut self, assume_https: bool) -> Self {
        self.assume_https = assume_https;
        self
    }

    /// Timeout of the default delivery client; ignored for supplied clients.
    #[must_use]
    pub const fn with_http_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.http_timeout = timeout;
        self
    }

    /// Add literal paths that are never tracked.
    #[must_use]
    pub fn with_exclude_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude_paths.extend(paths.into_iter().map(Into::into));
        self
    }

    /// Add regex patterns; paths matching any of them are never tracked.
    ///
    /// Patterns are validated when the [`Tracker`](crate::tracker::Tracker) is built.
    #[must_use]
    pub fn with_exclude_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude_patterns
            .extend(patterns.into_iter().map(Into::into));
        self
    }

    /// Send `fields` with every event for `path`.
    #[must_use]
    pub fn with_route_details(mut self, path: impl Into<String>, fields: TrackingFields) -> Self {
        self.route_details
            .entry(path.into())
            .or_default()
            .apply(&fields);
        self
    }

    /// Track only the listed methods.
    ///
    /// # Errors
    ///
    /// Returns an error if a method name is invalid.
    pub fn with_allowed_methods<I, S>(mut self, methods: I) -> TrackerResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.allowed_methods = MethodFilter::Only(parse_methods(methods)?);
        Ok(self)
    }

    /// Never track the listed methods, even if allowed.
    ///
    /// # Errors
    ///
    /// Returns an error if a method name is invalid.
    pub fn with_ignored_methods<I, S>(mut self, methods: I) -> TrackerResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.ignored_methods.extend(parse_methods(methods)?);
        Ok(self)
    }

    /// Get the collector URL.
    #[must_use]
    pub fn matomo_url(&self) -> &str {
        &self.matomo_url
    }

    /// Get the tracked site id.
    #[must_use]
    pub const fn site_id(&self) -> u64 {
        self.site_id
    }

    /// Get the API token.
    #[must_use]
    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    /// Check if tracked URLs always use `https`.
    #[must_use]
    pub const fn assume_https(&self) -> bool {
        self.assume_https
    }

    /// Get the default client timeout.
    #[must_use]
    pub const fn http_timeout(&self) -> Option<Duration> {
        self.http_timeout
    }

    /// Get the excluded paths.
    #[must_use]
    pub fn exclude_paths(&self) -> &[String] {
        &self.exclude_paths
    }

    /// Get the exclusion patterns.
    #[must_use]
    pub fn exclude_patterns(&self) -> &[String] {
        &self.exclude_patterns
    }

    /// Get the static per-route fields.
    #[must_use]
    pub const fn route_details(&self) -> &HashMap<String, TrackingFields> {
        &self.route_details
    }

    /// Get the allowed methods.
    #[must_use]
    pub const fn allowed_methods(&self) -> &MethodFilter {
        &self.allowed_methods
    }

    /// Get the ignored methods.
    #[must_use]
    pub const fn ignored_methods(&self) -> &HashSet<Method> {
        &self.ignored_methods
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn list_var(name: &str) -> Vec<String> {
    env::var(name).map(|raw| split_list(&raw)).unwrap_or_default()
}

fn parse_methods<I, S>(methods: I) -> TrackerResult<HashSet<Method>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    methods
        .into_iter()
        .map(|method| {
            let upper = method.as_ref().trim().to_uppercase();
            Method::from_bytes(upper.as_bytes()).map_err(|e| {
                TrackerError::config(format!("invalid HTTP method: {upper:?}"), Some(Box::new(e)))
            })
        })
        .collect()
}

fn parse_route_details(raw: &str) -> TrackerResult<Vec<(String, TrackingFields)>> {
    let value: Value = serde_json::from_str(raw).map_err(|e| {
        TrackerError::config("MATOMO_ROUTE_DETAILS must be valid JSON", Some(Box::new(e)))
    })?;

    let Value::Object(routes) = value else {
        return Err(TrackerError::config(
            "MATOMO_ROUTE_DETAILS must be a JSON object",
            None,
        ));
    };

    routes
        .into_iter()
        .map(|(path, details)| match details {
            Value::Object(details) => Ok((path, TrackingFields::from(details))),
            _ => Err(TrackerError::config(
                format!("route details for {path:?} must be a JSON object"),
                None,
            )),
        })
        .collect()
}
