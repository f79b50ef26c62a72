//! Deciding which requests are not tracked.

use std::collections::HashSet;

use axum::http::Method;
use regex::Regex;
use tracing::debug;

use crate::config::{MethodFilter, TrackingConfig};
use crate::error::{TrackerError, TrackerResult};

/// Why a request was excluded from tracking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exclusion {
    /// The path is in the literal exclusion set.
    Path,
    /// The path matches the pattern at this position.
    Pattern(usize),
    /// The method is in the ignored set.
    IgnoredMethod,
    /// The method is not in the allowed set.
    MethodNotAllowed,
}

/// Exclusion rules compiled from a [`TrackingConfig`].
#[derive(Debug, Clone, Default)]
pub struct ExclusionPolicy {
    paths: HashSet<String>,
    patterns: Vec<Regex>,
    allowed_methods: MethodFilter,
    ignored_methods: HashSet<Method>,
}

impl ExclusionPolicy {
    /// Compile the exclusion rules of `config`.
    ///
    /// Patterns match from the start of the path.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a pattern is not a valid regex.
    pub fn from_config(config: &TrackingConfig) -> TrackerResult<Self> {
        let patterns = config
            .exclude_patterns()
            .iter()
            .map(|pattern| {
                Regex::new(&format!("^(?:{pattern})")).map_err(|e| {
                    TrackerError::config(
                        format!("invalid exclude pattern {pattern:?}"),
                        Some(Box::new(e)),
                    )
                })
            })
            .collect::<TrackerResult<Vec<_>>>()?;

        Ok(Self {
            paths: config.exclude_paths().iter().cloned().collect(),
            patterns,
            allowed_methods: config.allowed_methods().clone(),
            ignored_methods: config.ignored_methods().clone(),
        })
    }

    /// First rule excluding a request, if any.
    #[must_use]
    pub fn check(&self, path: &str, method: &Method) -> Option<Exclusion> {
        if self.paths.contains(path) {
            return Some(Exclusion::Path);
        }
        if self.ignored_methods.contains(method) {
            return Some(Exclusion::IgnoredMethod);
        }
        if !self.allowed_methods.allows(method) {
            return Some(Exclusion::MethodNotAllowed);
        }
        self.patterns
            .iter()
            .position(|pattern| pattern.is_match(path))
            .map(Exclusion::Pattern)
    }

    /// Whether a request is excluded from tracking.
    #[must_use]
    pub fn is_excluded(&self, path: &str, method: &Method) -> bool {
        match self.check(path, method) {
            Some(reason) => {
                debug!(path = %path, method = %method, reason = ?reason, "excluding path");
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn policy(config: TrackingConfig) -> ExclusionPolicy {
        ExclusionPolicy::from_config(&config).unwrap()
    }

    fn base() -> TrackingConfig {
        TrackingConfig::new("http://trackingserver", 1)
    }

    #[test]
    fn test_default_tracks_everything() {
        let policy = policy(base());
        assert!(!policy.is_excluded("/foo", &Method::GET));
        assert!(!policy.is_excluded("/foo", &Method::PATCH));
    }

    #[test]
    fn test_literal_paths() {
        let policy = policy(base().with_exclude_paths(["/health"]));
        assert_eq!(policy.check("/health", &Method::GET), Some(Exclusion::Path));
        assert_eq!(policy.check("/health", &Method::POST), Some(Exclusion::Path));
        assert_eq!(policy.check("/health/live", &Method::GET), None);
    }

    #[test]
    fn test_patterns_are_anchored_and_ordered() {
        let policy = policy(base().with_exclude_patterns([r"/static/", r".*\.png"]));

        assert_eq!(
            policy.check("/static/app.js", &Method::GET),
            Some(Exclusion::Pattern(0))
        );
        assert_eq!(
            policy.check("/static/logo.png", &Method::GET),
            Some(Exclusion::Pattern(0))
        );
        assert_eq!(
            policy.check("/img/logo.png", &Method::GET),
            Some(Exclusion::Pattern(1))
        );
        assert_eq!(policy.check("/api/static/x", &Method::GET), None);
    }

    #[test]
    fn test_ignored_methods_win_over_allowed() {
        let config = base()
            .with_allowed_methods(["GET", "POST"])
            .unwrap()
            .with_ignored_methods(["post"])
            .unwrap();
        let policy = policy(config);

        assert!(!policy.is_excluded("/foo", &Method::GET));
        assert_eq!(
            policy.check("/foo", &Method::POST),
            Some(Exclusion::IgnoredMethod)
        );
        assert_eq!(
            policy.check("/foo", &Method::PUT),
            Some(Exclusion::MethodNotAllowed)
        );
    }

    #[test]
    fn test_invalid_pattern() {
        let result = ExclusionPolicy::from_config(&base().with_exclude_patterns(["("]));
        assert!(matches!(result, Err(TrackerError::ConfigError { .. })));
    }
}
