//! Field sets with custom-dimension aware merging.

use serde_json::{Map, Value};
use tracing::warn;

/// Reserved key holding the custom-dimension map.
pub const CUSTOM_DIMENSIONS_KEY: &str = "cvar";

/// A set of flat event fields plus the custom-dimension map.
///
/// Writing an object under [`CUSTOM_DIMENSIONS_KEY`] merges its keys into the
/// custom-dimension map; every other key replaces the previous value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackingFields {
    fields: Map<String, Value>,
    custom_dimensions: Map<String, Value>,
}

impl TrackingFields {
    /// Create an empty field set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field.
    ///
    /// A non-object value under the reserved custom-dimension key is ignored.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();

        if key != CUSTOM_DIMENSIONS_KEY {
            self.fields.insert(key, value);
            return;
        }

        match value {
            Value::Object(map) => self.custom_dimensions.extend(map),
            other => warn!(value = %other, "ignoring non-object custom dimensions"),
        }
    }

    /// Set one custom dimension.
    pub fn set_custom_dimension(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.custom_dimensions.insert(key.into(), value.into());
    }

    /// Remove a flat field.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.fields.remove(key)
    }

    /// Apply `other` on top of `self`.
    ///
    /// Flat fields of `other` overwrite; custom dimensions are merged key by key.
    pub fn apply(&mut self, other: &Self) {
        for (key, value) in &other.fields {
            self.fields.insert(key.clone(), value.clone());
        }
        for (key, value) in &other.custom_dimensions {
            self.custom_dimensions.insert(key.clone(), value.clone());
        }
    }

    /// Value of a flat field.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Flat fields.
    #[must_use]
    pub const fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Custom-dimension map.
    #[must_use]
    pub const fn custom_dimensions(&self) -> &Map<String, Value> {
        &self.custom_dimensions
    }

    /// Whether nothing has been set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.custom_dimensions.is_empty()
    }

    /// Split into flat fields and custom dimensions.
    #[must_use]
    pub fn into_parts(self) -> (Map<String, Value>, Map<String, Value>) {
        (self.fields, self.custom_dimensions)
    }
}

impl From<Map<String, Value>> for TrackingFields {
    fn from(map: Map<String, Value>) -> Self {
        let mut fields = Self::new();
        for (key, value) in map {
            fields.set(key, value);
        }
        fields
    }
}

impl<K, V> FromIterator<(K, V)> for TrackingFields
where
    K: Into<String>,
    V: Into<Value>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut fields = Self::new();
        for (key, value) in iter {
            fields.set(key, value);
        }
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_fields_overwrite() {
        let mut base: TrackingFields = [("action_name", "/foo")].into_iter().collect();
        let over: TrackingFields = [("action_name", "Foo/foo")].into_iter().collect();

        base.apply(&over);
        assert_eq!(base.get("action_name"), Some(&json!("Foo/foo")));
    }

    #[test]
    fn test_custom_dimensions_merge_key_by_key() {
        let mut base = TrackingFields::new();
        base.set_custom_dimension("http_status_code", 200);
        base.set_custom_dimension("http_method", "GET");

        let mut over = TrackingFields::new();
        over.set("cvar", json!({"anything": "goes", "http_method": "HEAD"}));

        base.apply(&over);

        assert_eq!(base.custom_dimensions().len(), 3);
        assert_eq!(base.custom_dimensions()["http_status_code"], json!(200));
        assert_eq!(base.custom_dimensions()["http_method"], json!("HEAD"));
        assert_eq!(base.custom_dimensions()["anything"], json!("goes"));
        assert!(base.get("cvar").is_none());
    }

    #[test]
    fn test_non_object_custom_dimensions_ignored() {
        let mut fields = TrackingFields::new();
        fields.set("cvar", "not a map");
        assert!(fields.is_empty());
    }

    #[test]
    fn test_from_json_map_routes_cvar() {
        let map = json!({"e_c": "Foo", "cvar": {"route": "foo"}});
        let Value::Object(map) = map else {
            unreachable!("literal is an object")
        };

        let fields = TrackingFields::from(map);
        assert_eq!(fields.get("e_c"), Some(&json!("Foo")));
        assert_eq!(fields.custom_dimensions()["route"], json!("foo"));
    }
}
