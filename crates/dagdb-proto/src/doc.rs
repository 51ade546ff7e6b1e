//! Document rows flowing through the plan graph.

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Name of the field carrying a document's primary key.
pub const KEY_FIELD: &str = "_key";

/// A mutable, insertion-ordered mapping from field name to value.
///
/// Rows are built bottom-up: the leaf scan produces the base fields and each
/// join or append node adds nested fields to the same row before it is
/// yielded upward. Setting an existing field replaces it in place, so the
/// original position is kept.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Doc {
    fields: Vec<(String, Value)>,
}

impl Doc {
    /// Create an empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a document whose first field is its primary key.
    pub fn with_key(key: impl Into<String>) -> Self {
        Self {
            fields: vec![(KEY_FIELD.to_string(), Value::String(key.into()))],
        }
    }

    /// Build a document from name/value pairs.
    pub fn from_fields(fields: Vec<(String, Value)>) -> Self {
        let mut doc = Self::new();
        for (name, value) in fields {
            doc.set(name, value);
        }
        doc
    }

    /// The primary key, if this row carries one.
    pub fn key(&self) -> Option<&str> {
        self.get(KEY_FIELD).and_then(Value::as_str)
    }

    /// Get a field value by name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Set a field, replacing any existing value under the same name.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((name, value)),
        }
    }

    /// Remove a field, returning its value.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        let pos = self.fields.iter().position(|(n, _)| n == name)?;
        Some(self.fields.remove(pos).1)
    }

    /// Copy every field of `other` into this document.
    pub fn merge(&mut self, other: &Doc) {
        for (name, value) in &other.fields {
            self.set(name.clone(), value.clone());
        }
    }

    /// Keep only the named fields (plus the primary key), in their current order.
    pub fn retain_fields(&mut self, names: &[String]) {
        self.fields
            .retain(|(n, _)| n == KEY_FIELD || names.iter().any(|keep| keep == n));
    }

    /// Iterate over the fields in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Field names in insertion order.
    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|(n, _)| n.as_str()).collect()
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the document has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Consume the document, returning its fields.
    pub fn into_fields(self) -> Vec<(String, Value)> {
        self.fields
    }

    /// Render as a plain JSON object.
    pub fn to_json(&self) -> serde_json::Value {
        let map = self
            .fields
            .iter()
            .map(|(n, v)| (n.clone(), v.to_json()))
            .collect::<serde_json::Map<_, _>>();
        serde_json::Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_replaces_in_place() {
        let mut doc = Doc::with_key("bae-1");
        doc.set("name", "Alice");
        doc.set("age", 30i64);
        doc.set("name", "Bob");

        assert_eq!(doc.field_names(), vec!["_key", "name", "age"]);
        assert_eq!(doc.get("name").and_then(Value::as_str), Some("Bob"));
        assert_eq!(doc.key(), Some("bae-1"));
    }

    #[test]
    fn test_merge_and_retain() {
        let mut base = Doc::with_key("bae-1");
        base.set("name", "Alice");

        let mut extra = Doc::with_key("bae-1");
        extra.set("posts", Value::Docs(vec![]));
        base.merge(&extra);
        assert_eq!(base.field_names(), vec!["_key", "name", "posts"]);

        base.retain_fields(&["posts".to_string()]);
        assert_eq!(base.field_names(), vec!["_key", "posts"]);
    }

    #[test]
    fn test_missing_key() {
        let mut doc = Doc::new();
        assert_eq!(doc.key(), None);
        doc.set(KEY_FIELD, 7i64);
        assert_eq!(doc.key(), None);
        assert!(doc.remove(KEY_FIELD).is_some());
        assert!(doc.is_empty());
    }
}
