//! Untyped inbound payloads.
//!
//! Every vendor payload is normalized into a [`Document`]: a tagged union of
//! null / bool / number / string / array / map. Classifiers and formatters
//! probe it with dotted paths (`object_attributes.status`, `commits.0.id`)
//! instead of chaining ad-hoc lookups.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(Value);

impl Document {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// `{ "text": <text> }`, the shape used whenever a body is not structured.
    pub fn text(text: impl Into<String>) -> Self {
        let mut map = Map::new();
        map.insert("text".to_string(), Value::String(text.into()));
        Self(Value::Object(map))
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    pub fn is_object(&self) -> bool {
        self.0.is_object()
    }

    /// Resolve a dotted path. Array elements are addressed by index.
    /// A key that itself contains dots is matched verbatim before splitting.
    pub fn get(&self, path: &str) -> Option<&Value> {
        lookup(&self.0, path)
    }

    /// Present and not null.
    pub fn has(&self, path: &str) -> bool {
        matches!(self.get(path), Some(v) if !v.is_null())
    }

    /// Non-empty string at `path`.
    pub fn str_at(&self, path: &str) -> Option<&str> {
        match self.get(path) {
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s.as_str()),
            _ => None,
        }
    }

    /// Scalar at `path` rendered as text: non-empty strings, numbers and bools.
    pub fn scalar_at(&self, path: &str) -> Option<String> {
        self.get(path).and_then(render_scalar)
    }

    pub fn i64_at(&self, path: &str) -> Option<i64> {
        match self.get(path)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// First path (in order) holding a non-empty string.
    pub fn first_str(&self, paths: &[&str]) -> Option<&str> {
        paths.iter().find_map(|p| self.str_at(p))
    }

    /// First path (in order) holding a renderable scalar.
    pub fn first_scalar(&self, paths: &[&str]) -> Option<String> {
        paths.iter().find_map(|p| self.scalar_at(p))
    }

    /// Array at `path`, empty when absent or not an array.
    pub fn array_at(&self, path: &str) -> &[Value] {
        match self.get(path) {
            Some(Value::Array(items)) => items.as_slice(),
            _ => &[],
        }
    }

    /// Pretty JSON rendering, used when a payload is shown as-is.
    pub fn to_pretty_string(&self) -> String {
        serde_json::to_string_pretty(&self.0).unwrap_or_else(|_| self.0.to_string())
    }
}

impl From<Value> for Document {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// Strings (non-empty), numbers and bools as text. Containers and null yield `None`.
pub fn render_scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn lookup<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(root);
    }
    if let Value::Object(map) = root {
        if let Some(v) = map.get(path) {
            return Some(v);
        }
    }

    let (head, rest) = match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    };

    let child = match root {
        Value::Object(map) => map.get(head)?,
        Value::Array(items) => items.get(head.parse::<usize>().ok()?)?,
        _ => return None,
    };

    match rest {
        Some(rest) => lookup(child, rest),
        None => Some(child),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn dotted_paths_walk_maps_and_arrays() {
        let doc = Document::new(json!({
            "project": { "name": "Demo" },
            "commits": [ { "id": "abc" }, { "id": "def" } ]
        }));
        assert_eq!(doc.str_at("project.name"), Some("Demo"));
        assert_eq!(doc.str_at("commits.1.id"), Some("def"));
        assert!(doc.get("commits.7.id").is_none());
        assert!(doc.get("project.name.deeper").is_none());
    }

    #[test]
    fn literal_dotted_key_wins() {
        let doc = Document::new(json!({ "a.b": "flat", "a": { "b": "nested" } }));
        assert_eq!(doc.str_at("a.b"), Some("flat"));
    }

    #[test]
    fn blank_strings_and_nulls_are_absent() {
        let doc = Document::new(json!({ "status": "  ", "ref": null, "id": 42 }));
        assert_eq!(doc.str_at("status"), None);
        assert!(!doc.has("ref"));
        assert_eq!(doc.scalar_at("id").as_deref(), Some("42"));
        assert_eq!(doc.first_scalar(&["status", "ref", "id"]).as_deref(), Some("42"));
    }
}
