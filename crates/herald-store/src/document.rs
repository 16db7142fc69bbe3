//! Schemaless documents and the collections that hold them.

use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;

/// A stored document: a JSON object keyed by `_id`.
pub type Document = serde_json::Map<String, Value>;

/// Primary key field present on every document.
pub const ID_FIELD: &str = "_id";

/// Named collections used by the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Clients,
    Publishers,
    PublisherMessages,
    Subscriptions,
}

impl Collection {
    pub const ALL: [Collection; 4] = [
        Collection::Clients,
        Collection::Publishers,
        Collection::PublisherMessages,
        Collection::Subscriptions,
    ];

    /// Stable collection name, used as the storage key.
    pub fn name(&self) -> &'static str {
        match self {
            Collection::Clients => "clients",
            Collection::Publishers => "publishers",
            Collection::PublisherMessages => "publisher_messages",
            Collection::Subscriptions => "subscriptions",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Returns the document's `_id` if it is a string.
pub fn document_id(doc: &Document) -> Option<&str> {
    doc.get(ID_FIELD).and_then(Value::as_str)
}

/// Keep only the named fields (and `_id`).
pub fn project(doc: Document, fields: &[&'static str]) -> Document {
    doc.into_iter()
        .filter(|(key, _)| key == ID_FIELD || fields.contains(&key.as_str()))
        .collect()
}

/// Equality used by filters. Numbers compare by value regardless of
/// integer/float representation.
pub(crate) fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        _ => a == b,
    }
}

/// Total order over scalar values: null, then numbers (booleans as 0/1),
/// then strings. Arrays and objects sort last and compare equal.
pub(crate) fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(v: Option<&Value>) -> u8 {
        match v {
            None | Some(Value::Null) => 0,
            Some(Value::Bool(_)) | Some(Value::Number(_)) => 1,
            Some(Value::String(_)) => 2,
            Some(_) => 3,
        }
    }

    fn numeric(v: &Value) -> f64 {
        match v {
            Value::Bool(b) => f64::from(u8::from(*b)),
            Value::Number(n) => n.as_f64().unwrap_or(0.0),
            _ => 0.0,
        }
    }

    match rank(a).cmp(&rank(b)) {
        Ordering::Equal => match (a, b) {
            (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
            (Some(x), Some(y)) if rank(a) == 1 => numeric(x)
                .partial_cmp(&numeric(y))
                .unwrap_or(Ordering::Equal),
            _ => Ordering::Equal,
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_projection_keeps_id() {
        let doc = json!({"_id": "a", "name": "x", "secret": 1});
        let doc = project(doc.as_object().unwrap().clone(), &["name"]);
        assert_eq!(doc.len(), 2);
        assert!(doc.contains_key("_id"));
        assert!(!doc.contains_key("secret"));
    }

    #[test]
    fn test_numbers_compare_across_representations() {
        assert!(values_equal(&json!(5), &json!(5.0)));
        assert!(!values_equal(&json!(5), &json!("5")));
    }

    #[test]
    fn test_null_sorts_before_numbers_and_strings() {
        assert_eq!(compare_values(None, Some(&json!(1))), Ordering::Less);
        assert_eq!(
            compare_values(Some(&json!(9)), Some(&json!("a"))),
            Ordering::Less
        );
        assert_eq!(
            compare_values(Some(&json!(2)), Some(&json!(10))),
            Ordering::Less
        );
    }
}
