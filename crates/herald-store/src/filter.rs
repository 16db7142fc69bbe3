//! Typed query language shared by every backend.
//!
//! The broker only ever issues a handful of query shapes, so rather than
//! passing loosely-typed JSON filters around, each shape is a variant here.
//! Backends either evaluate a [`Filter`] directly against a [`Document`]
//! (memory) or compile it to their native query language (SQLite).
//!
//! Missing fields behave like `null`: `Eq(field, null)` and `Ne(field, x)`
//! match them, while ordering comparisons and `Contains` do not.

use crate::document::{compare_values, values_equal, Document};
use crate::error::{StoreError, StoreResult};
use serde_json::Value;
use std::cmp::Ordering;

/// A predicate over documents.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Matches every document.
    All,
    Eq(&'static str, Value),
    Ne(&'static str, Value),
    /// Field equals one of the values. An empty list matches nothing.
    In(&'static str, Vec<Value>),
    Lt(&'static str, Value),
    Gte(&'static str, Value),
    /// Array field contains the value.
    Contains(&'static str, Value),
    /// Array field does not contain the value (or the field is absent).
    NotContains(&'static str, Value),
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

impl Filter {
    pub fn eq(field: &'static str, value: impl Into<Value>) -> Self {
        Filter::Eq(field, value.into())
    }

    pub fn ne(field: &'static str, value: impl Into<Value>) -> Self {
        Filter::Ne(field, value.into())
    }

    pub fn is_in<I, V>(field: &'static str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Filter::In(field, values.into_iter().map(Into::into).collect())
    }

    pub fn lt(field: &'static str, value: impl Into<Value>) -> Self {
        Filter::Lt(field, value.into())
    }

    pub fn gte(field: &'static str, value: impl Into<Value>) -> Self {
        Filter::Gte(field, value.into())
    }

    pub fn contains(field: &'static str, value: impl Into<Value>) -> Self {
        Filter::Contains(field, value.into())
    }

    pub fn not_contains(field: &'static str, value: impl Into<Value>) -> Self {
        Filter::NotContains(field, value.into())
    }

    pub fn and(filters: impl IntoIterator<Item = Filter>) -> Self {
        Filter::And(filters.into_iter().collect())
    }

    pub fn or(filters: impl IntoIterator<Item = Filter>) -> Self {
        Filter::Or(filters.into_iter().collect())
    }

    /// Evaluate the filter against a document.
    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Filter::All => true,
            Filter::Eq(field, value) => values_equal(field_or_null(doc, field), value),
            Filter::Ne(field, value) => !values_equal(field_or_null(doc, field), value),
            Filter::In(field, values) => {
                let actual = field_or_null(doc, field);
                values.iter().any(|v| values_equal(actual, v))
            }
            Filter::Lt(field, value) => ordered(doc, field, value, |o| o == Ordering::Less),
            Filter::Gte(field, value) => ordered(doc, field, value, |o| o != Ordering::Less),
            Filter::Contains(field, value) => array_contains(doc, field, value),
            Filter::NotContains(field, value) => !array_contains(doc, field, value),
            Filter::And(filters) => filters.iter().all(|f| f.matches(doc)),
            Filter::Or(filters) => filters.iter().any(|f| f.matches(doc)),
        }
    }
}

static NULL: Value = Value::Null;

fn field_or_null<'a>(doc: &'a Document, field: &str) -> &'a Value {
    doc.get(field).unwrap_or(&NULL)
}

fn ordered(doc: &Document, field: &str, value: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    let Some(actual) = doc.get(field) else {
        return false;
    };
    let comparable = matches!(
        (actual, value),
        (Value::Number(_), Value::Number(_)) | (Value::String(_), Value::String(_))
    );
    comparable && accept(compare_values(Some(actual), Some(value)))
}

fn array_contains(doc: &Document, field: &str, value: &Value) -> bool {
    match doc.get(field) {
        Some(Value::Array(items)) => items.iter().any(|item| values_equal(item, value)),
        _ => false,
    }
}

/// A mutation applied to every document matched by an update.
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    /// Append `value` to the array at `field` unless it is already present.
    /// A missing field is created as a one-element array.
    AddToSet(&'static str, Value),
}

impl Update {
    pub fn add_to_set(field: &'static str, value: impl Into<Value>) -> Self {
        Update::AddToSet(field, value.into())
    }

    /// Apply the update in place. Returns whether the document changed.
    pub fn apply(&self, doc: &mut Document) -> StoreResult<bool> {
        match self {
            Update::AddToSet(field, value) => match doc.get_mut(*field) {
                None | Some(Value::Null) => {
                    doc.insert((*field).to_string(), Value::Array(vec![value.clone()]));
                    Ok(true)
                }
                Some(Value::Array(items)) => {
                    if items.iter().any(|item| values_equal(item, value)) {
                        Ok(false)
                    } else {
                        items.push(value.clone());
                        Ok(true)
                    }
                }
                Some(_) => Err(StoreError::InvalidDocument(format!(
                    "field '{field}' is not an array"
                ))),
            },
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Single-field sort. Ties keep insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sort {
    pub field: &'static str,
    pub order: SortOrder,
}

impl Sort {
    pub fn ascending(field: &'static str) -> Self {
        Self {
            field,
            order: SortOrder::Ascending,
        }
    }

    pub fn descending(field: &'static str) -> Self {
        Self {
            field,
            order: SortOrder::Descending,
        }
    }
}

/// Options for find queries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    /// Fields to return. `_id` is always included. `None` returns everything.
    pub projection: Option<Vec<&'static str>>,
    pub sort: Option<Sort>,
    pub limit: Option<usize>,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn projection(mut self, fields: &[&'static str]) -> Self {
        self.projection = Some(fields.to_vec());
        self
    }

    pub fn sort(mut self, sort: Sort) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Result of an update-many operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOutcome {
    /// Documents selected by the filter.
    pub matched: u64,
    /// Documents whose contents actually changed.
    pub modified: u64,
}
