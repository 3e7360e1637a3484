//! Store-facing document model and the missing-value scan.
//!
//! The store accepts explicit `null` but rejects an unset value anywhere in a
//! record. [`Document`] keeps the two apart structurally: `Missing` is the
//! unset marker, `Null` is a value. JSON never yields `Missing`, and a
//! document can only be turned back into JSON once every `Missing` is gone.

use serde::Serialize;
use serde_json::{Map, Number, Value};

use super::ValidationReport;
use crate::errors::ContractError;

/// A nested store value. Object keys keep insertion order.
#[derive(Debug, Clone, PartialEq)]
pub enum Document {
    Missing,
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Array(Vec<Document>),
    Object(Vec<(String, Document)>),
}

impl Document {
    /// Build an object from `(key, value)` pairs.
    pub fn object<K: Into<String>>(fields: impl IntoIterator<Item = (K, Document)>) -> Self {
        Self::Object(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Serialize any value into a document.
    pub fn from_serialize<T: Serialize>(value: &T) -> serde_json::Result<Self> {
        serde_json::to_value(value).map(Self::from)
    }

    /// Look up a key on an object. `None` means the key is absent, which the
    /// contract treats the same as `Missing`.
    pub fn get(&self, key: &str) -> Option<&Document> {
        match self {
            Self::Object(fields) => fields.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Document]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }

    /// Convert back to JSON. Fails with every missing path when any remain.
    pub fn to_json(&self, label: &str) -> Result<Value, ContractError> {
        let paths = find_missing_fields(self);
        if !paths.is_empty() {
            return Err(ContractError::MissingValues {
                label: label.to_string(),
                paths,
            });
        }
        Ok(self.to_json_unchecked())
    }

    fn to_json_unchecked(&self) -> Value {
        match self {
            Self::Missing | Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Number(n) => Value::Number(n.clone()),
            Self::String(s) => Value::String(s.clone()),
            Self::Array(items) => Value::Array(items.iter().map(Self::to_json_unchecked).collect()),
            Self::Object(fields) => {
                let mut map = Map::new();
                for (k, v) in fields {
                    map.insert(k.clone(), v.to_json_unchecked());
                }
                Value::Object(map)
            }
        }
    }
}

impl From<Value> for Document {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => Self::Number(n),
            Value::String(s) => Self::String(s),
            Value::Array(items) => Self::Array(items.into_iter().map(Self::from).collect()),
            Value::Object(map) => Self::Object(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect()),
        }
    }
}

impl From<&str> for Document {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Document {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<bool> for Document {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Document {
    fn from(n: i64) -> Self {
        Self::Number(n.into())
    }
}

/// Paths of every missing value, depth first, elements then keys in order.
/// Explicit null is never reported.
pub fn find_missing_fields(value: &Document) -> Vec<String> {
    let mut paths = Vec::new();
    collect_missing(value, "", &mut paths);
    paths
}

fn collect_missing(value: &Document, path: &str, out: &mut Vec<String>) {
    match value {
        Document::Missing => out.push(if path.is_empty() {
            "(root)".to_string()
        } else {
            path.to_string()
        }),
        Document::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                collect_missing(item, &format!("{}[{}]", path, i), out);
            }
        }
        Document::Object(fields) => {
            for (key, item) in fields {
                let child = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", path, key)
                };
                collect_missing(item, &child, out);
            }
        }
        _ => {}
    }
}

/// Pass/fail wrapper over [`find_missing_fields`].
pub fn validate(value: &Document, label: &str) -> ValidationReport {
    let errors = find_missing_fields(value)
        .into_iter()
        .map(|path| format!("{}: missing value at {}", label, path))
        .collect();
    ValidationReport::from_errors(errors)
}
