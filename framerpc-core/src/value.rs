use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Plain value exchanged on the wire: call arguments, leaf snapshot nodes,
/// and the entries of pass-through built-ins. Carries no functions.
///
/// The built-in variants cover the structured-copy family: `Date` and
/// `Regex` as themselves, `Bytes` for any raw buffer view, `Blob` for
/// typed binary attachments, `Map` and `Set` with their entries
/// value-cloned. Their internals are never traversed as object structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v", rename_all = "camelCase")]
pub enum WireValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<WireValue>),
    Record(BTreeMap<String, WireValue>),
    /// Milliseconds since the Unix epoch.
    Date(f64),
    Regex {
        pattern: String,
        flags: String,
    },
    Bytes(Bytes),
    Blob {
        content_type: String,
        data: Bytes,
    },
    Map(Vec<(WireValue, WireValue)>),
    Set(Vec<WireValue>),
}

/// Structural tag distinguishing the value families, the host-environment
/// brand check of the original design.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Brand {
    Null,
    Bool,
    Number,
    String,
    List,
    Record,
    Date,
    Regex,
    Bytes,
    Blob,
    Map,
    Set,
}

impl WireValue {
    pub fn brand(&self) -> Brand {
        match self {
            WireValue::Null => Brand::Null,
            WireValue::Bool(_) => Brand::Bool,
            WireValue::Number(_) => Brand::Number,
            WireValue::String(_) => Brand::String,
            WireValue::List(_) => Brand::List,
            WireValue::Record(_) => Brand::Record,
            WireValue::Date(_) => Brand::Date,
            WireValue::Regex { .. } => Brand::Regex,
            WireValue::Bytes(_) => Brand::Bytes,
            WireValue::Blob { .. } => Brand::Blob,
            WireValue::Map(_) => Brand::Map,
            WireValue::Set(_) => Brand::Set,
        }
    }

    /// True for compound values: lists, records, and the pass-through
    /// built-ins. Primitives are not objects.
    pub fn is_object(&self) -> bool {
        !matches!(
            self,
            WireValue::Null | WireValue::Bool(_) | WireValue::Number(_) | WireValue::String(_)
        )
    }

    /// True for built-ins conveyed whole rather than traversed
    /// field-by-field.
    pub fn is_pass_through(&self) -> bool {
        matches!(
            self,
            WireValue::Date(_)
                | WireValue::Regex { .. }
                | WireValue::Bytes(_)
                | WireValue::Blob { .. }
                | WireValue::Map(_)
                | WireValue::Set(_)
        )
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            WireValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            WireValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            WireValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, WireValue::Null)
    }
}

impl From<f64> for WireValue {
    fn from(value: f64) -> Self {
        WireValue::Number(value)
    }
}

impl From<i64> for WireValue {
    fn from(value: i64) -> Self {
        WireValue::Number(value as f64)
    }
}

impl From<i32> for WireValue {
    fn from(value: i32) -> Self {
        WireValue::Number(value as f64)
    }
}

impl From<bool> for WireValue {
    fn from(value: bool) -> Self {
        WireValue::Bool(value)
    }
}

impl From<&str> for WireValue {
    fn from(value: &str) -> Self {
        WireValue::String(value.to_string())
    }
}

impl From<String> for WireValue {
    fn from(value: String) -> Self {
        WireValue::String(value)
    }
}
