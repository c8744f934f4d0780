//! Values moving through the codec registry.
//!
//! * [`Record`] is what a writer-side encoder hands to the container: a
//!   [`RecordKind`] tag plus the payload bytes.
//! * [`Value`] is what a reader-side decoder produces for trial assembly.
//!   Inline trial parts are `Value`s too, so both kinds of part can live in
//!   one map.

use serde::{Deserialize, Serialize};

// ── RecordKind ──────────────────────────────────────────────────────────────

/// Payload interpretation stored alongside each record.  Advisory: readers
/// always get the raw bytes and decide for themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    #[default]
    Bytes,
    Text,
    Json,
}

impl RecordKind {
    pub fn id(self) -> u8 {
        match self {
            RecordKind::Bytes => 0,
            RecordKind::Text  => 1,
            RecordKind::Json  => 2,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(RecordKind::Bytes),
            1 => Some(RecordKind::Text),
            2 => Some(RecordKind::Json),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            RecordKind::Bytes => "bytes",
            RecordKind::Text  => "text",
            RecordKind::Json  => "json",
        }
    }
}

// ── Record ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub kind: RecordKind,
    pub data: Vec<u8>,
}

impl Record {
    /// Raw bytes, stored verbatim.
    pub fn bytes(data: impl Into<Vec<u8>>) -> Self {
        Self { kind: RecordKind::Bytes, data: data.into() }
    }

    pub fn text(s: impl Into<String>) -> Self {
        Self { kind: RecordKind::Text, data: s.into().into_bytes() }
    }

    pub fn json(data: impl Into<Vec<u8>>) -> Self {
        Self { kind: RecordKind::Json, data: data.into() }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

// ── Value ───────────────────────────────────────────────────────────────────

/// A decoded trial part or an inline scalar.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bytes(Vec<u8>),
    Text(String),
    Bool(bool),
    Int(i64),
    Float(f64),
    Json(serde_json::Value),
    Tuple(Vec<Value>),
}

impl Value {
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            Value::Text(s)  => Some(s.as_bytes()),
            _               => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _              => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _              => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _             => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i)   => Some(*i as f64),
            _               => None,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Value::Json(j) => Some(j),
            _              => None,
        }
    }

    pub fn as_tuple(&self) -> Option<&[Value]> {
        match self {
            Value::Tuple(t) => Some(t),
            _               => None,
        }
    }

    /// Short type name for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bytes(_) => "bytes",
            Value::Text(_)  => "text",
            Value::Bool(_)  => "bool",
            Value::Int(_)   => "int",
            Value::Float(_) => "float",
            Value::Json(_)  => "json",
            Value::Tuple(_) => "tuple",
        }
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self { Value::Bytes(v) }
}

impl From<String> for Value {
    fn from(v: String) -> Self { Value::Text(v) }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self { Value::Text(v.to_owned()) }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self { Value::Bool(v) }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self { Value::Int(v) }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self { Value::Float(v) }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self { Value::Json(v) }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self { Value::Tuple(v) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_kind_ids_round_trip() {
        for k in [RecordKind::Bytes, RecordKind::Text, RecordKind::Json] {
            assert_eq!(RecordKind::from_id(k.id()), Some(k));
        }
        assert_eq!(RecordKind::from_id(9), None);
    }

    #[test]
    fn accessors_match_variants() {
        assert_eq!(Value::from("abc").as_str(), Some("abc"));
        assert_eq!(Value::from("abc").as_bytes(), Some(&b"abc"[..]));
        assert_eq!(Value::from(true).as_bool(), Some(true));
        assert_eq!(Value::from(3i64).as_float(), Some(3.0));
        assert_eq!(Value::from(3i64).as_str(), None);

        let nested = Value::from(vec![Value::from(1i64), Value::from(vec![Value::from(false)])]);
        assert_eq!(nested.as_tuple().map(|t| t.len()), Some(2));
        assert_eq!(nested.type_name(), "tuple");
    }
}
