//! Codec registry: extension (or part name) → decode function.
//!
//! # Lookup rules
//! Keys are matched exactly and case-sensitively.  A single leading `.` is
//! dropped on both registration and lookup, so `".json"` and `"json"` name
//! the same entry.  There is no wildcard matching and no content sniffing.
//!
//! A registry may carry a fallback.  The writer-side registry returned by
//! [`CodecRegistry::with_defaults`] always has one (byte identity), which is
//! what makes every extension representable even when nothing is registered
//! for it.
//!
//! # Process-wide registry
//! [`global`] holds the writer-side registry shared by the CLI and by
//! [`crate::tree::convert_tree_with_global`].  It is seeded with the
//! defaults on first use; [`register_global`] is the only mutation point.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use once_cell::sync::Lazy;
use thiserror::Error;

use crate::value::{Record, Value};

/// A decode function: raw payload bytes in, `T` out.
pub type DecodeFn<T> = Arc<dyn Fn(&[u8]) -> Result<T, CodecError> + Send + Sync>;

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("invalid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Invalid(String),
    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl CodecError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        CodecError::Invalid(msg.into())
    }
}

// ── Registry ────────────────────────────────────────────────────────────────

pub struct CodecRegistry<T> {
    entries:  BTreeMap<String, DecodeFn<T>>,
    fallback: Option<DecodeFn<T>>,
}

impl<T> CodecRegistry<T> {
    /// Empty registry without a fallback.
    pub fn new() -> Self {
        Self { entries: BTreeMap::new(), fallback: None }
    }

    /// Register `f` under `key`, replacing any previous entry.
    pub fn register<F>(&mut self, key: impl AsRef<str>, f: F) -> &mut Self
    where
        F: Fn(&[u8]) -> Result<T, CodecError> + Send + Sync + 'static,
    {
        self.entries.insert(normalize(key.as_ref()).to_owned(), Arc::new(f));
        self
    }

    /// Register an already shared function.
    pub fn register_shared(&mut self, key: impl AsRef<str>, f: DecodeFn<T>) -> &mut Self {
        self.entries.insert(normalize(key.as_ref()).to_owned(), f);
        self
    }

    pub fn set_fallback<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&[u8]) -> Result<T, CodecError> + Send + Sync + 'static,
    {
        self.fallback = Some(Arc::new(f));
        self
    }

    pub fn clear_fallback(&mut self) -> &mut Self {
        self.fallback = None;
        self
    }

    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    /// Exact lookup; ignores the fallback.
    pub fn resolve(&self, key: &str) -> Option<&DecodeFn<T>> {
        self.entries.get(normalize(key))
    }

    /// Exact lookup, then the fallback.
    pub fn resolve_or_fallback(&self, key: &str) -> Option<&DecodeFn<T>> {
        self.resolve(key).or(self.fallback.as_ref())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(normalize(key))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T> Default for CodecRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for CodecRegistry<T> {
    fn clone(&self) -> Self {
        Self { entries: self.entries.clone(), fallback: self.fallback.clone() }
    }
}

impl<T> fmt::Debug for CodecRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodecRegistry")
            .field("keys", &self.entries.keys().collect::<Vec<_>>())
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

impl CodecRegistry<Record> {
    /// Writer-side defaults: byte-identity fallback plus a validating
    /// `json` encoder.
    pub fn with_defaults() -> Self {
        let mut reg = Self::new();
        reg.set_fallback(encode::raw);
        reg.register("json", encode::json);
        reg
    }
}

fn normalize(key: &str) -> &str {
    key.strip_prefix('.').unwrap_or(key)
}

// ── Process-wide registry ───────────────────────────────────────────────────

static GLOBAL: Lazy<RwLock<CodecRegistry<Record>>> =
    Lazy::new(|| RwLock::new(CodecRegistry::with_defaults()));

pub fn global() -> &'static RwLock<CodecRegistry<Record>> {
    &GLOBAL
}

/// Add (or replace) an encoder in the process-wide registry.
pub fn register_global<F>(ext: &str, f: F)
where
    F: Fn(&[u8]) -> Result<Record, CodecError> + Send + Sync + 'static,
{
    global()
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .register(ext, f);
}

/// Copy of the process-wide registry, so a long walk never holds the lock.
pub fn global_snapshot() -> CodecRegistry<Record> {
    global().read().unwrap_or_else(PoisonError::into_inner).clone()
}

// ── Built-in encoders (writer side) ─────────────────────────────────────────

pub mod encode {
    use super::CodecError;
    use crate::value::Record;

    /// Identity: store the file's bytes as they are.
    pub fn raw(data: &[u8]) -> Result<Record, CodecError> {
        Ok(Record::bytes(data))
    }

    /// Validate as JSON, store the original bytes.
    pub fn json(data: &[u8]) -> Result<Record, CodecError> {
        serde_json::from_slice::<serde::de::IgnoredAny>(data)?;
        Ok(Record::json(data))
    }

    /// Validate as UTF-8, store the original bytes.
    pub fn utf8_text(data: &[u8]) -> Result<Record, CodecError> {
        std::str::from_utf8(data).map_err(|e| CodecError::invalid(e.to_string()))?;
        Ok(Record { kind: crate::value::RecordKind::Text, data: data.to_vec() })
    }
}

// ── Built-in decoders (reader side) ─────────────────────────────────────────

pub mod decode {
    use super::CodecError;
    use crate::value::Value;

    pub fn bytes(raw: &[u8]) -> Result<Value, CodecError> {
        Ok(Value::Bytes(raw.to_vec()))
    }

    pub fn utf8(raw: &[u8]) -> Result<Value, CodecError> {
        Ok(Value::Text(String::from_utf8(raw.to_vec())?))
    }

    pub fn json(raw: &[u8]) -> Result<Value, CodecError> {
        Ok(Value::Json(serde_json::from_slice(raw)?))
    }
}
