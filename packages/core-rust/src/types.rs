//! Payload and response-metadata value types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Decoded request or response body. Encoding is owned by the transport.
pub type Payload = serde_json::Value;

/// Whether `value` counts as a present, non-empty result.
///
/// `null`, `false`, `0` and `""` are absent; everything else, including empty
/// arrays and objects, is present.
#[must_use]
pub fn is_truthy(value: &Payload) -> bool {
    match value {
        Payload::Null => false,
        Payload::Bool(b) => *b,
        Payload::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Payload::String(s) => !s.is_empty(),
        Payload::Array(_) | Payload::Object(_) => true,
    }
}

/// The string-valued response headers sent alongside a completion.
///
/// Uses `BTreeMap` for deterministic ordering on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataFrame(BTreeMap<String, String>);

impl MetadataFrame {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}
