//! Tool-call arguments and their canonical JSON encoding.
//!
//! Callers hand arguments over either as a raw JSON string (what an LLM
//! emits) or as an already-structured [`serde_json::Value`]. Both are reduced
//! to one canonical string before they reach the cache, so that
//! `{"a":1,"b":2}` and `{"b":2,"a":1}` share a cache slot.
//!
//! The canonical form sorts object keys recursively (byte order) and emits no
//! insignificant whitespace. It is produced by [`canonical_json`] explicitly
//! and does not depend on which map type `serde_json` was built with.

use crate::error::ValidationError;
use serde_json::Value;
use std::borrow::Cow;

/// Arguments for one tool invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolArguments {
    /// A JSON document that still has to be parsed.
    Raw(String),
    /// A structured value. Always valid.
    Value(Value),
}

impl ToolArguments {
    /// Parse into a structured value. Raw strings that are not JSON fail.
    pub fn parse(&self) -> Result<Cow<'_, Value>, ValidationError> {
        match self {
            ToolArguments::Value(v) => Ok(Cow::Borrowed(v)),
            ToolArguments::Raw(raw) => serde_json::from_str::<Value>(raw)
                .map(Cow::Owned)
                .map_err(|e| ValidationError::new(format!("arguments are not valid JSON: {e}"))),
        }
    }

    /// Parse and re-encode in canonical form.
    pub fn canonicalize(&self) -> Result<String, ValidationError> {
        self.parse().map(|v| canonical_json(&v))
    }
}

impl From<&str> for ToolArguments {
    fn from(raw: &str) -> Self {
        ToolArguments::Raw(raw.to_string())
    }
}

impl From<String> for ToolArguments {
    fn from(raw: String) -> Self {
        ToolArguments::Raw(raw)
    }
}

impl From<Value> for ToolArguments {
    fn from(value: Value) -> Self {
        ToolArguments::Value(value)
    }
}

/// Encode `value` with recursively sorted object keys and no whitespace.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_unstable_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // Value's Display handles string escaping.
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(item, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
