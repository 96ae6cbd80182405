//! Serialization protocol for checkpoint state
//!
//! Every state payload has one **canonical textual form**: JSON with
//! recursively sorted object keys. Fingerprints are computed over that form,
//! which makes them independent of map insertion order — two semantically
//! equal payloads always hash identically.
//!
//! Three serialization flavors are selectable at session construction via
//! [`SerializerKind`]:
//!
//! - [`JsonSerializer`] - human-readable text, preferred for the file-tree
//!   backend
//! - [`BincodeSerializer`] - opaque binary framing of the canonical form
//! - [`GzipSerializer`] - gzip compression over an inner serializer
//!
//! All flavors are round-trip-lossless for JSON-representable values.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::checkpoint::StateMap;
use crate::error::Result;

/// Hex length of a content fingerprint.
const FINGERPRINT_LEN: usize = 16;

/// Render a JSON value in canonical form: object keys recursively sorted,
/// no insignificant whitespace.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // Object keys are plain strings; serializing one cannot fail.
                out.push_str(&serde_json::to_string(key).unwrap_or_default());
                out.push(':');
                write_canonical(&map[*key], out);
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
        other => out.push_str(&other.to_string()),
    }
}

/// Deterministic content hash over `(state, metadata, logic_step)`.
///
/// A pure function of its inputs: equal payloads (up to key order) produce
/// equal fingerprints.
pub fn fingerprint(state: &StateMap, metadata: &StateMap, logic_step: &str) -> String {
    let record = serde_json::json!({
        "logic_step": logic_step,
        "metadata": Value::Object(metadata.clone()),
        "state": Value::Object(state.clone()),
    });
    let canonical = canonical_json(&record);
    let digest = Sha256::digest(canonical.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    hex[..FINGERPRINT_LEN].to_string()
}

/// Protocol for converting state payloads to and from a byte form
///
/// Implementations must be lossless for the JSON-representable subset.
pub trait StateSerializer: Send + Sync {
    /// Serialize a value to bytes
    fn to_bytes(&self, value: &Value) -> Result<Vec<u8>>;

    /// Deserialize a value from bytes
    fn from_bytes(&self, data: &[u8]) -> Result<Value>;
}

/// Serialization flavor selected at session construction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SerializerKind {
    /// Human-readable text
    #[default]
    Json,
    /// Opaque binary
    Binary,
    /// Compressed binary
    CompressedBinary,
}

impl SerializerKind {
    /// Build the serializer for this flavor.
    pub fn build(self) -> Box<dyn StateSerializer> {
        match self {
            SerializerKind::Json => Box::new(JsonSerializer::new()),
            SerializerKind::Binary => Box::new(BincodeSerializer::new()),
            SerializerKind::CompressedBinary => Box::new(GzipSerializer::default()),
        }
    }
}

/// Human-readable JSON serializer (default)
#[derive(Debug, Clone, Default)]
pub struct JsonSerializer {
    pretty: bool,
}

impl JsonSerializer {
    pub fn new() -> Self {
        Self { pretty: true }
    }

    /// Compact output, used as the inner layer of compressed storage.
    pub fn compact() -> Self {
        Self { pretty: false }
    }
}

impl StateSerializer for JsonSerializer {
    fn to_bytes(&self, value: &Value) -> Result<Vec<u8>> {
        if self.pretty {
            Ok(serde_json::to_vec_pretty(value)?)
        } else {
            Ok(canonical_json(value).into_bytes())
        }
    }

    fn from_bytes(&self, data: &[u8]) -> Result<Value> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// Opaque binary serializer
///
/// Frames the canonical textual form with bincode. `serde_json::Value` is
/// not directly representable in a non-self-describing format, so the
/// canonical text is the payload and bincode provides the length-prefixed
/// binary envelope.
#[derive(Debug, Clone, Default)]
pub struct BincodeSerializer;

impl BincodeSerializer {
    pub fn new() -> Self {
        Self
    }
}

impl StateSerializer for BincodeSerializer {
    fn to_bytes(&self, value: &Value) -> Result<Vec<u8>> {
        Ok(bincode::serialize(&canonical_json(value))?)
    }

    fn from_bytes(&self, data: &[u8]) -> Result<Value> {
        let text: String = bincode::deserialize(data)?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Compression wrapper: gzip over an inner serializer
pub struct GzipSerializer {
    inner: Box<dyn StateSerializer>,
    level: Compression,
}

impl GzipSerializer {
    pub fn new(inner: Box<dyn StateSerializer>, level: u32) -> Self {
        Self {
            inner,
            level: Compression::new(level),
        }
    }
}

impl Default for GzipSerializer {
    fn default() -> Self {
        Self::new(Box::new(BincodeSerializer::new()), 6)
    }
}

impl StateSerializer for GzipSerializer {
    fn to_bytes(&self, value: &Value) -> Result<Vec<u8>> {
        let raw = self.inner.to_bytes(value)?;
        let mut encoder = GzEncoder::new(Vec::new(), self.level);
        encoder.write_all(&raw)?;
        Ok(encoder.finish()?)
    }

    fn from_bytes(&self, data: &[u8]) -> Result<Value> {
        let mut decoder = GzDecoder::new(data);
        let mut raw = Vec::new();
        decoder.read_to_end(&mut raw)?;
        self.inner.from_bytes(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map_of(pairs: &[(&str, Value)]) -> StateMap {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_canonical_json_sorts_keys() {
        let value = json!({"b": 2, "a": {"z": 1, "y": [3, {"q": 4, "p": 5}]}});
        assert_eq!(
            canonical_json(&value),
            r#"{"a":{"y":[3,{"p":5,"q":4}],"z":1},"b":2}"#,
        );
    }

    #[test]
    fn test_fingerprint_key_order_independent() {
        let a = map_of(&[("x", json!(1)), ("y", json!({"n": 1, "m": 2}))]);
        let mut b = StateMap::new();
        b.insert("y".into(), json!({"m": 2, "n": 1}));
        b.insert("x".into(), json!(1));

        let meta = map_of(&[("confidence", json!(0.9))]);
        assert_eq!(
            fingerprint(&a, &meta, "plan"),
            fingerprint(&b, &meta, "plan")
        );
    }

    #[test]
    fn test_fingerprint_sensitive_to_content() {
        let state = map_of(&[("x", json!(1))]);
        let meta = StateMap::new();

        let base = fingerprint(&state, &meta, "plan");
        assert_ne!(base, fingerprint(&state, &meta, "other_step"));
        assert_ne!(
            base,
            fingerprint(&map_of(&[("x", json!(2))]), &meta, "plan")
        );
        assert_ne!(
            base,
            fingerprint(&state, &map_of(&[("k", json!(true))]), "plan")
        );
    }

    #[test]
    fn test_json_round_trip() {
        let serializer = JsonSerializer::new();
        let value = json!({"task": "t", "nested": {"a": [1, 2.5, null, true], "b": "s"}});

        let bytes = serializer.to_bytes(&value).unwrap();
        assert_eq!(serializer.from_bytes(&bytes).unwrap(), value);
    }

    #[test]
    fn test_bincode_round_trip() {
        let serializer = BincodeSerializer::new();
        let value = json!({"step": 1, "items": ["a", "b"], "flag": false});

        let bytes = serializer.to_bytes(&value).unwrap();
        assert_eq!(serializer.from_bytes(&bytes).unwrap(), value);
    }

    #[test]
    fn test_gzip_round_trip_and_shrinks_repetitive_payloads() {
        let serializer = GzipSerializer::default();
        let repeated = "reasoning step ".repeat(200);
        let value = json!({"log": repeated});

        let bytes = serializer.to_bytes(&value).unwrap();
        assert!(bytes.len() < canonical_json(&value).len());
        assert_eq!(serializer.from_bytes(&bytes).unwrap(), value);
    }

    #[test]
    fn test_kind_builds_round_trip_serializers() {
        let value = json!({"k": [1, {"inner": "v"}]});
        for kind in [
            SerializerKind::Json,
            SerializerKind::Binary,
            SerializerKind::CompressedBinary,
        ] {
            let serializer = kind.build();
            let bytes = serializer.to_bytes(&value).unwrap();
            assert_eq!(serializer.from_bytes(&bytes).unwrap(), value, "{kind:?}");
        }
    }
}
