//! Canonical JSON serialization and digests
//!
//! Every result object and model fingerprint in this crate is serialized
//! through this module so that map keys are sorted, whitespace is absent,
//! and number formatting is the shortest round-trippable form. Two equal
//! values therefore always produce the same bytes, which is what makes the
//! byte-identical report guarantee checkable with a plain digest compare.

use crate::errors::Result;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Serialize a value to canonical JSON (recursively sorted keys, compact).
pub fn to_canonical_json<T: Serialize>(value: &T) -> Result<String> {
    let json_value = serde_json::to_value(value)?;
    let canonical = canonicalize_value(&json_value);
    Ok(serde_json::to_string(&canonical)?)
}

/// Sort all object keys recursively so serialization order never depends on
/// the host map's iteration order.
fn canonicalize_value(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let sorted: BTreeMap<String, serde_json::Value> = map
                .iter()
                .map(|(k, v)| (k.clone(), canonicalize_value(v)))
                .collect();
            serde_json::Value::Object(sorted.into_iter().collect())
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(canonicalize_value).collect())
        }
        other => other.clone(),
    }
}

/// BLAKE3 digest of a value's canonical JSON representation.
pub fn canonical_digest<T: Serialize>(value: &T) -> Result<[u8; 32]> {
    let json = to_canonical_json(value)?;
    Ok(*blake3::hash(json.as_bytes()).as_bytes())
}

/// BLAKE3 digest of a value's canonical JSON, hex-encoded (64 chars).
pub fn canonical_digest_hex<T: Serialize>(value: &T) -> Result<String> {
    Ok(hex::encode(canonical_digest(value)?))
}

/// BLAKE3 digest of a file's raw bytes, hex-encoded.
///
/// Used by evidence-pack verification to prove two generated reports are
/// byte-identical.
pub fn file_digest_hex(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}

/// Compare two generated outputs byte-for-byte via their digests.
///
/// Returns `(identical, digest_a, digest_b)`.
pub fn verify_identical_outputs(a: &Path, b: &Path) -> Result<(bool, String, String)> {
    let digest_a = file_digest_hex(a)?;
    let digest_b = file_digest_hex(b)?;
    let identical = digest_a == digest_b;
    Ok((identical, digest_a, digest_b))
}
