//! License key text format.
//!
//! Keys are formatted as:
//!
//! ```text
//! KFL1-<base64({"algorithm":..,"payload":{..},"signature":..,"version":"1.0"})>
//! ```
//!
//! The signature covers the canonical JSON of the payload: object keys in
//! lexicographic order at every level, no insignificant whitespace. Two
//! payloads with equal content always produce identical signable bytes,
//! however they were constructed.
//!
//! Decoding never checks the signature.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use keyforge_crypto::SignatureAlgorithm;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::{LicenseError, LicenseResult};
use crate::types::LicensePayload;

/// Literal prefix of every license key.
pub const KEY_PREFIX: &str = "KFL1-";

/// Envelope format version written by [`encode`].
pub const KEY_FORMAT_VERSION: &str = "1.0";

#[derive(Serialize, Deserialize)]
struct KeyEnvelope {
    payload: LicensePayload,
    signature: String,
    version: String,
    algorithm: SignatureAlgorithm,
}

/// The parts of a decoded (not yet verified) license key.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedKey {
    pub payload: LicensePayload,
    pub signature: String,
    pub algorithm: SignatureAlgorithm,
    pub version: String,
}

/// Returns the bytes a license signature is computed over.
pub fn canonical_payload_bytes(payload: &LicensePayload) -> LicenseResult<Vec<u8>> {
    let value = canonicalize(serde_json::to_value(payload)?);
    Ok(serde_json::to_vec(&value)?)
}

/// Encodes a signed payload as license key text.
pub fn encode(
    payload: &LicensePayload,
    signature: &str,
    algorithm: SignatureAlgorithm,
) -> LicenseResult<String> {
    let envelope = KeyEnvelope {
        payload: payload.clone(),
        signature: signature.to_string(),
        version: KEY_FORMAT_VERSION.to_string(),
        algorithm,
    };
    let json = serde_json::to_vec(&canonicalize(serde_json::to_value(&envelope)?))?;
    Ok(format!("{KEY_PREFIX}{}", BASE64.encode(json)))
}

/// Decodes license key text into payload and signature.
///
/// Fails with [`LicenseError::MalformedKey`] if the prefix is missing, the
/// body is not base64 JSON, required fields are absent, or the envelope
/// version is not understood.
pub fn decode(key: &str) -> LicenseResult<DecodedKey> {
    let key = key.trim();
    let body = key
        .strip_prefix(KEY_PREFIX)
        .ok_or_else(|| LicenseError::MalformedKey("missing key prefix".to_string()))?;

    let json = BASE64
        .decode(body)
        .map_err(|e| LicenseError::MalformedKey(format!("invalid base64: {e}")))?;

    let envelope: KeyEnvelope = serde_json::from_slice(&json)
        .map_err(|e| LicenseError::MalformedKey(format!("invalid key body: {e}")))?;

    if envelope.version != KEY_FORMAT_VERSION {
        return Err(LicenseError::MalformedKey(format!(
            "unsupported key version '{}'",
            envelope.version
        )));
    }

    Ok(DecodedKey {
        payload: envelope.payload,
        signature: envelope.signature,
        algorithm: envelope.algorithm,
        version: envelope.version,
    })
}

/// Short, stable identifier for a license key, safe to log and persist.
#[must_use]
pub fn key_fingerprint(key: &str) -> String {
    hex::encode(Sha256::digest(key.trim().as_bytes()))
}

/// Rebuilds every JSON object with its keys in sorted order.
fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::new();
            for (k, v) in entries {
                sorted.insert(k, canonicalize(v));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}
