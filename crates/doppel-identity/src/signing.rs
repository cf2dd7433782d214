//! Signing and verifying JSON objects.
//!
//! The signed bytes are the canonical JSON of the object with its
//! `signatures` and `unsigned` keys removed. Signatures are stored back into
//! the object as `signatures.<server>.<key id> = <unpadded base64>`.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde_json::{Map, Value};

use crate::canonical::{canonical_json, decode_base64, encode_base64};
use crate::error::IdentityError;

/// Returns the canonical bytes a signature over `value` covers.
pub fn signable_bytes(value: &Value) -> Result<Vec<u8>, IdentityError> {
    let mut stripped = value.as_object().ok_or(IdentityError::NotAnObject)?.clone();
    stripped.remove("signatures");
    stripped.remove("unsigned");
    canonical_json(&Value::Object(stripped))
}

/// Computes the base64 signature `signing_key` places on `value`.
pub fn signature_for(signing_key: &SigningKey, value: &Value) -> Result<String, IdentityError> {
    let bytes = signable_bytes(value)?;
    Ok(encode_base64(&signing_key.sign(&bytes).to_bytes()))
}

/// Signs `value` in place, keeping every signature already present.
pub fn sign_json(
    server: &str,
    key_id: &str,
    signing_key: &SigningKey,
    value: &mut Value,
) -> Result<(), IdentityError> {
    let signature = signature_for(signing_key, value)?;
    insert_signature(value, server, key_id, signature)
}

/// Stores a precomputed signature into `value.signatures`.
pub fn insert_signature(
    value: &mut Value,
    server: &str,
    key_id: &str,
    signature: String,
) -> Result<(), IdentityError> {
    let object = value.as_object_mut().ok_or(IdentityError::NotAnObject)?;
    let signatures = object
        .entry("signatures")
        .or_insert_with(|| Value::Object(Map::new()));
    if !signatures.is_object() {
        *signatures = Value::Object(Map::new());
    }
    let by_server = signatures
        .as_object_mut()
        .ok_or(IdentityError::NotAnObject)?
        .entry(server.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if !by_server.is_object() {
        *by_server = Value::Object(Map::new());
    }
    by_server
        .as_object_mut()
        .ok_or(IdentityError::NotAnObject)?
        .insert(key_id.to_string(), Value::String(signature));
    Ok(())
}

/// Verifies that `value` carries a valid signature by `server` with `key_id`.
pub fn verify_json(
    server: &str,
    key_id: &str,
    verifying_key: &VerifyingKey,
    value: &Value,
) -> Result<(), IdentityError> {
    let encoded = value
        .get("signatures")
        .and_then(|s| s.get(server))
        .and_then(|s| s.get(key_id))
        .and_then(Value::as_str)
        .ok_or_else(|| IdentityError::MissingSignature {
            server: server.to_string(),
            key_id: key_id.to_string(),
        })?;
    verify_bytes(server, key_id, verifying_key, &signable_bytes(value)?, encoded)
}

/// Verifies a base64 signature over raw bytes.
pub fn verify_bytes(
    server: &str,
    key_id: &str,
    verifying_key: &VerifyingKey,
    message: &[u8],
    encoded_signature: &str,
) -> Result<(), IdentityError> {
    let bad = || IdentityError::BadSignature {
        server: server.to_string(),
        key_id: key_id.to_string(),
    };
    let raw = decode_base64(encoded_signature).map_err(|_| bad())?;
    let raw: [u8; 64] = raw.try_into().map_err(|_| bad())?;
    verifying_key
        .verify(message, &Signature::from_bytes(&raw))
        .map_err(|_| bad())
}

/// Parses an unpadded base64 Ed25519 public key.
pub fn parse_verifying_key(encoded: &str) -> Result<VerifyingKey, IdentityError> {
    let raw = decode_base64(encoded)?;
    let raw: [u8; 32] = raw
        .try_into()
        .map_err(|_| IdentityError::InvalidKey("expected 32 bytes".to_string()))?;
    VerifyingKey::from_bytes(&raw).map_err(|e| IdentityError::InvalidKey(e.to_string()))
}
