//! The responder's long-term identity: server name, signing key, key ID.

use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use serde_json::{json, Value};
use std::collections::BTreeMap;

use doppel_types::{ServerKeys, VerifyKey};

use crate::canonical::{canonical_json, decode_base64, encode_base64};
use crate::error::IdentityError;
use crate::signing::sign_json;

/// How long a published key document stays valid (24 hours).
pub const KEY_VALIDITY_MS: i64 = 24 * 60 * 60 * 1000;

/// Default key identifier used when none is configured.
pub const DEFAULT_KEY_ID: &str = "ed25519:1";

/// A server name plus the Ed25519 key it signs with.
///
/// Immutable after construction; shared behind an `Arc` by request handlers.
#[derive(Debug, Clone)]
pub struct ServerIdentity {
    server_name: String,
    key_id: String,
    signing_key: SigningKey,
}

impl ServerIdentity {
    /// Creates an identity with a freshly generated key.
    pub fn generate(server_name: impl Into<String>, key_id: impl Into<String>) -> Self {
        Self::from_signing_key(
            server_name,
            key_id,
            SigningKey::generate(&mut rand::rngs::OsRng),
        )
    }

    /// Creates an identity from an existing key.
    pub fn from_signing_key(
        server_name: impl Into<String>,
        key_id: impl Into<String>,
        signing_key: SigningKey,
    ) -> Self {
        Self {
            server_name: server_name.into(),
            key_id: key_id.into(),
            signing_key,
        }
    }

    /// Creates an identity from a base64-encoded 32-byte seed.
    pub fn from_seed_base64(
        server_name: impl Into<String>,
        key_id: impl Into<String>,
        seed: &str,
    ) -> Result<Self, IdentityError> {
        let raw = decode_base64(seed)?;
        let raw: [u8; 32] = raw
            .try_into()
            .map_err(|_| IdentityError::InvalidKey("seed must be 32 bytes".to_string()))?;
        Ok(Self::from_signing_key(
            server_name,
            key_id,
            SigningKey::from_bytes(&raw),
        ))
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// The public key as unpadded base64, as published in key documents.
    pub fn public_key_base64(&self) -> String {
        encode_base64(self.verifying_key().as_bytes())
    }

    /// Signs raw bytes, returning the unpadded base64 signature.
    pub fn sign(&self, payload: &[u8]) -> String {
        encode_base64(&self.signing_key.sign(payload).to_bytes())
    }

    /// Adds this server's signature to a JSON object.
    pub fn sign_json(&self, value: &mut Value) -> Result<(), IdentityError> {
        sign_json(&self.server_name, &self.key_id, &self.signing_key, value)
    }

    /// Builds the self-signed key document published at `now_ms`.
    ///
    /// The document lists the current key only, has no superseded keys, and
    /// expires exactly [`KEY_VALIDITY_MS`] after `now_ms`.
    pub fn server_key_document(&self, now_ms: i64) -> Result<Value, IdentityError> {
        let keys = ServerKeys {
            server_name: self.server_name.clone(),
            verify_keys: BTreeMap::from([(
                self.key_id.clone(),
                VerifyKey {
                    key: self.public_key_base64(),
                },
            )]),
            old_verify_keys: BTreeMap::new(),
            valid_until_ts: now_ms + KEY_VALIDITY_MS,
            signatures: None,
        };
        let mut document = serde_json::to_value(keys)?;
        self.sign_json(&mut document)?;
        Ok(document)
    }

    /// Produces an `Authorization` header value authenticating a request
    /// from this server to `destination`.
    pub fn sign_request(
        &self,
        method: &str,
        uri: &str,
        destination: &str,
        content: Option<&Value>,
    ) -> Result<String, IdentityError> {
        let signed = request_signing_json(method, uri, &self.server_name, destination, content);
        let signature = self.sign(&canonical_json(&signed)?);
        Ok(format!(
            "X-Matrix origin=\"{}\",destination=\"{}\",key=\"{}\",sig=\"{}\"",
            self.server_name, destination, self.key_id, signature
        ))
    }
}

/// The JSON object whose canonical form a request signature covers.
pub fn request_signing_json(
    method: &str,
    uri: &str,
    origin: &str,
    destination: &str,
    content: Option<&Value>,
) -> Value {
    let mut signed = json!({
        "method": method,
        "uri": uri,
        "origin": origin,
        "destination": destination,
    });
    if let (Some(content), Some(object)) = (content, signed.as_object_mut()) {
        object.insert("content".to_string(), content.clone());
    }
    signed
}
