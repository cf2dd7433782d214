//! Error types for signing and request authentication.

use doppel_types::ErrorCode;

/// Errors raised while signing, verifying or importing keys.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    /// A value that must be a JSON object was something else.
    #[error("signed value is not a JSON object")]
    NotAnObject,

    /// Canonical JSON could not be produced.
    #[error("canonical JSON encoding failed: {0}")]
    Canonical(#[from] serde_json::Error),

    /// Base64 input could not be decoded.
    #[error("invalid base64: {0}")]
    Base64(String),

    /// Key material has the wrong length or is not a valid Ed25519 point.
    #[error("invalid key material: {0}")]
    InvalidKey(String),

    /// The value carries no signature from the expected server and key.
    #[error("no signature from {server} with key {key_id}")]
    MissingSignature { server: String, key_id: String },

    /// A signature was present but did not verify.
    #[error("signature from {server} with key {key_id} did not verify")]
    BadSignature { server: String, key_id: String },

    /// A key document is malformed or names an unexpected server.
    #[error("invalid key document: {0}")]
    InvalidKeyDocument(String),

    /// Fetching a peer's key document failed.
    #[error("key fetch failed: {0}")]
    Fetch(#[from] reqwest::Error),
}

/// Reasons an inbound request fails authentication.
///
/// Every variant maps to an HTTP status and machine-readable error code via
/// [`AuthError::status`] and [`AuthError::errcode`], so the transport layer
/// never has to interpret it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("missing X-Matrix Authorization header")]
    MissingAuthorization,

    #[error("malformed X-Matrix Authorization header: {0}")]
    MalformedAuthorization(String),

    #[error("request is addressed to {got}, not {expected}")]
    WrongDestination { expected: String, got: String },

    #[error("no verify key {key_id} known for {origin}")]
    UnknownKey { origin: String, key_id: String },

    #[error("verify key {key_id} of {origin} expired at {valid_until_ts}")]
    ExpiredKey {
        origin: String,
        key_id: String,
        valid_until_ts: i64,
    },

    #[error("invalid request signature from {origin}")]
    InvalidSignature { origin: String },

    #[error("request body is not valid JSON: {0}")]
    BadJson(String),
}

impl AuthError {
    /// HTTP status the request should be rejected with.
    pub fn status(&self) -> u16 {
        match self {
            Self::BadJson(_) => 400,
            _ => 401,
        }
    }

    /// Machine-readable error code for the response body.
    pub fn errcode(&self) -> ErrorCode {
        match self {
            Self::BadJson(_) => ErrorCode::BadJson,
            _ => ErrorCode::Unauthorized,
        }
    }
}
