//! Authentication of inbound federation requests (`X-Matrix` scheme).

use serde_json::Value;

use crate::canonical::canonical_json;
use crate::error::AuthError;
use crate::identity::request_signing_json;
use crate::keyring::KeyRing;
use crate::signing::verify_bytes;

/// Parameters of one `Authorization: X-Matrix ...` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XMatrix {
    pub origin: String,
    pub destination: Option<String>,
    pub key_id: String,
    pub signature: String,
}

impl XMatrix {
    /// Parses a header value such as
    /// `X-Matrix origin="a",destination="b",key="ed25519:1",sig="..."`.
    pub fn parse(header: &str) -> Result<Self, AuthError> {
        let malformed = |msg: &str| AuthError::MalformedAuthorization(msg.to_string());
        let (scheme, params) = header
            .trim()
            .split_once(' ')
            .ok_or_else(|| malformed("missing parameters"))?;
        if !scheme.eq_ignore_ascii_case("X-Matrix") {
            return Err(malformed("scheme is not X-Matrix"));
        }

        let mut origin = None;
        let mut destination = None;
        let mut key_id = None;
        let mut signature = None;
        for param in params.split(',') {
            let Some((name, value)) = param.trim().split_once('=') else {
                continue;
            };
            let value = value.trim().trim_matches('"').to_string();
            match name.trim().to_ascii_lowercase().as_str() {
                "origin" => origin = Some(value),
                "destination" => destination = Some(value),
                "key" => key_id = Some(value),
                "sig" => signature = Some(value),
                _ => {}
            }
        }

        Ok(Self {
            origin: origin.ok_or_else(|| malformed("missing origin"))?,
            destination,
            key_id: key_id.ok_or_else(|| malformed("missing key"))?,
            signature: signature.ok_or_else(|| malformed("missing sig"))?,
        })
    }
}

/// An inbound request whose signature has been checked.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedRequest {
    /// The server that signed the request.
    pub origin: String,
    pub method: String,
    pub uri: String,
    /// The parsed JSON body, if the request had one.
    pub content: Option<Value>,
}

impl VerifiedRequest {
    /// The body, or `null` for body-less requests.
    pub fn content(&self) -> &Value {
        self.content.as_ref().unwrap_or(&Value::Null)
    }
}

/// Verifies an inbound request against the key ring.
///
/// `authorization` holds every `Authorization` header value on the request;
/// the first `X-Matrix` one that verifies wins. `now_ms` is checked against
/// the validity window of the signing key.
pub fn verify_request(
    key_ring: &KeyRing,
    local_server: &str,
    method: &str,
    uri: &str,
    authorization: &[&str],
    body: &[u8],
    now_ms: i64,
) -> Result<VerifiedRequest, AuthError> {
    let content = if body.is_empty() {
        None
    } else {
        Some(
            serde_json::from_slice::<Value>(body)
                .map_err(|e| AuthError::BadJson(e.to_string()))?,
        )
    };

    let mut last_error = AuthError::MissingAuthorization;
    for header in authorization {
        match verify_one(key_ring, local_server, method, uri, header, content.as_ref(), now_ms) {
            Ok(origin) => {
                return Ok(VerifiedRequest {
                    origin,
                    method: method.to_string(),
                    uri: uri.to_string(),
                    content,
                })
            }
            Err(e) => {
                tracing::debug!(error = %e, uri, "request authorization header rejected");
                last_error = e;
            }
        }
    }
    Err(last_error)
}

fn verify_one(
    key_ring: &KeyRing,
    local_server: &str,
    method: &str,
    uri: &str,
    header: &str,
    content: Option<&Value>,
    now_ms: i64,
) -> Result<String, AuthError> {
    let auth = XMatrix::parse(header)?;
    if let Some(destination) = &auth.destination {
        if destination != local_server {
            return Err(AuthError::WrongDestination {
                expected: local_server.to_string(),
                got: destination.clone(),
            });
        }
    }

    let key = key_ring.lookup(&auth.origin, &auth.key_id, now_ms)?;
    let signed = request_signing_json(method, uri, &auth.origin, local_server, content);
    let message = canonical_json(&signed).map_err(|e| AuthError::BadJson(e.to_string()))?;
    verify_bytes(&auth.origin, &auth.key_id, &key, &message, &auth.signature).map_err(|_| {
        AuthError::InvalidSignature {
            origin: auth.origin.clone(),
        }
    })?;
    Ok(auth.origin)
}
