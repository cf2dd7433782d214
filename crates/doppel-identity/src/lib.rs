//! Identity and signing for the doppel federation responder.
//!
//! Holds the responder's long-term Ed25519 key and server name, signs JSON
//! payloads and outgoing request headers, publishes the self-signed key
//! document, and authenticates inbound requests against a [`KeyRing`] of
//! trusted peer keys.
//!
//! # Signing model
//!
//! All signatures cover canonical JSON: keys sorted, no whitespace, with
//! `signatures` and `unsigned` stripped. Signatures and keys travel as
//! unpadded base64.

pub mod canonical;
mod error;
mod identity;
mod keyring;
mod request;
pub mod signing;

pub use canonical::{canonical_json, decode_base64, encode_base64, encode_base64_url};
pub use error::{AuthError, IdentityError};
pub use identity::{request_signing_json, ServerIdentity, DEFAULT_KEY_ID, KEY_VALIDITY_MS};
pub use keyring::KeyRing;
pub use request::{verify_request, VerifiedRequest, XMatrix};
pub use signing::{parse_verifying_key, sign_json, verify_json};
