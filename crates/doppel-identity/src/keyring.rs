//! Verify keys of peer servers, trusted for request authentication.

use ed25519_dalek::VerifyingKey;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use doppel_types::ServerKeys;

use crate::error::{AuthError, IdentityError};
use crate::identity::ServerIdentity;
use crate::signing::{parse_verifying_key, verify_json};

#[derive(Debug, Clone, Copy)]
struct TrustedKey {
    key: VerifyingKey,
    valid_until_ts: i64,
}

/// Peer server name -> key ID -> trusted verify key.
///
/// Filled out of band (configuration, tests, key document imports). Uses a
/// `std::sync::RwLock`: lookups and inserts are brief map operations that
/// never span an `.await`.
#[derive(Debug, Default)]
pub struct KeyRing {
    keys: RwLock<HashMap<String, HashMap<String, TrustedKey>>>,
}

impl KeyRing {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, HashMap<String, TrustedKey>>> {
        self.keys.read().unwrap_or_else(|poisoned| {
            tracing::error!("key ring lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, HashMap<String, TrustedKey>>> {
        self.keys.write().unwrap_or_else(|poisoned| {
            tracing::error!("key ring lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Trusts `key` for `server_name` until `valid_until_ts` (ms).
    pub fn add_key(
        &self,
        server_name: impl Into<String>,
        key_id: impl Into<String>,
        key: VerifyingKey,
        valid_until_ts: i64,
    ) {
        self.write().entry(server_name.into()).or_default().insert(
            key_id.into(),
            TrustedKey {
                key,
                valid_until_ts,
            },
        );
    }

    /// Trusts another identity's current key. Mostly useful in tests, where
    /// a second identity plays the remote peer.
    pub fn trust(&self, identity: &ServerIdentity, valid_until_ts: i64) {
        self.add_key(
            identity.server_name(),
            identity.key_id(),
            identity.verifying_key(),
            valid_until_ts,
        );
    }

    /// Looks up a key usable at `now_ms`.
    pub fn lookup(&self, origin: &str, key_id: &str, now_ms: i64) -> Result<VerifyingKey, AuthError> {
        let trusted = self
            .read()
            .get(origin)
            .and_then(|keys| keys.get(key_id))
            .copied()
            .ok_or_else(|| AuthError::UnknownKey {
                origin: origin.to_string(),
                key_id: key_id.to_string(),
            })?;
        if trusted.valid_until_ts < now_ms {
            return Err(AuthError::ExpiredKey {
                origin: origin.to_string(),
                key_id: key_id.to_string(),
                valid_until_ts: trusted.valid_until_ts,
            });
        }
        Ok(trusted.key)
    }

    /// Whether any key at all is known for `origin`.
    pub fn knows(&self, origin: &str) -> bool {
        self.read().get(origin).is_some_and(|keys| !keys.is_empty())
    }

    /// Imports a peer's self-signed key document.
    ///
    /// Every listed verify key must have signed the document. When
    /// `expected_server` is given the document must name that server.
    /// Returns the number of keys imported.
    pub fn import_server_keys(
        &self,
        document: &Value,
        expected_server: Option<&str>,
    ) -> Result<usize, IdentityError> {
        let keys: ServerKeys = serde_json::from_value(document.clone())
            .map_err(|e| IdentityError::InvalidKeyDocument(e.to_string()))?;
        if let Some(expected) = expected_server {
            if keys.server_name != expected {
                return Err(IdentityError::InvalidKeyDocument(format!(
                    "document is for {}, expected {}",
                    keys.server_name, expected
                )));
            }
        }
        if keys.verify_keys.is_empty() {
            return Err(IdentityError::InvalidKeyDocument(
                "document lists no verify keys".to_string(),
            ));
        }

        let mut parsed = Vec::with_capacity(keys.verify_keys.len());
        for (key_id, verify_key) in &keys.verify_keys {
            let key = parse_verifying_key(&verify_key.key)?;
            verify_json(&keys.server_name, key_id, &key, document)?;
            parsed.push((key_id.clone(), key));
        }

        let count = parsed.len();
        for (key_id, key) in parsed {
            self.add_key(keys.server_name.clone(), key_id, key, keys.valid_until_ts);
        }
        tracing::info!(
            server_name = %keys.server_name,
            count,
            valid_until_ts = keys.valid_until_ts,
            "imported server keys"
        );
        Ok(count)
    }

    /// Fetches `{base_url}/_matrix/key/v2/server` and imports the result.
    pub async fn fetch_server_keys(
        &self,
        client: &reqwest::Client,
        server_name: &str,
        base_url: &str,
    ) -> Result<usize, IdentityError> {
        let url = format!("{}/_matrix/key/v2/server", base_url.trim_end_matches('/'));
        tracing::debug!(%url, server_name, "fetching server keys");
        let document: Value = client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        self.import_server_keys(&document, Some(server_name))
    }
}
