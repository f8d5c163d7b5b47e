// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Signing-key set fetching and caching.
//!
//! ## Behaviour
//!
//! - The key set is fetched lazily, on the first lookup that misses
//! - A miss triggers exactly one fetch; the fetched set replaces the cache
//!   wholesale and the lookup is retried once against it
//! - There is no TTL and no negative caching: an unknown `kid` costs one
//!   fetch every time it is asked for
//! - The cached set lives behind an `Arc` that is swapped under a write lock
//!   held only for the assignment, never across the network call
//! - A key that cannot be converted is logged and skipped; the rest of the
//!   set is still installed

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::{Algorithm, DecodingKey};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::instrument;

/// Key store errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyStoreError {
    #[error("no signing key with kid '{0}'")]
    NotFound(String),

    /// Network failure, timeout, non-success status or unusable payload.
    #[error("signing key set unavailable: {0}")]
    KeySetUnavailable(String),

    /// One entry of the key set could not be converted. Scoped to that key.
    #[error("signing key '{kid}' is invalid: {reason}")]
    KeyMaterialInvalid { kid: String, reason: String },
}

/// JSON Web Key as published by the authority.
///
/// Only the fields needed to build a verification key are read.
#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    #[serde(default)]
    pub kty: String,
    #[serde(default)]
    pub kid: Option<String>,
    #[serde(default)]
    pub alg: Option<String>,
    #[serde(default, rename = "use")]
    pub key_use: Option<String>,
    /// RSA modulus (base64url).
    #[serde(default)]
    pub n: Option<String>,
    /// RSA exponent (base64url).
    #[serde(default)]
    pub e: Option<String>,
    #[serde(default)]
    pub crv: Option<String>,
    #[serde(default)]
    pub x: Option<String>,
    #[serde(default)]
    pub y: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JwksDocument {
    keys: Vec<serde_json::Value>,
}

/// Public key family, used to reject header algorithms the key cannot serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFamily {
    Rsa,
    EllipticCurve,
}

impl KeyFamily {
    pub fn supports(self, algorithm: Algorithm) -> bool {
        match self {
            KeyFamily::Rsa => matches!(
                algorithm,
                Algorithm::RS256
                    | Algorithm::RS384
                    | Algorithm::RS512
                    | Algorithm::PS256
                    | Algorithm::PS384
                    | Algorithm::PS512
            ),
            KeyFamily::EllipticCurve => {
                matches!(algorithm, Algorithm::ES256 | Algorithm::ES384)
            }
        }
    }
}

/// A usable verification key.
#[derive(Clone)]
pub struct SigningKey {
    pub kid: String,
    pub algorithm: Algorithm,
    pub family: KeyFamily,
    pub key: DecodingKey,
}

// Key material stays out of logs.
impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .field("family", &self.family)
            .finish_non_exhaustive()
    }
}

impl SigningKey {
    /// Build an RSA key directly from base64url modulus and exponent.
    pub fn rsa(kid: impl Into<String>, n: &str, e: &str) -> Result<Self, KeyStoreError> {
        let kid = kid.into();
        let key = DecodingKey::from_rsa_components(n, e).map_err(|err| {
            KeyStoreError::KeyMaterialInvalid {
                kid: kid.clone(),
                reason: format!("bad RSA components: {err}"),
            }
        })?;
        Ok(Self {
            kid,
            algorithm: Algorithm::RS256,
            family: KeyFamily::Rsa,
            key,
        })
    }

    /// Convert a published JWK into a verification key.
    pub fn from_jwk(kid: &str, jwk: &Jwk) -> Result<Self, KeyStoreError> {
        let invalid = |reason: String| KeyStoreError::KeyMaterialInvalid {
            kid: kid.to_string(),
            reason,
        };

        if let Some(key_use) = jwk.key_use.as_deref() {
            if key_use != "sig" {
                return Err(invalid(format!("key use '{key_use}' is not 'sig'")));
            }
        }

        let declared = jwk
            .alg
            .as_deref()
            .map(|a| Algorithm::from_str(a).map_err(|_| invalid(format!("unknown alg '{a}'"))))
            .transpose()?;

        let (family, default_alg, key) = match jwk.kty.as_str() {
            "RSA" => {
                let n = non_empty(&jwk.n).ok_or_else(|| invalid("missing modulus 'n'".into()))?;
                let e = non_empty(&jwk.e).ok_or_else(|| invalid("missing exponent 'e'".into()))?;
                let key = DecodingKey::from_rsa_components(n, e)
                    .map_err(|err| invalid(format!("bad RSA components: {err}")))?;
                (KeyFamily::Rsa, Algorithm::RS256, key)
            }
            "EC" => {
                let alg = match jwk.crv.as_deref() {
                    Some("P-256") => Algorithm::ES256,
                    Some("P-384") => Algorithm::ES384,
                    other => return Err(invalid(format!("unsupported curve {other:?}"))),
                };
                let x = non_empty(&jwk.x).ok_or_else(|| invalid("missing 'x'".into()))?;
                let y = non_empty(&jwk.y).ok_or_else(|| invalid("missing 'y'".into()))?;
                let key = DecodingKey::from_ec_components(x, y)
                    .map_err(|err| invalid(format!("bad EC components: {err}")))?;
                (KeyFamily::EllipticCurve, alg, key)
            }
            other => return Err(invalid(format!("unsupported key type '{other}'"))),
        };

        let algorithm = declared.unwrap_or(default_alg);
        if !family.supports(algorithm) {
            return Err(invalid(format!(
                "alg {algorithm:?} does not match key type '{}'",
                jwk.kty
            )));
        }

        Ok(Self {
            kid: kid.to_string(),
            algorithm,
            family,
            key,
        })
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// Immutable snapshot of the authority's keys, indexed by `kid`.
#[derive(Debug, Default)]
pub struct KeySet {
    keys: HashMap<String, SigningKey>,
}

impl KeySet {
    pub fn from_keys(keys: impl IntoIterator<Item = SigningKey>) -> Self {
        Self {
            keys: keys.into_iter().map(|k| (k.kid.clone(), k)).collect(),
        }
    }

    /// Parse a `{"keys": [...]}` document.
    ///
    /// Entries without a `kid` are skipped, entries that fail conversion are
    /// logged and skipped. The document as a whole must be valid JSON with a
    /// `keys` array.
    pub fn parse(body: &[u8]) -> Result<Self, KeyStoreError> {
        let document: JwksDocument = serde_json::from_slice(body).map_err(|e| {
            KeyStoreError::KeySetUnavailable(format!("malformed key set document: {e}"))
        })?;

        let mut keys = HashMap::with_capacity(document.keys.len());
        for (index, entry) in document.keys.into_iter().enumerate() {
            let jwk: Jwk = match serde_json::from_value(entry) {
                Ok(jwk) => jwk,
                Err(e) => {
                    tracing::warn!(index, error = %e, "Skipping unreadable key set entry");
                    continue;
                }
            };

            let Some(kid) = non_empty(&jwk.kid) else {
                tracing::debug!(index, kty = %jwk.kty, "Skipping key without kid");
                continue;
            };

            match SigningKey::from_jwk(kid, &jwk) {
                Ok(key) => {
                    keys.insert(key.kid.clone(), key);
                }
                Err(e) => tracing::warn!(index, error = %e, "Skipping invalid signing key"),
            }
        }

        Ok(Self { keys })
    }

    pub fn get(&self, kid: &str) -> Option<&SigningKey> {
        self.keys.get(kid)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn kids(&self) -> impl Iterator<Item = &str> {
        self.keys.keys().map(String::as_str)
    }
}

/// Fetches and caches the authority's signing keys.
///
/// Shared between requests as `Arc<KeyStore>`.
pub struct KeyStore {
    jwks_url: String,
    client: reqwest::Client,
    timeout: Duration,
    cache: RwLock<Arc<KeySet>>,
}

impl KeyStore {
    /// Create an empty key store for the given key-set endpoint.
    ///
    /// `timeout` bounds every fetch; an expired timeout is reported as
    /// [`KeyStoreError::KeySetUnavailable`].
    pub fn new(jwks_url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Failed to build HTTP client, using defaults");
                reqwest::Client::new()
            });
        Self::with_client(jwks_url, client, timeout)
    }

    /// The fetch deadline is enforced here as well, so a client built
    /// without its own timeout still cannot stall a refresh.
    fn with_client(
        jwks_url: impl Into<String>,
        client: reqwest::Client,
        timeout: Duration,
    ) -> Self {
        Self {
            jwks_url: jwks_url.into(),
            client,
            timeout,
            cache: RwLock::new(Arc::new(KeySet::default())),
        }
    }

    /// Create a key store already holding `keys`.
    ///
    /// Misses still fall through to `jwks_url`.
    pub fn preloaded(
        jwks_url: impl Into<String>,
        timeout: Duration,
        keys: impl IntoIterator<Item = SigningKey>,
    ) -> Self {
        let store = Self::new(jwks_url, timeout);
        Self {
            cache: RwLock::new(Arc::new(KeySet::from_keys(keys))),
            ..store
        }
    }

    pub fn jwks_url(&self) -> &str {
        &self.jwks_url
    }

    /// Number of keys currently cached.
    pub async fn cached_key_count(&self) -> usize {
        self.snapshot().await.len()
    }

    /// Resolve a key identifier, fetching the key set once on a miss.
    ///
    /// # Errors
    ///
    /// - [`KeyStoreError::NotFound`] if `kid` is absent after the refresh
    /// - [`KeyStoreError::KeySetUnavailable`] if the refresh fails
    #[instrument(skip(self))]
    pub async fn resolve(&self, kid: &str) -> Result<SigningKey, KeyStoreError> {
        if let Some(key) = self.snapshot().await.get(kid) {
            tracing::debug!("Signing key cache hit");
            return Ok(key.clone());
        }

        tracing::info!("Signing key not cached, refreshing key set");
        let refreshed = self.refresh_set().await?;

        refreshed.get(kid).cloned().ok_or_else(|| {
            tracing::warn!(
                known_kids = ?refreshed.kids().collect::<Vec<_>>(),
                "Signing key not found after refresh"
            );
            KeyStoreError::NotFound(kid.to_string())
        })
    }

    /// Fetch the key set and replace the cache. Returns the number of keys installed.
    pub async fn refresh(&self) -> Result<usize, KeyStoreError> {
        Ok(self.refresh_set().await?.len())
    }

    async fn snapshot(&self) -> Arc<KeySet> {
        self.cache.read().await.clone()
    }

    async fn refresh_set(&self) -> Result<Arc<KeySet>, KeyStoreError> {
        let set = Arc::new(self.fetch().await?);
        *self.cache.write().await = Arc::clone(&set);
        tracing::info!(key_count = set.len(), "Signing key set refreshed");
        Ok(set)
    }

    #[instrument(skip(self), fields(url = %self.jwks_url))]
    async fn fetch(&self) -> Result<KeySet, KeyStoreError> {
        let body = tokio::time::timeout(self.timeout, self.download())
            .await
            .map_err(|_| {
                tracing::error!(
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Signing key fetch timed out"
                );
                KeyStoreError::KeySetUnavailable("request timed out".to_string())
            })??;

        let set = KeySet::parse(&body)?;
        if set.is_empty() {
            tracing::error!("Signing key set contained no usable keys");
            return Err(KeyStoreError::KeySetUnavailable(
                "no usable signing keys in key set".to_string(),
            ));
        }

        Ok(set)
    }

    async fn download(&self) -> Result<Vec<u8>, KeyStoreError> {
        let response = self.client.get(&self.jwks_url).send().await.map_err(|e| {
            let reason = if e.is_timeout() {
                "request timed out".to_string()
            } else {
                e.to_string()
            };
            tracing::error!(error = %reason, "Failed to fetch signing key set");
            KeyStoreError::KeySetUnavailable(reason)
        })?;

        let status = response.status();
        if !status.is_success() {
            tracing::error!(%status, "Signing key endpoint returned error");
            return Err(KeyStoreError::KeySetUnavailable(format!(
                "HTTP {status} from key set endpoint"
            )));
        }

        let body = response.bytes().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to read signing key set body");
            KeyStoreError::KeySetUnavailable(e.to_string())
        })?;

        Ok(body.to_vec())
    }
}
