// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Token verification.
//!
//! ## Modes
//!
//! - **Full** (production): signature against the tenant's published keys,
//!   expiry, not-before, audience and issuer are all enforced.
//! - **Trusted-dev** (`SKIP_TOKEN_VERIFICATION=true`): the token is only
//!   decoded. Every use logs a warning.
//!
//! ## Check order in full mode
//!
//! 1. Structure: three segments, decodable header with a `kid`
//! 2. Algorithm allow-list (`none` never parses)
//! 3. Expiry / not-before, read from the unverified body so expired tokens
//!    never cost a key-set fetch
//! 4. Key lookup; the header `alg` must equal the key's algorithm, then
//!    signature (expiry is re-checked by the decoder)
//! 5. Audience
//! 6. Issuer: v2.0 or legacy v1.0 form for the configured tenant

use std::sync::Arc;

use chrono::Utc;
use jsonwebtoken::errors::{Error as JwtError, ErrorKind};
use jsonwebtoken::{decode, decode_header, Algorithm, Validation};

use super::claims::{RawClaims, Verification, VerifiedClaims};
use super::error::AuthError;
use super::keystore::{KeyStore, KeyStoreError};
use crate::config::{Settings, VerificationMode};

/// Claim checks applied in full-verification mode.
#[derive(Debug, Clone)]
pub struct VerifierPolicy {
    /// Expected `aud` (the application's client ID).
    pub audience: String,
    /// Accepted `iss` values.
    pub issuers: Vec<String>,
    pub allowed_algorithms: Vec<Algorithm>,
    pub leeway_secs: u64,
    /// Header `alg` required in trusted-dev mode, if any.
    pub dev_token_algorithm: Option<Algorithm>,
}

impl VerifierPolicy {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            audience: settings.client_id.clone(),
            issuers: settings.accepted_issuers(),
            allowed_algorithms: settings.allowed_algorithms.clone(),
            leeway_secs: settings.leeway_secs,
            dev_token_algorithm: settings.dev_token_algorithm,
        }
    }
}

/// Verifies bearer tokens against a [`KeyStore`].
pub struct TokenVerifier {
    mode: VerificationMode,
    policy: VerifierPolicy,
    keys: Arc<KeyStore>,
}

impl TokenVerifier {
    pub fn new(mode: VerificationMode, policy: VerifierPolicy, keys: Arc<KeyStore>) -> Self {
        Self { mode, policy, keys }
    }

    pub fn mode(&self) -> VerificationMode {
        self.mode
    }

    pub fn key_store(&self) -> &Arc<KeyStore> {
        &self.keys
    }

    /// Verify a raw token and return its claims.
    ///
    /// # Errors
    ///
    /// Any [`AuthError`] except `MissingCredentials`. Key-set fetch failures
    /// come back as [`AuthError::DependencyUnavailable`].
    pub async fn verify(&self, token: &str) -> Result<VerifiedClaims, AuthError> {
        match self.mode {
            VerificationMode::Full => self.verify_full(token).await,
            VerificationMode::TrustedDev => self.decode_trusted(token),
        }
    }

    /// Decode without verifying signature or expiry.
    ///
    /// WARNING: This must only be reachable in development environments.
    fn decode_trusted(&self, token: &str) -> Result<VerifiedClaims, AuthError> {
        tracing::warn!(
            "SKIP_TOKEN_VERIFICATION is enabled - token signature and expiry are NOT being verified"
        );

        check_structure(token)?;
        let header = decode_header(token)
            .map_err(|e| AuthError::MalformedToken(format!("invalid header: {e}")))?;

        if let Some(required) = self.policy.dev_token_algorithm {
            if header.alg != required {
                return Err(AuthError::MalformedToken(format!(
                    "algorithm {:?} does not match required {required:?}",
                    header.alg
                )));
            }
        }

        let claims = decode_unverified(token)?;
        tracing::debug!(claims = ?claim_names(&claims), "Token decoded without verification");
        Ok(VerifiedClaims::new(claims, Verification::Unverified))
    }

    async fn verify_full(&self, token: &str) -> Result<VerifiedClaims, AuthError> {
        check_structure(token)?;
        let header = decode_header(token)
            .map_err(|e| AuthError::MalformedToken(format!("invalid header: {e}")))?;

        let kid = header
            .kid
            .filter(|kid| !kid.is_empty())
            .ok_or_else(|| AuthError::MalformedToken("token header has no kid".to_string()))?;

        if !self.policy.allowed_algorithms.contains(&header.alg) {
            return Err(AuthError::InvalidSignature(format!(
                "algorithm {:?} is not allowed",
                header.alg
            )));
        }

        let unverified = decode_unverified(token)?;
        self.check_time_window(&unverified)?;

        let key = self.keys.resolve(&kid).await.map_err(|e| match e {
            KeyStoreError::NotFound(kid) => AuthError::UnknownSigningKey(kid),
            KeyStoreError::KeySetUnavailable(reason) => AuthError::DependencyUnavailable(reason),
            other @ KeyStoreError::KeyMaterialInvalid { .. } => {
                AuthError::InternalVerificationError(other.to_string())
            }
        })?;

        if header.alg != key.algorithm {
            return Err(AuthError::InvalidSignature(format!(
                "algorithm {:?} does not match key '{}' ({:?})",
                header.alg, key.kid, key.algorithm
            )));
        }

        let mut validation = Validation::new(header.alg);
        validation.algorithms = vec![header.alg];
        validation.leeway = self.policy.leeway_secs;
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["exp"]);

        let claims = decode::<RawClaims>(token, &key.key, &validation)
            .map_err(classify_decode_error)?
            .claims;

        self.check_audience(&claims)?;
        self.check_issuer(&claims)?;

        tracing::debug!(kid = %key.kid, issuer = ?claims.iss, "Token verified");
        Ok(VerifiedClaims::new(claims, Verification::Signature))
    }

    fn check_time_window(&self, claims: &RawClaims) -> Result<(), AuthError> {
        let now = Utc::now().timestamp();
        let leeway = i64::try_from(self.policy.leeway_secs).unwrap_or(i64::MAX);

        let exp = claims
            .exp
            .ok_or_else(|| AuthError::MalformedToken("token has no exp claim".to_string()))?;
        if exp < now.saturating_sub(leeway) {
            return Err(AuthError::TokenExpired);
        }

        if let Some(nbf) = claims.nbf {
            if nbf > now.saturating_add(leeway) {
                return Err(AuthError::TokenNotYetValid);
            }
        }

        Ok(())
    }

    fn check_audience(&self, claims: &RawClaims) -> Result<(), AuthError> {
        match &claims.aud {
            Some(aud) if aud.contains(&self.policy.audience) => Ok(()),
            other => Err(AuthError::InvalidAudience {
                expected: self.policy.audience.clone(),
                actual: other.as_ref().map(|aud| aud.describe()),
            }),
        }
    }

    fn check_issuer(&self, claims: &RawClaims) -> Result<(), AuthError> {
        match &claims.iss {
            Some(iss) if self.policy.issuers.iter().any(|accepted| accepted == iss) => Ok(()),
            other => Err(AuthError::InvalidIssuer {
                expected: self.policy.issuers.clone(),
                actual: other.clone(),
            }),
        }
    }
}

/// Require `header.payload.signature` with non-empty header and payload.
fn check_structure(token: &str) -> Result<(), AuthError> {
    match token.split('.').collect::<Vec<_>>().as_slice() {
        [header, payload, _signature] if !header.is_empty() && !payload.is_empty() => Ok(()),
        [_, _, _] => Err(AuthError::MalformedToken(
            "empty header or payload segment".to_string(),
        )),
        segments => Err(AuthError::MalformedToken(format!(
            "expected 3 segments, found {}",
            segments.len()
        ))),
    }
}

fn decode_unverified(token: &str) -> Result<RawClaims, AuthError> {
    jsonwebtoken::dangerous::insecure_decode::<RawClaims>(token)
        .map(|data| data.claims)
        .map_err(|e| AuthError::MalformedToken(format!("undecodable token: {e}")))
}

fn claim_names(claims: &RawClaims) -> Vec<String> {
    serde_json::to_value(claims)
        .ok()
        .and_then(|v| v.as_object().map(|o| o.keys().cloned().collect()))
        .unwrap_or_default()
}

fn classify_decode_error(err: JwtError) -> AuthError {
    match err.kind() {
        ErrorKind::ExpiredSignature => AuthError::TokenExpired,
        ErrorKind::ImmatureSignature => AuthError::TokenNotYetValid,
        ErrorKind::InvalidSignature
        | ErrorKind::InvalidAlgorithm
        | ErrorKind::InvalidAlgorithmName
        | ErrorKind::MissingAlgorithm => AuthError::InvalidSignature(err.to_string()),
        ErrorKind::InvalidToken
        | ErrorKind::MissingRequiredClaim(_)
        | ErrorKind::Base64(_)
        | ErrorKind::Json(_)
        | ErrorKind::Utf8(_) => AuthError::MalformedToken(err.to_string()),
        _ => AuthError::InternalVerificationError(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
    use serde_json::json;

    fn unsigned_token(header: serde_json::Value, body: serde_json::Value) -> String {
        format!(
            "{}.{}.fake_signature",
            URL_SAFE_NO_PAD.encode(header.to_string()),
            URL_SAFE_NO_PAD.encode(body.to_string())
        )
    }

    fn policy() -> VerifierPolicy {
        VerifierPolicy {
            audience: "client1".to_string(),
            issuers: vec![
                "https://login.microsoftonline.com/tenant1/v2.0".to_string(),
                "https://sts.windows.net/tenant1/".to_string(),
            ],
            allowed_algorithms: vec![Algorithm::RS256],
            leeway_secs: 0,
            dev_token_algorithm: None,
        }
    }

    fn verifier(mode: VerificationMode, policy: VerifierPolicy) -> TokenVerifier {
        // Nothing listens on port 9; any fetch fails fast.
        let keys = Arc::new(KeyStore::new(
            "http://127.0.0.1:9/keys",
            Duration::from_millis(200),
        ));
        TokenVerifier::new(mode, policy, keys)
    }

    #[test]
    fn structure_requires_three_segments() {
        assert!(check_structure("a.b.c").is_ok());
        assert!(check_structure("a.b.").is_ok());
        assert!(matches!(check_structure("a.b"), Err(AuthError::MalformedToken(_))));
        assert!(matches!(check_structure("a.b.c.d"), Err(AuthError::MalformedToken(_))));
        assert!(matches!(check_structure(".b.c"), Err(AuthError::MalformedToken(_))));
        assert!(matches!(check_structure(""), Err(AuthError::MalformedToken(_))));
    }

    #[tokio::test]
    async fn trusted_dev_accepts_expired_unsigned_token() {
        let body = json!({"oid": "u1", "exp": 1, "aud": "someone-else", "iss": "anyone"});
        let token = unsigned_token(json!({"alg": "RS256", "typ": "JWT"}), body.clone());

        let verified = verifier(VerificationMode::TrustedDev, policy())
            .verify(&token)
            .await
            .unwrap();

        let expected: RawClaims = serde_json::from_value(body).unwrap();
        assert_eq!(verified.claims(), &expected);
        assert_eq!(verified.verification(), Verification::Unverified);
    }

    #[tokio::test]
    async fn trusted_dev_rejects_missing_segment() {
        let token = unsigned_token(json!({"alg": "RS256"}), json!({"oid": "u1"}));
        let truncated = token.rsplit_once('.').unwrap().0;
        let err = verifier(VerificationMode::TrustedDev, policy())
            .verify(truncated)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::MalformedToken(_)));
    }

    #[tokio::test]
    async fn trusted_dev_rejects_bad_encoding() {
        let err = verifier(VerificationMode::TrustedDev, policy())
            .verify("%%%.###.sig")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::MalformedToken(_)));
    }

    #[tokio::test]
    async fn trusted_dev_accepts_any_algorithm_by_default() {
        let token = unsigned_token(json!({"alg": "HS256"}), json!({"oid": "u1"}));
        assert!(verifier(VerificationMode::TrustedDev, policy())
            .verify(&token)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn trusted_dev_can_require_an_algorithm() {
        let mut policy = policy();
        policy.dev_token_algorithm = Some(Algorithm::RS256);
        let token = unsigned_token(json!({"alg": "HS256"}), json!({"oid": "u1"}));
        let err = verifier(VerificationMode::TrustedDev, policy)
            .verify(&token)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::MalformedToken(_)));
    }

    #[tokio::test]
    async fn full_mode_requires_kid() {
        let exp = Utc::now().timestamp() + 600;
        let token = unsigned_token(json!({"alg": "RS256"}), json!({"exp": exp}));
        let err = verifier(VerificationMode::Full, policy())
            .verify(&token)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::MalformedToken(_)));
    }

    #[tokio::test]
    async fn full_mode_rejects_unlisted_algorithm_before_key_lookup() {
        let exp = Utc::now().timestamp() + 600;
        let token = unsigned_token(json!({"alg": "HS256", "kid": "abc"}), json!({"exp": exp}));
        let err = verifier(VerificationMode::Full, policy())
            .verify(&token)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidSignature(_)));
    }

    #[tokio::test]
    async fn full_mode_rejects_none_algorithm() {
        let token = unsigned_token(json!({"alg": "none", "kid": "abc"}), json!({"exp": 1}));
        let err = verifier(VerificationMode::Full, policy())
            .verify(&token)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::MalformedToken(_)));
    }

    #[tokio::test]
    async fn full_mode_reports_expiry_without_touching_the_key_set() {
        let token = unsigned_token(
            json!({"alg": "RS256", "kid": "abc"}),
            json!({"exp": Utc::now().timestamp() - 5}),
        );
        // The key store would fail with DependencyUnavailable if consulted.
        let err = verifier(VerificationMode::Full, policy())
            .verify(&token)
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::TokenExpired);
    }

    #[tokio::test]
    async fn full_mode_reports_not_yet_valid() {
        let now = Utc::now().timestamp();
        let token = unsigned_token(
            json!({"alg": "RS256", "kid": "abc"}),
            json!({"exp": now + 600, "nbf": now + 300}),
        );
        let err = verifier(VerificationMode::Full, policy())
            .verify(&token)
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::TokenNotYetValid);
    }

    #[tokio::test]
    async fn full_mode_surfaces_unreachable_authority() {
        let token = unsigned_token(
            json!({"alg": "RS256", "kid": "abc"}),
            json!({"exp": Utc::now().timestamp() + 600}),
        );
        let err = verifier(VerificationMode::Full, policy())
            .verify(&token)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::DependencyUnavailable(_)));
    }

    #[test]
    fn audience_and_issuer_checks_report_actual_values() {
        let v = verifier(VerificationMode::Full, policy());
        let claims: RawClaims = serde_json::from_value(json!({
            "aud": "other-client",
            "iss": "https://evil.example/"
        }))
        .unwrap();

        match v.check_audience(&claims) {
            Err(AuthError::InvalidAudience { expected, actual }) => {
                assert_eq!(expected, "client1");
                assert_eq!(actual.as_deref(), Some("other-client"));
            }
            other => panic!("unexpected {other:?}"),
        }
        match v.check_issuer(&claims) {
            Err(AuthError::InvalidIssuer { actual, .. }) => {
                assert_eq!(actual.as_deref(), Some("https://evil.example/"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn both_issuer_forms_are_accepted() {
        let v = verifier(VerificationMode::Full, policy());
        for iss in [
            "https://login.microsoftonline.com/tenant1/v2.0",
            "https://sts.windows.net/tenant1/",
        ] {
            let claims = RawClaims {
                iss: Some(iss.to_string()),
                ..Default::default()
            };
            assert!(v.check_issuer(&claims).is_ok(), "{iss}");
        }

        for iss in [
            "https://login.microsoftonline.com/tenant2/v2.0",
            "https://sts.windows.net/tenant1",
            "https://login.microsoftonline.com/tenant1/v2.0/",
        ] {
            let claims = RawClaims {
                iss: Some(iss.to_string()),
                ..Default::default()
            };
            assert!(v.check_issuer(&claims).is_err(), "{iss}");
        }
        assert!(v.check_issuer(&RawClaims::default()).is_err());
    }

    #[test]
    fn missing_audience_is_rejected() {
        let v = verifier(VerificationMode::Full, policy());
        assert!(matches!(
            v.check_audience(&RawClaims::default()),
            Err(AuthError::InvalidAudience { actual: None, .. })
        ));
    }
}
