// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Per-request authentication entry point.

use std::sync::Arc;

use tracing::instrument;

use super::claims::{project, Identity};
use super::error::AuthError;
use super::keystore::KeyStore;
use super::verifier::{TokenVerifier, VerifierPolicy};
use crate::config::{Settings, VerificationMode};

/// Turns an `Authorization` header value into an [`Identity`].
///
/// Holds no per-call state; the key store cache is the only state shared
/// between calls.
pub struct AuthGate {
    verifier: TokenVerifier,
}

impl AuthGate {
    pub fn new(verifier: TokenVerifier) -> Self {
        Self { verifier }
    }

    /// Build the gate and its key store from application settings.
    pub fn from_settings(settings: &Settings) -> Self {
        let keys = Arc::new(KeyStore::new(settings.jwks_url(), settings.jwks_timeout));
        Self::new(TokenVerifier::new(
            settings.verification_mode,
            VerifierPolicy::from_settings(settings),
            keys,
        ))
    }

    pub fn mode(&self) -> VerificationMode {
        self.verifier.mode()
    }

    pub fn key_store(&self) -> &Arc<KeyStore> {
        self.verifier.key_store()
    }

    /// Authenticate a request from its raw `Authorization` header value.
    ///
    /// # Errors
    ///
    /// [`AuthError::MissingCredentials`] when no bearer token is present,
    /// otherwise whatever the verifier reports.
    #[instrument(skip_all)]
    pub async fn authenticate(&self, authorization: Option<&str>) -> Result<Identity, AuthError> {
        let outcome = match bearer_token(authorization) {
            Some(token) => self.verifier.verify(token).await.map(project),
            None => Err(AuthError::MissingCredentials),
        };

        match &outcome {
            Ok(identity) => tracing::info!(
                user_id = %identity.id,
                tenant_id = %identity.tenant_id,
                verified = identity.is_verified(),
                "User authenticated"
            ),
            Err(err) if err.status_code().is_server_error() => tracing::error!(
                error_code = err.error_code(),
                error = %err,
                "Authentication could not be completed"
            ),
            Err(err) => tracing::warn!(
                error_code = err.error_code(),
                error = %err,
                "Authentication failed"
            ),
        }

        outcome
    }
}

/// Extract the token from `Bearer <token>`. The scheme is case-insensitive.
pub fn bearer_token(authorization: Option<&str>) -> Option<&str> {
    let (scheme, token) = authorization?.trim().split_once(char::is_whitespace)?;
    let token = token.trim();
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() || token.contains(' ') {
        return None;
    }
    Some(token)
}
