// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authentication errors.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Classified authentication failure.
///
/// The `Display` text carries diagnostic detail (key IDs, expected vs actual
/// claim values) and is meant for logs. HTTP clients only ever see
/// [`AuthError::public_message`] and [`AuthError::error_code`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// No `Authorization: Bearer <token>` credentials were presented.
    #[error("bearer credentials are missing or malformed")]
    MissingCredentials,

    #[error("token is malformed: {0}")]
    MalformedToken(String),

    /// The token's `kid` is not in the authority's key set, even after a refresh.
    #[error("no signing key found for kid '{0}'")]
    UnknownSigningKey(String),

    #[error("token signature is invalid: {0}")]
    InvalidSignature(String),

    #[error("token has expired")]
    TokenExpired,

    #[error("token is not yet valid")]
    TokenNotYetValid,

    #[error("token audience mismatch: expected '{expected}', got {actual:?}")]
    InvalidAudience {
        expected: String,
        actual: Option<String>,
    },

    #[error("token issuer mismatch: expected one of {expected:?}, got {actual:?}")]
    InvalidIssuer {
        expected: Vec<String>,
        actual: Option<String>,
    },

    /// The identity authority could not be reached.
    #[error("identity authority unavailable: {0}")]
    DependencyUnavailable(String),

    /// The verifier itself failed, as opposed to the token being bad.
    #[error("internal verification error: {0}")]
    InternalVerificationError(String),
}

#[derive(Serialize)]
struct AuthErrorBody {
    error: &'static str,
    error_code: &'static str,
}

impl AuthError {
    /// Stable machine-readable code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::MissingCredentials => "missing_credentials",
            AuthError::MalformedToken(_) => "malformed_token",
            AuthError::UnknownSigningKey(_) => "unknown_signing_key",
            AuthError::InvalidSignature(_) => "invalid_signature",
            AuthError::TokenExpired => "token_expired",
            AuthError::TokenNotYetValid => "token_not_yet_valid",
            AuthError::InvalidAudience { .. } => "invalid_audience",
            AuthError::InvalidIssuer { .. } => "invalid_issuer",
            AuthError::DependencyUnavailable(_) => "dependency_unavailable",
            AuthError::InternalVerificationError(_) => "internal_verification_error",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::MissingCredentials
            | AuthError::MalformedToken(_)
            | AuthError::UnknownSigningKey(_)
            | AuthError::InvalidSignature(_)
            | AuthError::TokenExpired
            | AuthError::TokenNotYetValid
            | AuthError::InvalidAudience { .. }
            | AuthError::InvalidIssuer { .. } => StatusCode::UNAUTHORIZED,
            AuthError::DependencyUnavailable(_) | AuthError::InternalVerificationError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message safe to return to the caller. Never includes token or key content.
    pub fn public_message(&self) -> &'static str {
        match self {
            AuthError::MissingCredentials => {
                "Authorization header is required (expected 'Bearer <token>')"
            }
            AuthError::MalformedToken(_) => "Token is malformed",
            AuthError::UnknownSigningKey(_) => "Token was signed by an unknown key",
            AuthError::InvalidSignature(_) => "Token signature is invalid",
            AuthError::TokenExpired => "Token has expired",
            AuthError::TokenNotYetValid => "Token is not yet valid",
            AuthError::InvalidAudience { .. } => "Token audience is invalid",
            AuthError::InvalidIssuer { .. } => "Token issuer is invalid",
            AuthError::DependencyUnavailable(_) => {
                "Failed to validate token - identity provider unavailable"
            }
            AuthError::InternalVerificationError(_) => "Internal authentication error",
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(AuthErrorBody {
            error: self.public_message(),
            error_code: self.error_code(),
        });
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn missing_credentials_returns_401() {
        let response = AuthError::MissingCredentials.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(response).await;
        assert_eq!(body["error_code"], "missing_credentials");
    }

    #[test]
    fn token_failures_map_to_401() {
        let errors = [
            AuthError::MalformedToken("x".into()),
            AuthError::UnknownSigningKey("kid".into()),
            AuthError::InvalidSignature("x".into()),
            AuthError::TokenExpired,
            AuthError::TokenNotYetValid,
            AuthError::InvalidAudience {
                expected: "a".into(),
                actual: None,
            },
            AuthError::InvalidIssuer {
                expected: vec![],
                actual: None,
            },
        ];
        for err in errors {
            assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED, "{err}");
        }
    }

    #[test]
    fn verifier_faults_map_to_500() {
        assert_eq!(
            AuthError::DependencyUnavailable("timeout".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            AuthError::InternalVerificationError("boom".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn response_body_hides_diagnostic_detail() {
        let err = AuthError::InvalidAudience {
            expected: "client1".into(),
            actual: Some("other-client".into()),
        };
        assert!(err.to_string().contains("other-client"));

        let body = body_json(err.into_response()).await;
        assert_eq!(body["error_code"], "invalid_audience");
        assert!(!body.to_string().contains("other-client"));
        assert!(!body.to_string().contains("client1"));
    }
}
