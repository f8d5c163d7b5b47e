// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Axum extractor for authenticated users.
//!
//! Use the `Auth` extractor in handlers to require authentication:
//!
//! ```rust,ignore
//! async fn my_handler(Auth(identity): Auth) -> impl IntoResponse {
//!     // identity is Identity
//! }
//! ```

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};

use super::{AuthError, Identity};
use crate::state::AppState;

/// Extractor for authenticated users.
///
/// If the auth middleware already ran for this request, its [`Identity`] is
/// reused. Otherwise the `Authorization` header is run through the
/// [`AuthGate`](super::AuthGate) here.
pub struct Auth(pub Identity);

impl FromRequestParts<AppState> for Auth {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if let Some(identity) = parts.extensions.get::<Identity>().cloned() {
            return Ok(Auth(identity));
        }

        // A header that is not valid visible ASCII cannot hold a bearer token.
        let header = match parts.headers.get(AUTHORIZATION) {
            Some(value) => Some(value.to_str().map_err(|_| AuthError::MissingCredentials)?),
            None => None,
        };

        let identity = state.gate.authenticate(header).await?;
        Ok(Auth(identity))
    }
}
