// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authentication middleware for Axum.
//!
//! Applied as a `route_layer` to the protected router subtree. On success
//! the [`Identity`](super::Identity) is stored in the request extensions,
//! where the [`Auth`](super::Auth) extractor picks it up.
//!
//! ```rust,ignore
//! let protected = Router::new()
//!     .route("/user/me", get(handler))
//!     .route_layer(axum::middleware::from_fn_with_state(state.clone(), require_auth));
//! ```

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::AuthError;
use crate::state::AppState;

/// Reject the request unless it carries a valid bearer token.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let header = match request.headers().get(AUTHORIZATION).map(|v| v.to_str()) {
        Some(Ok(value)) => Some(value),
        Some(Err(_)) => return AuthError::MissingCredentials.into_response(),
        None => None,
    };

    match state.gate.authenticate(header).await {
        Ok(identity) => {
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
        Err(e) => e.into_response(),
    }
}
