// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! User endpoints.

use axum::Json;

use crate::auth::{Auth, Identity};

/// Get the current authenticated user's information.
///
/// Returns the identity projected from the caller's access token.
#[utoipa::path(
    get,
    path = "/api/user/me",
    tag = "Users",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "User information", body = Identity),
        (status = 401, description = "Unauthorized - invalid or missing token"),
        (status = 500, description = "Signing keys could not be obtained"),
    )
)]
pub async fn get_current_user(Auth(identity): Auth) -> Json<Identity> {
    Json(identity)
}
