// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use utoipa::ToSchema;

use crate::config::VerificationMode;
use crate::state::AppState;

pub const SERVICE_NAME: &str = env!("CARGO_PKG_NAME");
pub const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Liveness response.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Always "healthy" while the process is serving requests.
    pub status: String,
    pub service: String,
    pub version: String,
    /// Deployment environment name (`ENVIRONMENT`).
    pub environment: String,
}

/// Readiness response with individual component status.
#[derive(Debug, Serialize, ToSchema)]
pub struct ReadyResponse {
    /// Overall status ("ok" or "degraded").
    pub status: String,
    pub checks: ReadyChecks,
}

/// Individual readiness check results.
#[derive(Debug, Serialize, ToSchema)]
pub struct ReadyChecks {
    /// Whether the service process is running.
    pub service: String,
    /// Signing-key status: "ok", "unavailable", or "skipped" when token
    /// verification is disabled.
    pub jwks: String,
}

/// Check that signing keys are cached or can be fetched now.
async fn check_jwks(state: &AppState) -> String {
    if state.gate.mode() == VerificationMode::TrustedDev {
        return "skipped".to_string();
    }

    let keys = state.gate.key_store();
    if keys.cached_key_count().await > 0 {
        return "ok".to_string();
    }

    match keys.refresh().await {
        Ok(_) => "ok".to_string(),
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check could not load signing keys");
            "unavailable".to_string()
        }
    }
}

/// Liveness probe handler.
///
/// Always returns 200 while the process is running. Does not touch
/// dependencies; use readiness for that.
#[utoipa::path(
    get,
    path = "/api/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service is alive", body = HealthResponse)
    )
)]
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: SERVICE_NAME.to_string(),
        version: SERVICE_VERSION.to_string(),
        environment: state.settings.environment.clone(),
    })
}

/// Readiness probe handler.
///
/// Returns 200 only when tokens can be verified, 503 otherwise.
#[utoipa::path(
    get,
    path = "/api/health/ready",
    tag = "Health",
    responses(
        (status = 200, description = "Service is ready", body = ReadyResponse),
        (status = 503, description = "Signing keys are unavailable", body = ReadyResponse)
    )
)]
pub async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    let jwks = check_jwks(&state).await;
    let ready = jwks != "unavailable";

    let response = ReadyResponse {
        status: if ready { "ok" } else { "degraded" }.to_string(),
        checks: ReadyChecks {
            service: "ok".to_string(),
            jwks,
        },
    };

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(response))
}
