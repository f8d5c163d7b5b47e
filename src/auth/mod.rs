// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authentication Module
//!
//! Bearer-token verification for Microsoft Entra ID (Azure AD).
//!
//! ## Auth Flow
//!
//! 1. The client signs in with Entra ID and receives an access token
//! 2. The client sends `Authorization: Bearer <token>`
//! 3. The server:
//!    - Resolves the token's `kid` against the tenant's published signing
//!      keys, refetching once when the key is not cached
//!    - Verifies signature, expiry, audience and issuer
//!    - Projects the claims into an [`Identity`]:
//!      - `oid` (or `sub`) → `id`
//!      - `tid` → `tenant_id`
//!      - `roles` / `groups` as sets
//!
//! ## Security
//!
//! - All non-health endpoints require authentication
//! - Both the v2.0 (`login.microsoftonline.com/{tenant}/v2.0`) and v1.0
//!   (`sts.windows.net/{tenant}/`) issuers are accepted
//! - Error responses carry a stable code and never echo token or key content
//! - `SKIP_TOKEN_VERIFICATION=true` disables every check and logs a warning
//!   on each request; local development only

pub mod claims;
pub mod error;
pub mod extractor;
pub mod gate;
pub mod keystore;
pub mod middleware;
pub mod verifier;

pub use claims::{project, Identity, RawClaims, Verification, VerifiedClaims};
pub use error::AuthError;
pub use extractor::Auth;
pub use gate::{bearer_token, AuthGate};
pub use keystore::{KeySet, KeyStore, KeyStoreError, SigningKey};
pub use middleware::require_auth;
pub use verifier::{TokenVerifier, VerifierPolicy};
