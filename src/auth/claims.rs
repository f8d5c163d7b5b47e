// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! JWT claims and the authenticated identity projected from them.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

/// Sentinel for identifiers the token did not carry.
pub const UNKNOWN: &str = "unknown";

/// `aud` may be a single string or a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    Single(String),
    Many(Vec<String>),
}

impl Audience {
    pub fn contains(&self, expected: &str) -> bool {
        match self {
            Audience::Single(aud) => aud == expected,
            Audience::Many(auds) => auds.iter().any(|aud| aud == expected),
        }
    }

    /// Rendering used in error details.
    pub fn describe(&self) -> String {
        match self {
            Audience::Single(aud) => aud.clone(),
            Audience::Many(auds) => auds.join(","),
        }
    }
}

/// Claims decoded from an Entra ID token body.
///
/// Every claim is optional here; which ones must be present is decided by the
/// verifier, and missing identity fields are defaulted by [`project`].
/// Claims without a named field are kept in `extra`, so a decoded value is
/// equal to the token body.
///
/// Timestamps accept fractional NumericDates (truncated). Ill-typed
/// `roles`/`groups` and timestamps decode as absent instead of failing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawClaims {
    /// Object ID of the user in the tenant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,
    /// Display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Tenant ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tid: Option<String>,
    /// App roles assigned to the user
    #[serde(
        default,
        deserialize_with = "lenient_string_list",
        skip_serializing_if = "Option::is_none"
    )]
    pub roles: Option<Vec<String>>,
    #[serde(
        default,
        deserialize_with = "lenient_string_list",
        skip_serializing_if = "Option::is_none"
    )]
    pub groups: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<Audience>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_numeric_date",
        skip_serializing_if = "Option::is_none"
    )]
    pub iat: Option<i64>,
    #[serde(
        default,
        deserialize_with = "lenient_numeric_date",
        skip_serializing_if = "Option::is_none"
    )]
    pub nbf: Option<i64>,
    #[serde(
        default,
        deserialize_with = "lenient_numeric_date",
        skip_serializing_if = "Option::is_none"
    )]
    pub exp: Option<i64>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

fn lenient_numeric_date<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => None,
        Some(Value::Number(n)) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite())
                .map(|f| f.trunc() as i64)
        }),
        Some(other) => {
            tracing::debug!(value = %other, "Ignoring non-numeric date claim");
            None
        }
    })
}

fn lenient_string_list<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => None,
        Some(Value::Array(items)) => Some(
            items
                .into_iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s),
                    other => {
                        tracing::debug!(value = %other, "Ignoring non-string list entry");
                        None
                    }
                })
                .collect(),
        ),
        Some(other) => {
            tracing::debug!(value = %other, "Ignoring list claim that is not a list");
            None
        }
    })
}

/// How much of a token was checked before its claims were trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    /// Signature, expiry, audience and issuer were verified.
    Signature,
    /// Decoded without verification because trusted-dev mode is on.
    Unverified,
}

/// Claims paired with the verification they passed.
///
/// Only the verifier constructs these, and [`project`] is the only public
/// way to an [`Identity`], so an identity always records how its claims
/// were checked.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedClaims {
    claims: RawClaims,
    verification: Verification,
}

impl VerifiedClaims {
    pub(crate) fn new(claims: RawClaims, verification: Verification) -> Self {
        Self {
            claims,
            verification,
        }
    }

    pub fn claims(&self) -> &RawClaims {
        &self.claims
    }

    pub fn verification(&self) -> Verification {
        self.verification
    }

    pub fn into_claims(self) -> RawClaims {
        self.claims
    }
}

/// Authenticated user information extracted from a token.
///
/// This is the primary type used throughout the application to represent
/// the caller of a protected endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    /// Object ID (`oid` claim, falling back to `sub`)
    pub id: String,
    /// Email address (`email`, falling back to `preferred_username`)
    pub email: String,
    /// Display name
    pub name: String,
    pub preferred_username: String,
    /// Tenant ID (`tid` claim)
    pub tenant_id: String,
    /// App roles
    #[schema(value_type = Vec<String>)]
    pub roles: BTreeSet<String>,
    /// Group memberships
    #[schema(value_type = Vec<String>)]
    pub groups: BTreeSet<String>,
    /// Token issued-at time. Unix epoch when the token did not say.
    pub issued_at: DateTime<Utc>,
    /// Token expiry time. Unix epoch when the token did not say.
    pub expires_at: DateTime<Utc>,
    #[serde(skip)]
    verification: Verification,
}

impl Identity {
    /// Shape claims into an identity. Never fails.
    pub(crate) fn from_claims(claims: RawClaims, verification: Verification) -> Self {
        let RawClaims {
            oid,
            sub,
            email,
            preferred_username,
            name,
            tid,
            roles,
            groups,
            iat,
            exp,
            ..
        } = claims;

        Self {
            id: oid.or(sub).unwrap_or_else(|| UNKNOWN.to_string()),
            email: email
                .or_else(|| preferred_username.clone())
                .unwrap_or_default(),
            name: name.unwrap_or_default(),
            preferred_username: preferred_username.unwrap_or_default(),
            tenant_id: tid.unwrap_or_else(|| UNKNOWN.to_string()),
            roles: roles.unwrap_or_default().into_iter().collect(),
            groups: groups.unwrap_or_default().into_iter().collect(),
            issued_at: timestamp(iat),
            expires_at: timestamp(exp),
            verification,
        }
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    pub fn verification(&self) -> Verification {
        self.verification
    }

    /// Whether the token's signature was actually checked.
    pub fn is_verified(&self) -> bool {
        self.verification == Verification::Signature
    }
}

/// Project verified claims into an [`Identity`].
pub fn project(verified: VerifiedClaims) -> Identity {
    Identity::from_claims(verified.claims, verified.verification)
}

fn timestamp(secs: Option<i64>) -> DateTime<Utc> {
    secs.and_then(|s| DateTime::from_timestamp(s, 0))
        .unwrap_or_default()
}
