// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Shared fixtures: an RSA signing key, a mock key-set endpoint, and
//! settings pointing at it.

#![allow(dead_code)]

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use entra_gateway::auth::{KeyStore, SigningKey, TokenVerifier, VerifierPolicy};
use entra_gateway::config::{Settings, VerificationMode};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::{json, Value};
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

pub const TENANT: &str = "tenant1";
pub const CLIENT: &str = "client1";
pub const KID: &str = "test-key-1";
pub const JWKS_PATH: &str = "/tenant1/discovery/v2.0/keys";

pub fn issuer_v2() -> String {
    format!("https://login.microsoftonline.com/{TENANT}/v2.0")
}

pub fn issuer_v1() -> String {
    format!("https://sts.windows.net/{TENANT}/")
}

struct TestKey {
    encoding: EncodingKey,
    n: String,
    e: String,
}

/// 2048-bit keys are slow to generate, so one is shared per test binary.
fn test_key() -> &'static TestKey {
    static KEY: OnceLock<TestKey> = OnceLock::new();
    KEY.get_or_init(|| {
        use rsa::pkcs8::{EncodePrivateKey, LineEnding};
        use rsa::traits::PublicKeyParts;
        use rsa::RsaPrivateKey;

        let private_key =
            RsaPrivateKey::new(&mut rand::thread_rng(), 2048).expect("Failed to generate RSA key");
        let pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .expect("Failed to encode private key");

        TestKey {
            encoding: EncodingKey::from_rsa_pem(pem.as_bytes()).expect("Invalid RSA key"),
            n: URL_SAFE_NO_PAD.encode(private_key.n().to_bytes_be()),
            e: URL_SAFE_NO_PAD.encode(private_key.e().to_bytes_be()),
        }
    })
}

/// Public half of the test key as an Entra-style JWK.
pub fn jwk(kid: &str) -> Value {
    let key = test_key();
    json!({
        "kty": "RSA",
        "use": "sig",
        "kid": kid,
        "x5t": kid,
        "n": key.n,
        "e": key.e,
        "x5c": ["MIIC..."],
        "issuer": issuer_v2(),
    })
}

/// Public half of the test key, ready to preload into a [`KeyStore`].
pub fn signing_key(kid: &str) -> SigningKey {
    let key = test_key();
    SigningKey::rsa(kid, &key.n, &key.e).expect("test key components are valid")
}

/// Sign `claims` with the test key under `kid`.
pub fn sign(kid: &str, claims: &Value) -> String {
    sign_with(Algorithm::RS256, kid, claims)
}

/// Sign with any RSA algorithm (RS*/PS*).
pub fn sign_with(algorithm: Algorithm, kid: &str, claims: &Value) -> String {
    let mut header = Header::new(algorithm);
    header.typ = Some("JWT".to_string());
    header.kid = Some(kid.to_string());
    encode(&header, claims, &test_key().encoding).expect("Failed to encode test JWT")
}

/// Claims of a valid v2.0 access token for user `u1`.
pub fn valid_claims() -> Value {
    let now = Utc::now().timestamp();
    json!({
        "aud": CLIENT,
        "iss": issuer_v2(),
        "iat": now,
        "nbf": now,
        "exp": now + 3600,
        "oid": "u1",
        "sub": "subject-u1",
        "email": "a@b.com",
        "name": "Alice Example",
        "preferred_username": "alice@b.com",
        "tid": TENANT,
        "roles": ["Chat.User"],
        "ver": "2.0",
    })
}

pub fn with(mut claims: Value, key: &str, value: Value) -> Value {
    claims[key] = value;
    claims
}

pub fn bearer(token: &str) -> String {
    format!("Bearer {token}")
}

/// Serve the test key under each of `kids`. The mock panics on drop unless
/// it was hit exactly `expected` times.
pub async fn mount_keys(server: &MockServer, kids: &[&str], expected: u64) {
    let keys: Vec<Value> = kids.iter().map(|kid| jwk(kid)).collect();
    Mock::given(method("GET"))
        .and(path(JWKS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "keys": keys })))
        .expect(expected)
        .mount(server)
        .await;
}

pub async fn mount_response(server: &MockServer, response: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path(JWKS_PATH))
        .respond_with(response)
        .mount(server)
        .await;
}

/// Settings whose key-set URL points at `server`.
pub fn settings(server: &MockServer, extra: &[(&str, &str)]) -> Settings {
    let template = format!("{}/{{tenant}}/discovery/v2.0/keys", server.uri());
    Settings::from_lookup(|name| {
        let value = match name {
            "AZURE_TENANT_ID" => TENANT.to_string(),
            "AZURE_CLIENT_ID" => CLIENT.to_string(),
            "JWKS_URL_TEMPLATE" => template.clone(),
            "ENVIRONMENT" => "test".to_string(),
            other => extra
                .iter()
                .find(|(k, _)| *k == other)
                .map(|(_, v)| v.to_string())?,
        };
        Some(value)
    })
    .expect("test settings are valid")
}

/// Full-mode verifier against `server` with the given fetch timeout.
pub fn verifier(server: &MockServer, timeout: Duration) -> TokenVerifier {
    let settings = settings(server, &[]);
    verifier_with(&settings, KeyStore::new(settings.jwks_url(), timeout))
}

/// Full-mode verifier whose cache already holds `kids`.
pub fn preloaded_verifier(server: &MockServer, kids: &[&str]) -> TokenVerifier {
    verifier_over(server, &[], kids.iter().map(|kid| signing_key(kid)))
}

/// Full-mode verifier with extra settings and a pre-seeded cache.
pub fn verifier_over(
    server: &MockServer,
    extra: &[(&str, &str)],
    keys: impl IntoIterator<Item = SigningKey>,
) -> TokenVerifier {
    let settings = settings(server, extra);
    let store = KeyStore::preloaded(settings.jwks_url(), Duration::from_secs(5), keys);
    verifier_with(&settings, store)
}

fn verifier_with(settings: &Settings, store: KeyStore) -> TokenVerifier {
    let keys = Arc::new(store);
    TokenVerifier::new(
        VerificationMode::Full,
        VerifierPolicy::from_settings(settings),
        keys,
    )
}
