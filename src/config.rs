// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Configuration is loaded from the environment at startup. Values are read
//! through a lookup function so tests can supply them without touching the
//! process environment.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `AZURE_TENANT_ID` | Entra ID tenant that issues tokens | Required |
//! | `AZURE_CLIENT_ID` | Expected `aud` claim (application client ID) | Required |
//! | `SKIP_TOKEN_VERIFICATION` | Trusted-dev mode: decode tokens without verifying them | `false` |
//! | `JWKS_URL_TEMPLATE` | Signing-key endpoint, `{tenant}` is substituted | Microsoft discovery v2.0 keys |
//! | `JWKS_TIMEOUT_SECS` | Timeout for the signing-key fetch | `10` |
//! | `CLOCK_SKEW_LEEWAY_SECS` | Leeway applied to `exp` / `nbf`, at most 3600 | `0` |
//! | `ALLOWED_ALGORITHMS` | Comma-separated signing algorithm allow-list | `RS256` |
//! | `DEV_TOKEN_ALGORITHM` | Header `alg` required in trusted-dev mode | Any |
//! | `ENVIRONMENT` | Environment name reported by the health endpoint | `dev` |
//! | `HOST` | Server bind IP address (IPv4 or IPv6) | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `CORS_ALLOWED_ORIGINS` | Comma-separated origin allow-list | Permissive |
//! | `TLS_CERT_PATH` / `TLS_KEY_PATH` | PEM files; both set enables HTTPS | HTTP |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use jsonwebtoken::Algorithm;
use url::Url;

pub const TENANT_ID_ENV: &str = "AZURE_TENANT_ID";
pub const CLIENT_ID_ENV: &str = "AZURE_CLIENT_ID";
pub const SKIP_VERIFICATION_ENV: &str = "SKIP_TOKEN_VERIFICATION";
pub const JWKS_URL_TEMPLATE_ENV: &str = "JWKS_URL_TEMPLATE";
pub const JWKS_TIMEOUT_ENV: &str = "JWKS_TIMEOUT_SECS";
pub const LEEWAY_ENV: &str = "CLOCK_SKEW_LEEWAY_SECS";
pub const ALLOWED_ALGORITHMS_ENV: &str = "ALLOWED_ALGORITHMS";
pub const DEV_TOKEN_ALGORITHM_ENV: &str = "DEV_TOKEN_ALGORITHM";
pub const ENVIRONMENT_ENV: &str = "ENVIRONMENT";
pub const HOST_ENV: &str = "HOST";
pub const PORT_ENV: &str = "PORT";
pub const CORS_ALLOWED_ORIGINS_ENV: &str = "CORS_ALLOWED_ORIGINS";
pub const TLS_CERT_PATH_ENV: &str = "TLS_CERT_PATH";
pub const TLS_KEY_PATH_ENV: &str = "TLS_KEY_PATH";
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

/// Placeholder replaced by the tenant ID in `JWKS_URL_TEMPLATE`.
pub const TENANT_PLACEHOLDER: &str = "{tenant}";

/// Microsoft's published signing keys for a tenant.
pub const DEFAULT_JWKS_URL_TEMPLATE: &str =
    "https://login.microsoftonline.com/{tenant}/discovery/v2.0/keys";

const DEFAULT_JWKS_TIMEOUT_SECS: u64 = 10;
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_ENVIRONMENT: &str = "dev";
/// Upper bound for `CLOCK_SKEW_LEEWAY_SECS`.
pub const MAX_LEEWAY_SECS: u64 = 3600;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is required (set it in the environment)")]
    Missing(&'static str),

    #[error("{name} has an invalid value: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// How incoming tokens are checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationMode {
    /// Signature, expiry, audience and issuer are all enforced.
    Full,
    /// Tokens are decoded without any verification. Local development only.
    TrustedDev,
}

/// Output format for the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Paths to the PEM certificate chain and private key for HTTPS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// Application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub tenant_id: String,
    pub client_id: String,
    pub verification_mode: VerificationMode,
    pub jwks_url_template: String,
    pub jwks_timeout: Duration,
    pub leeway_secs: u64,
    pub allowed_algorithms: Vec<Algorithm>,
    pub dev_token_algorithm: Option<Algorithm>,
    pub environment: String,
    pub bind_addr: SocketAddr,
    pub cors_allowed_origins: Vec<String>,
    pub tls: Option<TlsPaths>,
    pub log_format: LogFormat,
}

impl Settings {
    /// Load settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load settings through an arbitrary variable lookup.
    ///
    /// Blank values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let tenant_id = get(TENANT_ID_ENV).ok_or(ConfigError::Missing(TENANT_ID_ENV))?;
        let client_id = get(CLIENT_ID_ENV).ok_or(ConfigError::Missing(CLIENT_ID_ENV))?;

        let verification_mode = match get(SKIP_VERIFICATION_ENV) {
            Some(v) if parse_bool(SKIP_VERIFICATION_ENV, &v)? => VerificationMode::TrustedDev,
            _ => VerificationMode::Full,
        };

        let jwks_url_template =
            get(JWKS_URL_TEMPLATE_ENV).unwrap_or_else(|| DEFAULT_JWKS_URL_TEMPLATE.to_string());

        let jwks_timeout = Duration::from_secs(
            get(JWKS_TIMEOUT_ENV)
                .map(|v| parse_number(JWKS_TIMEOUT_ENV, &v))
                .transpose()?
                .unwrap_or(DEFAULT_JWKS_TIMEOUT_SECS),
        );
        if jwks_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                name: JWKS_TIMEOUT_ENV,
                reason: "must be greater than zero".to_string(),
            });
        }

        let leeway_secs = get(LEEWAY_ENV)
            .map(|v| parse_number(LEEWAY_ENV, &v))
            .transpose()?
            .unwrap_or(0);
        if leeway_secs > MAX_LEEWAY_SECS {
            return Err(ConfigError::Invalid {
                name: LEEWAY_ENV,
                reason: format!("must be at most {MAX_LEEWAY_SECS} seconds"),
            });
        }

        let allowed_algorithms = match get(ALLOWED_ALGORITHMS_ENV) {
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| parse_algorithm(ALLOWED_ALGORITHMS_ENV, s))
                .collect::<Result<Vec<_>, _>>()?,
            None => vec![Algorithm::RS256],
        };
        if allowed_algorithms.is_empty() {
            return Err(ConfigError::Invalid {
                name: ALLOWED_ALGORITHMS_ENV,
                reason: "at least one algorithm is required".to_string(),
            });
        }

        let dev_token_algorithm = get(DEV_TOKEN_ALGORITHM_ENV)
            .map(|v| parse_algorithm(DEV_TOKEN_ALGORITHM_ENV, &v))
            .transpose()?;

        let host = get(HOST_ENV).unwrap_or_else(|| DEFAULT_HOST.to_string());
        let port: u16 = get(PORT_ENV)
            .map(|v| parse_number(PORT_ENV, &v))
            .transpose()?
            .unwrap_or(DEFAULT_PORT);
        let ip: IpAddr = host.parse().map_err(|e| ConfigError::Invalid {
            name: HOST_ENV,
            reason: format!("{e}"),
        })?;
        let bind_addr = SocketAddr::new(ip, port);

        let cors_allowed_origins = get(CORS_ALLOWED_ORIGINS_ENV)
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let tls = match (get(TLS_CERT_PATH_ENV), get(TLS_KEY_PATH_ENV)) {
            (Some(cert), Some(key)) => Some(TlsPaths {
                cert: cert.into(),
                key: key.into(),
            }),
            (None, None) => None,
            (Some(_), None) => return Err(ConfigError::Missing(TLS_KEY_PATH_ENV)),
            (None, Some(_)) => return Err(ConfigError::Missing(TLS_CERT_PATH_ENV)),
        };

        let log_format = match get(LOG_FORMAT_ENV).as_deref() {
            Some("json") => LogFormat::Json,
            Some("pretty") | None => LogFormat::Pretty,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: LOG_FORMAT_ENV,
                    reason: format!("expected 'json' or 'pretty', got '{other}'"),
                })
            }
        };

        let settings = Self {
            tenant_id,
            client_id,
            verification_mode,
            jwks_url_template,
            jwks_timeout,
            leeway_secs,
            allowed_algorithms,
            dev_token_algorithm,
            environment: get(ENVIRONMENT_ENV).unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string()),
            bind_addr,
            cors_allowed_origins,
            tls,
            log_format,
        };

        // Reject an unusable key endpoint at startup rather than on the first request.
        Url::parse(&settings.jwks_url()).map_err(|e| ConfigError::Invalid {
            name: JWKS_URL_TEMPLATE_ENV,
            reason: e.to_string(),
        })?;

        Ok(settings)
    }

    /// Signing-key endpoint for the configured tenant.
    pub fn jwks_url(&self) -> String {
        self.jwks_url_template
            .replace(TENANT_PLACEHOLDER, &self.tenant_id)
    }

    /// Issuer used by tokens from the v2.0 endpoint.
    pub fn issuer_v2(&self) -> String {
        format!("https://login.microsoftonline.com/{}/v2.0", self.tenant_id)
    }

    /// Issuer used by tokens from the legacy v1.0 endpoint.
    pub fn issuer_v1(&self) -> String {
        format!("https://sts.windows.net/{}/", self.tenant_id)
    }

    /// Both issuer strings accepted for this tenant.
    pub fn accepted_issuers(&self) -> Vec<String> {
        vec![self.issuer_v2(), self.issuer_v1()]
    }
}

fn parse_bool(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            name,
            reason: format!("expected a boolean, got '{value}'"),
        }),
    }
}

fn parse_number<T>(name: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::Invalid {
        name,
        reason: e.to_string(),
    })
}

fn parse_algorithm(name: &'static str, value: &str) -> Result<Algorithm, ConfigError> {
    Algorithm::from_str(&value.to_ascii_uppercase()).map_err(|_| ConfigError::Invalid {
        name,
        reason: format!("unsupported algorithm '{value}'"),
    })
}
