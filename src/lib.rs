// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Entra Gateway - Bearer-token verification for Microsoft Entra ID
//!
//! This crate verifies Entra ID (Azure AD) access tokens against the
//! tenant's published signing keys and hands the authenticated identity to
//! downstream handlers.
//!
//! ## Modules
//!
//! - `api` - HTTP API handlers (Axum)
//! - `auth` - Key store, token verifier, identity projection, auth gate
//! - `config` - Environment-driven settings
//! - `logging` - Tracing subscriber setup

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod logging;
pub mod state;
