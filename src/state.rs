// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use crate::auth::AuthGate;
use crate::config::Settings;

#[derive(Clone)]
pub struct AppState {
    pub gate: Arc<AuthGate>,
    pub settings: Arc<Settings>,
}

impl AppState {
    pub fn new(gate: AuthGate, settings: Settings) -> Self {
        Self {
            gate: Arc::new(gate),
            settings: Arc::new(settings),
        }
    }

    /// Build the gate from the settings and wrap both.
    pub fn from_settings(settings: Settings) -> Self {
        let gate = AuthGate::from_settings(&settings);
        Self::new(gate, settings)
    }
}
