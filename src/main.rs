// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::process::ExitCode;

use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use entra_gateway::{
    api::router,
    config::{Settings, TlsPaths, VerificationMode},
    logging::init_tracing,
    state::AppState,
};

#[tokio::main]
async fn main() -> ExitCode {
    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            // The subscriber is configured from these settings, so stderr it is.
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    init_tracing(settings.log_format);

    info!(
        tenant_id = %settings.tenant_id,
        client_id = %settings.client_id,
        environment = %settings.environment,
        jwks_url = %settings.jwks_url(),
        "Starting Entra gateway"
    );
    if settings.verification_mode == VerificationMode::TrustedDev {
        warn!(
            "Token verification is DISABLED (SKIP_TOKEN_VERIFICATION=true); \
             never run this in production"
        );
    }

    let addr = settings.bind_addr;
    let tls = settings.tls.clone();
    let app = router(AppState::from_settings(settings));

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    let result = match tls {
        Some(paths) => serve_tls(app, addr, &paths, shutdown).await,
        None => serve_plain(app, addr, shutdown).await,
    };

    match result {
        Ok(()) => {
            info!("Server stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Server failed");
            ExitCode::FAILURE
        }
    }
}

async fn serve_plain(
    app: Router,
    addr: std::net::SocketAddr,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on http://{addr} (docs at /docs)");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
}

async fn serve_tls(
    app: Router,
    addr: std::net::SocketAddr,
    paths: &TlsPaths,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    // Must happen before any TLS configuration is built.
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        warn!("A rustls crypto provider was already installed");
    }

    let config = RustlsConfig::from_pem_file(&paths.cert, &paths.key).await?;
    info!("Listening on https://{addr} (docs at /docs)");

    tokio::select! {
        result = axum_server::bind_rustls(addr, config).serve(app.into_make_service()) => result,
        _ = shutdown.cancelled() => Ok(()),
    }
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
    shutdown.cancel();
}
