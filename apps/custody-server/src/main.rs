// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::net::SocketAddr;
use std::time::Duration;

use axum_server::{tls_rustls::RustlsConfig, Handle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use custody_server::api::router;
use custody_server::config::{AppConfig, DEFAULT_LOG_FILTER};
use custody_server::state::AppState;

/// Time given to in-flight requests (including download streams) on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

fn init_tracing(json_logs: bool) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let subscriber = tracing_subscriber::registry().with(env_filter);

    if json_logs {
        subscriber
            .with(fmt::layer().json().with_current_span(true).with_target(true))
            .init();
    } else {
        subscriber.with(fmt::layer().with_target(true)).init();
    }
}

async fn shutdown_signal(handle: Handle<SocketAddr>, shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C; shutting down");
    }
    info!("Shutdown requested");
    shutdown.cancel();
    handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
}

#[tokio::main]
async fn main() {
    // Install the ring crypto provider for rustls (must be done before any TLS operations)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {e}");
            std::process::exit(2);
        }
    };
    init_tracing(config.json_logs);

    let state = AppState::initialize(config).expect("Failed to initialize application state");
    let config = state.config.clone();
    info!(
        data_dir = %config.data_dir.display(),
        anchor_backend = state.orchestrator.anchor_backend(),
        blob_backend = state.orchestrator.blob_backend(),
        "Custody state initialized"
    );

    let shutdown = CancellationToken::new();
    let sweeper = state
        .sweeper()
        .map(|sweeper| tokio::spawn(sweeper.run(shutdown.clone())));
    if sweeper.is_none() {
        info!("Anomaly sweeper disabled");
    }

    let app = router(state);
    let handle: Handle<SocketAddr> = Handle::new();
    tokio::spawn(shutdown_signal(handle.clone(), shutdown.clone()));

    let addr = config.bind_addr;
    match &config.tls {
        Some(tls) => {
            let tls_config = RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path)
                .await
                .expect("Failed to load TLS certificate and key");
            info!(%addr, "Custody server listening on https (docs at /docs)");
            axum_server::bind_rustls(addr, tls_config)
                .handle(handle)
                .serve(app.into_make_service())
                .await
                .expect("HTTPS server failed");
        }
        None => {
            warn!("TLS_CERT_PATH/TLS_KEY_PATH not set; serving plain HTTP");
            info!(%addr, "Custody server listening on http (docs at /docs)");
            axum_server::bind(addr)
                .handle(handle)
                .serve(app.into_make_service())
                .await
                .expect("HTTP server failed");
        }
    }

    shutdown.cancel();
    if let Some(task) = sweeper {
        if let Err(e) = task.await {
            warn!(error = %e, "Anomaly sweeper task failed");
        }
    }
    info!("Custody server stopped");
}
