// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::{Context, Result};
use routeros_collector_rs::{
    cfg::{config::CollectorConfig, logger::init_logger},
    http::{router, state::AppState},
};
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = CollectorConfig::load().context("failed to load configuration")?;
    let _log_guard = init_logger(&cfg.logging)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        bind = %format!("{}:{}", cfg.http.host, cfg.http.port),
        max_workers = cfg.concurrency.max_workers,
        max_connections_per_host = cfg.pool.max_connections_per_host,
        cache_ttl_seconds = cfg.cache.ttl.as_secs(),
        "starting RouterOS collector"
    );

    let state = AppState::new(cfg);

    // One background janitor for expired cache entries and idle sessions.
    tokio::spawn(state.clone().run_janitor());

    let addr = format!("{}:{}", state.cfg.http.host, state.cfg.http.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    let app = router(state.clone());
    info!("listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server failed")?;

    info!("shutting down, draining session pools");
    state.shutdown();
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            Ok(mut sig) => {
                sig.recv().await;
            },
            Err(_) => std::future::pending().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
