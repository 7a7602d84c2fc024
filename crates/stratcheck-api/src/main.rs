//! # stratcheck-api — Binary Entry Point
//!
//! Parses configuration, picks the storage backends, starts the limiter
//! sweep and the expired-token purge, and serves the API until SIGINT or
//! SIGTERM.
//!
//! Shutdown order: stop accepting connections, give in-flight requests the
//! grace period, stop the limiter sweep and the purge, then drain background
//! tasks.

use std::future::IntoFuture;
use std::net::SocketAddr;

use anyhow::Context;
use clap::Parser;
use stratcheck_api::config::{AppConfig, LogFormat};
use stratcheck_api::state::{AppState, Backends, MemoryBackends};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::parse();
    init_tracing(config.log_format);

    config.validate().context("invalid configuration")?;
    tracing::info!(?config, "configuration loaded");

    let backends = match stratcheck_api::db::init_pool(&config.db).await.map_err(|e| {
        tracing::error!("database initialization failed: {e}");
        e
    })? {
        Some(pool) => Backends::postgres(pool),
        None => Backends::in_memory(&MemoryBackends::new()),
    };

    let port = config.port;
    let grace = config.shutdown.grace();
    let drain = config.shutdown.drain();
    let state = AppState::new(config, backends);
    let limiter = state.limiter.clone();
    let purger = state.purger.clone();
    let background = state.background.clone();

    limiter.start();
    purger.start();

    let app = stratcheck_api::app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!("StratCheck API listening on {}", addr);

    let shutdown = CancellationToken::new();
    tokio::spawn(watch_signals(shutdown.clone()));

    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown.clone().cancelled_owned());
    let mut server = std::pin::pin!(server.into_future());

    tokio::select! {
        result = &mut server => result.context("server error")?,
        () = async {
            shutdown.cancelled().await;
            tokio::time::sleep(grace).await;
        } => {
            tracing::warn!(?grace, "in-flight requests did not finish within the grace period");
        }
    }

    limiter.stop().await;
    purger.stop().await;

    match background.drain(drain).await {
        Ok(()) => tracing::info!("background tasks drained"),
        Err(timeout) => tracing::warn!(error = %timeout, "abandoning background tasks"),
    }

    tracing::info!("stopped server");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Cancel `shutdown` on the first SIGINT or SIGTERM.
async fn watch_signals(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {e}");
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
                tracing::error!("failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!(signal = "SIGINT", "shutting down server"),
        () = terminate => tracing::info!(signal = "SIGTERM", "shutting down server"),
    }
    shutdown.cancel();
}
