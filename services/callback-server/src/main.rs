//! Spotify credential engine
//!
//! Single-binary service that:
//! 1. Completes the Spotify authorization-code flow on /callback
//! 2. Stores each user's credential next to an expiring trigger key
//! 3. Refreshes access tokens when their trigger expires
//! 4. Serves credential status, logout, health and metrics over HTTP

mod config;
mod error;
mod metrics;
mod web;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use credential_engine::{
    Backend, CredentialStore, ExpirationNotifier, MemoryBackend, RedisBackend,
    RefreshCoordinator, spawn_refresh_listener,
};
use spotify_auth::{ClientConfig, OAuthClient};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{BackendKind, Config, StoreConfig};
use crate::web::AppState;

/// How long in-flight requests get to finish after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // JSON logs, filter from LOG_LEVEL then RUST_LOG
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting spotify-credential-engine");

    // Install before the engine records anything
    let prometheus_handle = metrics::install_recorder();

    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.server.listen_addr,
        backend = ?config.store.backend,
        client_id = %config.spotify.client_id,
        "configuration loaded"
    );

    let backend = connect_backend(&config.store).await?;
    let store = Arc::new(CredentialStore::new(backend.clone()));

    // Managed Redis offerings often forbid CONFIG SET; they can be
    // preconfigured with notify-keyspace-events instead.
    if let Err(e) = store.configure_notifications().await {
        warn!(error = %e, "could not enable expiry notifications, assuming preconfigured");
    }

    let client_secret = config
        .spotify
        .client_secret
        .clone()
        .context("spotify client secret not resolved")?;
    let oauth = OAuthClient::new(
        ClientConfig::new(
            config.spotify.client_id.clone(),
            client_secret,
            config.spotify.redirect_uri.clone(),
        )
        .with_scopes(config.spotify.scopes.clone()),
        Duration::from_secs(config.spotify.request_timeout_secs),
    )
    .context("failed to build Spotify client")?;

    let coordinator = Arc::new(RefreshCoordinator::new(
        store.clone(),
        oauth.clone(),
        config.refresh.policy(),
    ));

    // Triggers that fired while nobody was subscribed are gone for good
    if let Err(e) = coordinator.rearm_orphans().await {
        warn!(error = %e, "orphan reconciliation failed, continuing");
    }

    let notifier =
        ExpirationNotifier::new(backend).with_reconnect_delay(config.refresh.reconnect_delay());
    let refresh_listener = spawn_refresh_listener(&notifier, coordinator)
        .await
        .context("failed to subscribe to expiry events")?;

    let app = web::build_router(
        AppState::new(store, oauth, prometheus_handle),
        config.server.max_connections,
    );

    let listen_addr = config.server.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting requests");

    // The drain timer starts at signal receipt, not at server start
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => {
            info!("all in-flight requests drained");
        }
        Ok(Ok(Err(e))) => {
            error!(error = %e, "server error during shutdown");
        }
        Ok(Err(e)) => {
            error!(error = %e, "server task panicked");
        }
        Err(_) => {
            warn!(
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    // In-flight refreshes are abandoned; their claims lapse and orphan
    // reconciliation re-arms them on the next start.
    refresh_listener.abort();

    info!("shutdown complete");
    Ok(())
}

async fn connect_backend(store: &StoreConfig) -> Result<Arc<dyn Backend>> {
    let op_timeout = Duration::from_secs(store.op_timeout_secs);
    match store.backend {
        BackendKind::Redis => {
            let url = store
                .url
                .as_deref()
                .context("store.url is required for the redis backend")?;
            let backend = RedisBackend::connect(url, op_timeout)
                .await
                .context("failed to connect to redis")?;
            Ok(Arc::new(backend))
        }
        BackendKind::Memory => {
            warn!("using in-memory credential store, credentials will not survive restart");
            Ok(Arc::new(MemoryBackend::new()))
        }
    }
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
