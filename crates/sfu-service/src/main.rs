//! SFU Signaling Service
//!
//! # Servers
//!
//! - WebSocket signaling on `/ws` (default: 0.0.0.0:7000)
//! - Health, readiness and Prometheus metrics (default: 0.0.0.0:8081)
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize Prometheus metrics recorder
//! 3. Load the account signing key and build the chain client
//! 4. Wire authenticator, registry, billing notifier and media engine
//! 5. Bind both listeners (fail fast), then serve
//! 6. Spawn the ended-conference purge task
//! 7. Wait for shutdown signal, then drain

#![warn(clippy::pedantic)]
#![allow(clippy::too_many_lines)] // main.rs orchestrates startup, naturally longer

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use common::chain::{ChainClient, NearRpcClient};
use common::signer::AccountSigner;
use sfu_service::auth::SignatureAuthenticator;
use sfu_service::config::Config;
use sfu_service::lifecycle::ConferenceLifecycle;
use sfu_service::media::LoopbackEngine;
use sfu_service::notifier::HttpBillingNotifier;
use sfu_service::observability::{health_router, metrics, HealthState};
use sfu_service::registry::ConferenceRegistry;
use sfu_service::routes::{build_routes, AppState};
use sfu_service::signaling::SignalContext;
use sfu_service::watchdog::WatchdogConfig;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How often ended conferences are checked for expiry.
const PURGE_INTERVAL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing; LOG_FORMAT=json switches to structured output
    let json_logs = std::env::var("LOG_FORMAT").is_ok_and(|format| format == "json");
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sfu=debug,sfu_service=debug,common=info,tower_http=debug".into()),
        )
        .with(json_logs.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json_logs).then(tracing_subscriber::fmt::layer))
        .init();

    info!("Starting SFU service");

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        bind_address = %config.bind_address,
        health_bind_address = %config.health_bind_address,
        near_account = %config.near_account,
        near_rpc_url = %config.near_rpc_url,
        contract_id = %config.contract_id,
        max_peers = config.max_peers,
        max_conference_secs = config.max_conference_duration.as_secs(),
        "Configuration loaded successfully"
    );

    let prometheus_handle = metrics::init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;

    let health_state = Arc::new(HealthState::new());
    let shutdown_token = CancellationToken::new();

    // Chain access: key lookups for join auth, create_call / end_call
    let signer = AccountSigner::from_secret(&config.near_pk).map_err(|e| {
        error!(error = %e, "NEAR_PK is not a valid ed25519 key");
        e
    })?;
    info!(public_key = %signer.public_key(), "Account signing key loaded");

    let chain: Arc<dyn ChainClient> = Arc::new(
        NearRpcClient::new(config.near_rpc_url.clone(), config.contract_id.clone())?
            .with_signer(config.near_account.clone(), Arc::new(signer)),
    );

    let registry = Arc::new(ConferenceRegistry::new());
    let notifier = Arc::new(HttpBillingNotifier::new(
        Arc::clone(&chain),
        config.callback_timeout,
    )?);
    let lifecycle = Arc::new(ConferenceLifecycle::new(
        Arc::clone(&registry),
        notifier,
        WatchdogConfig {
            poll_interval: config.watchdog_poll_interval,
            max_lifetime: config.max_conference_duration,
        },
        shutdown_token.child_token(),
    ));
    let signal_context = Arc::new(SignalContext {
        authenticator: Arc::new(SignatureAuthenticator::new(chain)),
        engine: Arc::new(LoopbackEngine::new()),
        lifecycle,
        max_peers: config.max_peers,
    });

    // Health server: bind BEFORE spawning to fail fast on bind errors
    let health_addr: SocketAddr = config.health_bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.health_bind_address, "Invalid health bind address");
        format!("Invalid health bind address: {e}")
    })?;
    let metrics_router = Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let handle = prometheus_handle.clone();
            async move { handle.render() }
        }),
    );
    let health_app = health_router(Arc::clone(&health_state)).merge(metrics_router);
    let health_listener = tokio::net::TcpListener::bind(health_addr)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %health_addr, "Failed to bind health server");
            format!("Failed to bind health server to {health_addr}: {e}")
        })?;

    let health_shutdown = shutdown_token.child_token();
    tokio::spawn(async move {
        info!(addr = %health_addr, "Health server starting");
        let server = axum::serve(health_listener, health_app).with_graceful_shutdown(async move {
            health_shutdown.cancelled().await;
        });
        if let Err(e) = server.await {
            error!(error = %e, "Health server failed");
        }
    });

    // Signaling server
    let bind_addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.bind_address, "Invalid bind address");
        format!("Invalid bind address: {e}")
    })?;
    let app = build_routes(AppState {
        signal: signal_context,
        shutdown: shutdown_token.child_token(),
    });
    let listener = tokio::net::TcpListener::bind(bind_addr).await.map_err(|e| {
        error!(error = %e, addr = %bind_addr, "Failed to bind signaling server");
        format!("Failed to bind signaling server to {bind_addr}: {e}")
    })?;

    let server_shutdown = shutdown_token.child_token();
    let server = tokio::spawn(async move {
        info!(addr = %bind_addr, "Signaling server starting");
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            server_shutdown.cancelled().await;
        });
        if let Err(e) = server.await {
            error!(error = %e, "Signaling server failed");
        }
    });

    let retention = chrono::Duration::from_std(config.ended_retention)
        .map_err(|e| format!("Invalid ended conference retention: {e}"))?;
    let purge_token = shutdown_token.child_token();
    let purge_registry = Arc::clone(&registry);
    tokio::spawn(async move {
        run_purge_task(purge_registry, retention, purge_token).await;
    });

    health_state.set_ready();
    info!("SFU service running - press Ctrl+C to shutdown");

    shutdown_signal().await;

    info!("Shutdown signal received, initiating graceful shutdown...");
    health_state.set_not_ready();
    shutdown_token.cancel();

    // Connections drain through their close path before the server exits
    if tokio::time::timeout(Duration::from_secs(10), server).await.is_err() {
        error!("Signaling server did not stop within 10s");
    }

    info!(
        conferences = registry.len(),
        "SFU service shutdown complete"
    );
    Ok(())
}

/// Periodically drop ended conferences older than `retention`.
async fn run_purge_task(
    registry: Arc<ConferenceRegistry>,
    retention: chrono::Duration,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(PURGE_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                debug!(target: "sfu.registry", "Purge task stopping");
                break;
            }
            _ = ticker.tick() => {
                let purged = registry.purge_ended(chrono::Utc::now() - retention);
                if purged > 0 {
                    info!(target: "sfu.registry", purged, "Purged ended conferences");
                    metrics::record_conferences_purged(purged);
                }
            }
        }
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
