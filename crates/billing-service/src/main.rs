//! Billing Authority Service
//!
//! Issues conference credentials and signs SFU lifecycle confirmations.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize Prometheus metrics recorder
//! 3. Load the account signing key and build the chain client
//! 4. Connect to the ledger and run migrations
//! 5. Bind the listener (fail fast), then serve until SIGINT/SIGTERM

use billing_service::config::Config;
use billing_service::observability::metrics;
use billing_service::repositories::{Ledger, PgLedger};
use billing_service::routes::{build_routes, AppState};
use billing_service::services::{ConferenceService, ConfirmationSigner};
use common::chain::{ChainClient, NearRpcClient};
use common::secret::ExposeSecret;
use common::signer::AccountSigner;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing; LOG_FORMAT=json switches to structured output
    let json_logs = std::env::var("LOG_FORMAT").is_ok_and(|format| format == "json");
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "billing=debug,billing_service=debug,common=info,tower_http=debug".into()),
        )
        .with(json_logs.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json_logs).then(tracing_subscriber::fmt::layer))
        .init();

    info!("Starting billing service");

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        bind_address = %config.bind_address,
        account_id = %config.account_id,
        callback_url = %config.callback_url,
        near_rpc_url = %config.near_rpc_url,
        contract_id = %config.contract_id,
        "Configuration loaded successfully"
    );

    let prometheus_handle = metrics::init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;

    let signer = Arc::new(AccountSigner::from_secret(&config.near_pk).map_err(|e| {
        error!(error = %e, "NEAR_PK is not a valid ed25519 key");
        e
    })?);
    info!(public_key = %signer.public_key(), "Account signing key loaded");

    // Read-only chain access: node list and epoch height
    let chain: Arc<dyn ChainClient> = Arc::new(NearRpcClient::new(
        config.near_rpc_url.clone(),
        config.contract_id.clone(),
    )?);

    info!("Connecting to database...");
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(5))
        .connect(config.database_url.expose_secret())
        .await
        .map_err(|e| {
            error!("Failed to connect to database: {}", e);
            e
        })?;
    sqlx::migrate!("../../migrations").run(&pool).await.map_err(|e| {
        error!("Failed to run migrations: {}", e);
        e
    })?;
    info!("Database connection established");

    let ledger: Arc<dyn Ledger> = Arc::new(PgLedger::new(pool));
    let conferences = Arc::new(ConferenceService::new(
        ledger,
        Arc::clone(&chain),
        ConfirmationSigner::new(signer, chain),
        config.account_id.clone(),
        config.callback_url.clone(),
    ));

    let app = build_routes(Arc::new(AppState { conferences }), Some(prometheus_handle));

    let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!("Invalid bind address: {}", e);
        e
    })?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!(error = %e, addr = %addr, "Failed to bind billing server");
        e
    })?;

    info!("Billing service listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Billing service shutdown complete");
    Ok(())
}

/// Listens for shutdown signals (SIGTERM, SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
