//! Mail Operator
//!
//! Runs the Email and EmailSenderConfig controllers against in-process
//! object stores and serves the resource API next to the health endpoints.
//!
//! ## Architecture
//!
//! ```text
//! HTTP API (/api/v1/namespaces/{ns}/...)
//!   ↓ (writes)
//! InMemoryStore<Email | EmailSenderConfig | Secret>
//!   ↓ (watch events)
//! Controller<Email, EmailReconciler>            Controller<EmailSenderConfig, SenderConfigReconciler>
//!   ↓                                             ↓
//! ProviderRegistry ─► MailerSend / Mailgun
//! ```
//!
//! ## Features
//!
//! - Concurrent reconciles across objects, one at a time per object
//! - Retry with exponential backoff for retriable failures
//! - Graceful shutdown on SIGINT/SIGTERM with worker drain
//! - Health, readiness and Prometheus metrics endpoints

pub mod api;
pub mod config;
pub mod error;

use api::Stores;
use axum::Router;
use config::OperatorConfig;
use core_config::{Environment, FromEnv};
use email::{EmailReconciler, ProviderRegistry, SecretResolver, SenderConfigReconciler};
use eyre::{Result, WrapErr};
use reconcile_worker::{Controller, ControllerConfig, HealthState, health_router, init_metrics};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Health endpoints merged with the resource API
pub fn app(stores: Stores, health: HealthState) -> Router {
    health_router(health).merge(api::router(stores))
}

/// Start both controllers. Each stops when `shutdown` flips to `true`.
pub fn spawn_controllers(
    config: &OperatorConfig,
    stores: &Stores,
    registry: Arc<ProviderRegistry>,
    shutdown: watch::Receiver<bool>,
) -> JoinSet<(&'static str, Result<(), reconcile_worker::ReconcileError>)> {
    let secrets = SecretResolver::new(stores.secrets.clone());
    let mut controllers = JoinSet::new();

    let email_controller = Controller::new(
        stores.emails.clone(),
        EmailReconciler::new(
            stores.emails.clone(),
            stores.emails.clone(),
            stores.sender_configs.clone(),
            secrets.clone(),
            registry.clone(),
        ),
        ControllerConfig::new("email")
            .with_max_concurrent_reconciles(config.email_concurrency)
            .with_max_retries(config.max_retries),
    );
    let rx = shutdown.clone();
    controllers.spawn(async move { ("email", email_controller.run(rx).await) });

    let sender_config_controller = Controller::new(
        stores.sender_configs.clone(),
        SenderConfigReconciler::new(stores.sender_configs.clone(), secrets, registry),
        ControllerConfig::new("sender-config")
            .with_max_concurrent_reconciles(config.sender_config_concurrency)
            .with_max_retries(config.max_retries),
    );
    controllers.spawn(async move {
        (
            "sender-config",
            sender_config_controller.run(shutdown).await,
        )
    });

    controllers
}

/// Run the mail operator
///
/// 1. Sets up structured logging (JSON for prod, pretty for dev)
/// 2. Loads configuration from the environment
/// 3. Starts the Email and EmailSenderConfig controllers
/// 4. Serves the API until SIGINT/SIGTERM, then drains the controllers
///
/// # Errors
///
/// Returns an error if configuration is invalid or the listener cannot bind.
pub async fn run() -> Result<()> {
    // Initialize tracing (env-aware: JSON for prod, pretty for dev)
    let environment = Environment::from_env();
    core_config::tracing::init_tracing(&environment);

    init_metrics();

    let config = OperatorConfig::from_env().wrap_err("Failed to load operator configuration")?;

    let app_name = env!("CARGO_PKG_NAME");
    let app_version = env!("CARGO_PKG_VERSION");
    info!(name = %app_name, version = %app_version, "Starting mail operator");
    info!(
        email_workers = config.email_concurrency,
        sender_config_workers = config.sender_config_concurrency,
        max_retries = ?config.max_retries,
        "Controller configuration loaded"
    );

    let stores = Stores::new();
    let registry = Arc::new(ProviderRegistry::with_defaults(config.providers.clone()));
    info!(providers = ?registry.names(), "Provider registry ready");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut controllers = spawn_controllers(&config, &stores, registry, shutdown_rx);

    let health = HealthState::new(app_name, app_version);
    let address = config.server.address();
    let listener = TcpListener::bind(&address)
        .await
        .wrap_err_with(|| format!("Failed to bind HTTP server to {}", address))?;

    health.set_ready(true);
    info!(address = %address, "Mail operator listening");

    let serve_result = axum::serve(listener, app(stores, health.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await;

    health.set_ready(false);
    let _ = shutdown_tx.send(true);

    while let Some(joined) = controllers.join_next().await {
        match joined {
            Ok((name, Ok(()))) => info!(controller = name, "Controller stopped"),
            Ok((name, Err(e))) => error!(controller = name, error = %e, "Controller failed"),
            Err(e) => error!(error = %e, "Controller task panicked"),
        }
    }

    serve_result.wrap_err("HTTP server failed")?;
    info!("Mail operator stopped");
    Ok(())
}

/// Wait for a shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        },
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        },
    }
}
