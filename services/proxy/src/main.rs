//! Multi-account reverse proxy for a cloud AI code-assist backend
//!
//! Single binary that:
//! 1. Loads an account pool and rotates across accounts on rate limits and
//!    quota exhaustion.
//! 2. Exposes OpenAI- and Anthropic-compatible ingress surfaces, plus a
//!    native passthrough, translating each into the upstream envelope.
//! 3. Runs a background credential refresher and account-sync pass.
//! 4. Exposes an admin API for account provisioning and pool control.

mod admin;
mod api_tokens;
mod config;
mod error;
mod forwarder;
mod ingress;
mod metrics;
mod provider_impl;
mod refresher;

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use account_pool::Pool;
use oauth_client::{AccountStore, CredentialStore};

use crate::api_tokens::ApiTokenStore;
use crate::config::Config;
use crate::provider_impl::PooledProvider;
use provider::Provider;

const DEFAULT_CONFIG_PATH: &str = "config.toml";
const DEFAULT_CREDENTIALS_PATH: &str = "credentials.json";
const DEFAULT_ACCOUNTS_PATH: &str = "accounts.json";

#[derive(Clone)]
struct AppState {
    pool: Arc<Pool>,
    started_at: Instant,
}

fn build_http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .pool_max_idle_per_host(50)
        .http2_prior_knowledge()
        .build()
        .context("failed to build shared upstream HTTP client")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting code-assist-proxy");

    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
        .unwrap_or(DEFAULT_CONFIG_PATH);

    info!(path = cli_config_path, "loading configuration");
    let config = Config::load(std::path::Path::new(cli_config_path))
        .with_context(|| format!("failed to load config from {cli_config_path}"))?;

    info!(
        listen_addr = %config.proxy.listen_addr,
        admin_listen_addr = %config.proxy.admin_listen_addr,
        model_mappings = config.model_mappings.len(),
        api_tokens = config.api_tokens.len(),
        "configuration loaded"
    );

    let credentials_path = config
        .proxy
        .credentials_path
        .clone()
        .unwrap_or_else(|| DEFAULT_CREDENTIALS_PATH.into());
    let accounts_path = config
        .proxy
        .accounts_path
        .clone()
        .unwrap_or_else(|| DEFAULT_ACCOUNTS_PATH.into());

    let credential_store = Arc::new(
        CredentialStore::load(credentials_path)
            .await
            .context("failed to load credential store")?,
    );
    let account_store = Arc::new(
        AccountStore::load(accounts_path)
            .await
            .context("failed to load account store")?,
    );

    let upstream_http_client = build_http_client(config.proxy.upstream_timeout_secs)?;

    let account_ids = credential_store.account_ids().await;
    let pool = Arc::new(
        Pool::new(
            account_ids,
            std::time::Duration::from_secs(config.pool.cooldown_secs),
            credential_store.clone(),
            upstream_http_client.clone(),
        )
        .with_self_heal(config.pool.self_heal_on_exhaustion),
    );
    pool.set_mode(config.pool.schedule_mode).await;

    let api_tokens = Arc::new(ApiTokenStore::new(config.api_tokens.clone()));
    let model_mappings = Arc::new(Mutex::new(config.model_mappings.clone()));

    metrics::install_recorder();

    let refresher_config = config.refresher;
    let refresher_credential_store = credential_store.clone();
    let refresher_account_store = account_store.clone();
    let refresher_oauth_client = upstream_http_client.clone();
    tokio::spawn(async move {
        let sync_client = account_sync::build_sync_client().expect("failed to build account-sync HTTP client");
        refresher::run(
            refresher_config,
            refresher_credential_store,
            refresher_account_store,
            refresher_oauth_client,
            sync_client,
        )
        .await;
    });

    let ingress_state = ingress::IngressState {
        pool: pool.clone(),
        http_client: upstream_http_client.clone(),
        model_mappings: model_mappings.clone(),
    };
    let ingress_router = ingress::build_ingress_router(ingress_state, api_tokens);

    let app_state = AppState {
        pool: pool.clone(),
        started_at: Instant::now(),
    };
    let public_router = Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(app_state)
        .merge(ingress_router);

    let admin_state = admin::AdminState::new(
        pool.clone(),
        account_store.clone(),
        upstream_http_client.clone(),
        config.model_mappings.clone(),
    );
    let admin_router = admin::build_admin_router(admin_state);

    let public_listener = TcpListener::bind(config.proxy.listen_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.proxy.listen_addr))?;
    let admin_listener = TcpListener::bind(config.proxy.admin_listen_addr)
        .await
        .with_context(|| format!("failed to bind admin listener to {}", config.proxy.admin_listen_addr))?;

    info!(addr = %config.proxy.listen_addr, "listening on public ingress");
    info!(addr = %config.proxy.admin_listen_addr, "listening on admin API");

    let public_server = axum::serve(public_listener, public_router).with_graceful_shutdown(shutdown_signal());
    let admin_server = axum::serve(admin_listener, admin_router).with_graceful_shutdown(shutdown_signal());

    tokio::try_join!(
        async { public_server.await.context("public server error") },
        async { admin_server.await.context("admin server error") },
    )?;

    info!("shutdown complete");
    Ok(())
}

/// Liveness + per-provider health, reported through the `Provider` trait.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = state.started_at.elapsed().as_secs();
    let health = PooledProvider::new(state.pool.clone()).health().await;

    let body = serde_json::json!({
        "status": health.status,
        "uptime_seconds": uptime,
        "pool": health.pool,
    });

    (
        axum::http::StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus exposition endpoint. The recorder is installed once at
/// startup; this just renders its current snapshot.
async fn metrics_handler() -> impl IntoResponse {
    (
        axum::http::StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::render(),
    )
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
