pub mod api;
pub mod clients;
pub mod config;
pub mod db;
pub mod entities;
pub mod rate_limit;
pub mod services;
pub mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

pub use config::Config;
use state::SharedState;

pub async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::load()?;
    config.validate()?;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.general.log_level));

    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    info!("Almoner v{} starting...", env!("CARGO_PKG_VERSION"));

    let port = config.server.port;

    let shared = Arc::new(SharedState::new(config).await?);
    let app_state = api::create_app_state(shared.clone()).await;

    let gc_handle = shared.rate_limiter.clone().spawn_gc();

    let app = api::router(app_state).await;

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("Failed to bind port {port}"))?;

    info!("Admin API listening at http://0.0.0.0:{port}");

    let server = tokio::spawn(async move {
        let service = app.into_make_service_with_connect_info::<SocketAddr>();
        if let Err(e) = axum::serve(listener, service).await {
            error!("Server error: {e}");
        }
    });

    match signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => error!("Failed to listen for shutdown signal: {e}"),
    }

    gc_handle.abort();
    server.abort();

    info!("Almoner stopped");
    Ok(())
}
