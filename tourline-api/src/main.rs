use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tourline_api::app_config::{Config, DatabaseConfig};
use tourline_api::state::payment_gateways;
use tourline_api::{app, worker, AppState};
use tourline_core::clock::{Clock, SystemClock};
use tourline_core::repository::BookingStore;
use tourline_store::{DbClient, MemoryStore, PgStore};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "tourline_api=debug,tourline_booking=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting Tourline API on port {}", config.server.port);

    let store = open_store(&config.database).await?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let gateways = payment_gateways(&config.payment).context("Failed to set up payment gateways")?;

    let state = AppState::new(store, clock, gateways, &config).context("Invalid business rules")?;
    let workers = worker::spawn_workers(&state, &config.scheduler);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    for handle in workers {
        handle.abort();
    }
    tracing::info!("Shut down cleanly");
    Ok(())
}

async fn open_store(database: &DatabaseConfig) -> anyhow::Result<Arc<dyn BookingStore>> {
    if database.is_memory() {
        tracing::warn!("Using the in-memory store; data is lost on restart");
        return Ok(Arc::new(MemoryStore::new()));
    }

    let db = DbClient::new(
        &database.url,
        database.max_connections,
        Duration::from_secs(database.acquire_timeout_seconds),
    )
    .await
    .context("Failed to connect to database")?;
    db.migrate().await.context("Failed to run migrations")?;

    Ok(Arc::new(PgStore::new(db.pool.clone())))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
