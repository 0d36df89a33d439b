//! airqod integrator service.
//!
//! Main entry point. Loads configuration, connects to PostgreSQL, starts
//! the dispatch pipeline (producer, consumers, retry scheduler, schedule
//! runner) and the administrative HTTP API, then coordinates graceful
//! shutdown.

use std::{sync::Arc, time::Duration};

use airqod_api::{AdminCredentials, AppState, Config};
use airqod_core::{PgStorage, RealClock};
use airqod_dispatch::{DestinationResolver, DispatchEngine};
use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    init_tracing(&config.rust_log);

    info!("Starting airqod integrator service");
    info!(
        database_url = %config.database_url_masked(),
        host = %config.host,
        port = config.port,
        consumer_count = config.consumer_count,
        retry_cron = %config.retry_cron,
        destinations = config.servers.len(),
        "Configuration loaded"
    );

    let db_pool = create_database_pool(&config).await?;
    info!("Database connection pool established");

    let storage = Arc::new(PgStorage::new(db_pool.clone()));
    storage.ensure_schema().await.context("Failed to ensure database schema")?;

    let clock = Arc::new(RealClock);
    let resolver = DestinationResolver::new(config.servers.clone());

    let mut engine = DispatchEngine::new(
        storage.clone(),
        storage.clone(),
        resolver,
        config.dispatch_config(),
        clock.clone(),
    )?;
    engine.start();

    let state = AppState::new(
        storage.clone(),
        storage,
        clock,
        AdminCredentials {
            username: config.admin_username.clone(),
            password: config.admin_password.clone(),
        },
    );

    let addr = config.parse_server_addr()?;
    let server_handle = tokio::spawn(async move {
        if let Err(e) = airqod_api::start_server(state, addr).await {
            error!(error = %e, "Server failed");
        }
    });

    info!(addr = %addr, "airqod is ready");

    // The API server owns the shutdown signal; when it stops, drain the
    // pipeline.
    if let Err(e) = server_handle.await {
        error!(error = %e, "Server task panicked");
    }

    info!("Shutting down dispatch pipeline");
    if let Err(e) = engine.shutdown().await {
        error!(error = %e, "Dispatch pipeline shutdown incomplete");
    }

    db_pool.close().await;
    info!("Database connections closed");

    info!("airqod shutdown complete");
    Ok(())
}

/// Initializes tracing with environment-based configuration.
fn init_tracing(default_filter: &str) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = fmt::layer().with_target(true).with_thread_ids(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
}

/// Creates the database connection pool with retry logic.
async fn create_database_pool(config: &Config) -> Result<sqlx::PgPool> {
    let mut retries = 0;
    const MAX_RETRIES: u32 = 5;
    const RETRY_DELAY: Duration = Duration::from_secs(2);

    loop {
        match PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .min_connections(config.database_min_connections)
            .acquire_timeout(Duration::from_secs(config.database_connection_timeout))
            .connect(&config.database_url)
            .await
        {
            Ok(pool) => {
                sqlx::query("SELECT 1")
                    .fetch_one(&pool)
                    .await
                    .context("Failed to verify database connection")?;

                return Ok(pool);
            },
            Err(_e) if retries < MAX_RETRIES => {
                retries += 1;
                info!(
                    attempt = retries,
                    max_retries = MAX_RETRIES,
                    "Database connection failed, retrying..."
                );
                tokio::time::sleep(RETRY_DELAY).await;
            },
            Err(e) => {
                return Err(e).context("Failed to create database connection pool after retries");
            },
        }
    }
}
