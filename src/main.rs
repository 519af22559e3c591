//! OpenSASE Marketplace - order and cart service

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use opensase_marketplace::config::AppConfig;
use opensase_marketplace::http::{self, AppState, JwtKeys};
use opensase_marketplace::store::PgStore;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;
    tracing::info!(?config, "Configuration loaded");

    let pool = PgPoolOptions::new().max_connections(config.db_max_connections).connect(&config.database_url).await?;
    let store = PgStore::new(pool);
    store.migrate().await?;

    let state = AppState::new(Arc::new(store), JwtKeys::new(config.jwt_secret.as_bytes()), config.cancellation_window);
    let app = http::router(state);

    let address = config.bind_address();
    tracing::info!("OpenSASE Marketplace listening on {}", address);
    axum::serve(tokio::net::TcpListener::bind(&address).await?, app).await?;
    Ok(())
}
