mod auth;
mod config;
mod error;
mod rate_limit;
mod routes;
mod store;

#[cfg(test)]
mod e2e_tests;

use std::sync::Arc;

use chrono::Utc;
use config::AppConfig;
use routes::{app_router, AppState};
use store::RemoteStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Only load .env in development; production uses platform-native env injection.
    #[cfg(debug_assertions)]
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("notesync_api=info".parse()?),
        )
        .init();

    let config = Arc::new(AppConfig::from_env()?);
    tracing::info!("Starting notesync-api with config: {:?}", config);

    let store = RemoteStore::open(&config.database_path, config.content_dir.clone()).await?;
    let state = AppState::new(config, store);
    spawn_maintenance(state.clone());

    let bind_addr = state.config.bind_addr.clone();
    let router = app_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("notesync-api listening on {}", bind_addr);
    axum::serve(listener, router).await?;
    Ok(())
}

/// Periodically drops expired tombstones and idle rate-limit windows.
fn spawn_maintenance(state: AppState) {
    tokio::spawn(async move {
        let retention = i64::try_from(state.config.tombstone_retention.as_secs()).unwrap_or(i64::MAX);
        let mut interval = tokio::time::interval(state.config.tombstone_sweep_interval);
        loop {
            interval.tick().await;
            let cutoff = Utc::now().timestamp().saturating_sub(retention);
            match state.store.sweep_tombstones(cutoff).await {
                Ok(0) => {}
                Ok(removed) => tracing::info!(removed, "Swept expired tombstones"),
                Err(error) => tracing::warn!("Tombstone sweep failed: {error}"),
            }
            let pruned = state.rate_limiter().prune().await;
            if pruned > 0 {
                tracing::debug!(pruned, "Pruned idle rate-limit windows");
            }
        }
    });
}
