//! bulkreg-import - Bulk Registration Import Service
//!
//! Accepts CSV uploads of registration candidates, validates them row by
//! row, and executes confirmed imports in a background job with durable
//! per-row outcomes.

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use bulkreg_import::services::job_executor;
use bulkreg_import::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting bulkreg-import service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = bulkreg_common::config::ServiceConfig::load()?;
    let port = config.port;

    let db_path = config.database_path();
    info!("Database: {}", db_path.display());

    let db_pool = bulkreg_import::db::init_database_pool(&db_path).await?;
    info!("Database connection established");

    bulkreg_import::db::catalog::ensure_default_programs(&db_pool).await?;

    // Pick up sessions confirmed before a restart; only PENDING rows are
    // re-attempted, so completed work is never repeated.
    let resumed = job_executor::resume_unfinished(&db_pool, config.row_delay_ms).await?;
    if resumed > 0 {
        info!(resumed, "Resumed unfinished import jobs");
    }

    // Periodic sweep of expired preview sessions.
    let sweep_pool = db_pool.clone();
    let sweep_interval = config.sweep_interval_secs;
    tokio::spawn(async move {
        let mut ticker =
            tokio::time::interval(std::time::Duration::from_secs(sweep_interval.max(1)));
        loop {
            ticker.tick().await;
            match bulkreg_import::db::sessions::sweep_expired(&sweep_pool).await {
                Ok(0) => {}
                Ok(n) => info!(swept = n, "Removed expired preview sessions"),
                Err(e) => tracing::warn!(error = %e, "Expired session sweep failed"),
            }
        }
    });

    let state = AppState::new(db_pool, config);
    let app = bulkreg_import::build_router(state);

    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
    info!("Listening on http://127.0.0.1:{}", port);

    axum::serve(listener, app).await?;

    Ok(())
}
