use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use leadlytics_worker::scheduler::run_scheduler_loop;
use leadlytics_worker::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Structured JSON logging. Level controlled via RUST_LOG.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("leadlytics=info".parse()?),
        )
        .json()
        .init();

    let cfg = leadlytics_core::config::Config::from_env().map_err(|e| anyhow::anyhow!(e))?;

    std::fs::create_dir_all(&cfg.data_dir)?;
    let db_path = format!("{}/leadlytics.db", cfg.data_dir);

    // Opening initialises the schema.
    let db = leadlytics_duckdb::DuckDbBackend::open(&db_path, &cfg.duckdb_memory_limit)?
        .with_materialized_view_name(&cfg.materialized_view_name);

    if cfg.materialized_view_enabled {
        if let Err(e) = db.create_materialized_view().await {
            tracing::warn!(error = %e, "Failed to create materialized view; summaries read live rollups");
        }
    }

    info!(
        data_dir = %cfg.data_dir,
        batch_size = cfg.rollup_batch_size,
        lookback_days = cfg.rollup_lookback_days,
        materialized_view = cfg.materialized_view_enabled,
        "Leadlytics worker starting"
    );

    let state = Arc::new(AppState::new(db, cfg));

    let scheduler = {
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            run_scheduler_loop(state).await;
        })
    };

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    scheduler.abort();
    Ok(())
}
