use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use tracing::{error, info};

use crate::state::AppState;

pub mod accelerator;
pub mod rollups;

/// What one scheduler tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickReport {
    pub scopes: usize,
    pub days: usize,
    pub view_refreshed: bool,
}

pub async fn process_once(state: &Arc<AppState>) -> anyhow::Result<TickReport> {
    process_for_day(state, Utc::now().date_naive()).await
}

/// One tick as if `today` were the current UTC day: roll up the lookback
/// window for every active scope, refresh the accelerator, then drop cached
/// summaries.
pub async fn process_for_day(state: &Arc<AppState>, today: NaiveDate) -> anyhow::Result<TickReport> {
    let (scopes, days) = rollups::run_due_rollups(state, today).await?;
    let view_refreshed = accelerator::refresh_if_enabled(state).await?;
    state.summaries.invalidate();
    Ok(TickReport {
        scopes,
        days,
        view_refreshed,
    })
}

pub async fn run_scheduler_loop(state: Arc<AppState>) {
    let tick = state.config.scheduler_tick();
    info!(tick_seconds = tick.as_secs(), "Rollup scheduler started");
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        match process_once(&state).await {
            Ok(report) => info!(
                scopes = report.scopes,
                days = report.days,
                view_refreshed = report.view_refreshed,
                "rollup scheduler tick complete"
            ),
            Err(err) => error!(error = %err, "rollup scheduler iteration failed"),
        }
    }
}
