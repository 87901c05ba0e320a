use std::sync::Arc;

use crate::state::AppState;

/// Rebuild the materialized rollup table when it is enabled. Returns whether
/// a refresh ran.
pub async fn refresh_if_enabled(state: &Arc<AppState>) -> anyhow::Result<bool> {
    if !state.config.materialized_view_enabled {
        return Ok(false);
    }
    state.db.create_materialized_view().await?;
    state.db.refresh_materialized_view().await?;
    Ok(true)
}
