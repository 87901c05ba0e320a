use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use tracing::debug;

use leadlytics_core::rollup::DayRange;

use crate::state::AppState;

/// `[today - lookback, today]`.
pub fn due_range(today: NaiveDate, lookback_days: u32) -> anyhow::Result<DayRange> {
    let start = today - Duration::days(i64::from(lookback_days));
    Ok(DayRange::new(start, today)?)
}

/// Roll up the due range for every scope with events in it. Returns the
/// number of scopes and the number of scope-days written.
pub async fn run_due_rollups(state: &Arc<AppState>, today: NaiveDate) -> anyhow::Result<(usize, usize)> {
    let range = due_range(today, state.config.rollup_lookback_days)?;
    let scopes = state
        .db
        .list_rollup_scopes(range, &state.config.default_property_id)
        .await?;
    debug!(scopes = scopes.len(), start = %range.start, end = %range.end, "rollup scopes due");

    let mut days = 0usize;
    for scope in &scopes {
        let report = state
            .db
            .run_rollups(scope, range, state.config.rollup_batch_size)
            .await?;
        days += report.days;
    }
    Ok((scopes.len(), days))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn due_range_covers_lookback_and_today() {
        let today = NaiveDate::from_ymd_opt(2026, 3, 1).expect("date");
        let range = due_range(today, 1).expect("range");
        assert_eq!(range.start, NaiveDate::from_ymd_opt(2026, 2, 28).expect("date"));
        assert_eq!(range.end, today);
        assert_eq!(due_range(today, 0).expect("range").num_days(), 1);
    }
}
