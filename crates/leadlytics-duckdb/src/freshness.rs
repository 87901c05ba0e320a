use anyhow::Result;
use chrono::NaiveDate;

use leadlytics_core::rollup::{RollupFreshness, RollupScope};

use crate::coerce::{parse_day, parse_ts};
use crate::DuckDbBackend;

impl DuckDbBackend {
    /// Latest rolled-up day for `scope` (by day, then generation time) and
    /// how many days it trails `today`. All fields are `None` before the
    /// first rollup.
    pub async fn rollup_freshness_at(
        &self,
        scope: &RollupScope,
        today: NaiveDate,
    ) -> Result<RollupFreshness> {
        let conn = self.conn.lock().await;
        let latest = conn.query_row(
            "SELECT CAST(day AS VARCHAR), CAST(generated_at AS VARCHAR)
             FROM daily_metric_rollups
             WHERE tenant_id = ?1 AND property_id = ?2
             ORDER BY day DESC, generated_at DESC
             LIMIT 1",
            duckdb::params![scope.tenant_id, scope.property_id],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
        );
        let latest = match latest {
            Ok((day, generated_at)) => parse_day(&day).zip(parse_ts(&generated_at)),
            Err(duckdb::Error::QueryReturnedNoRows) => None,
            Err(e) => return Err(e.into()),
        };
        Ok(RollupFreshness::from_latest(latest, today))
    }
}
