//! Read side of the rollup tables for the Summary Service.

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use duckdb::Connection;

use leadlytics_core::rollup::{
    DailyIngestRollup, DailyMetricRollup, DayRange, LandingPath, RollupDay, RollupFreshness,
    RollupScope,
};
use leadlytics_core::service::SummaryStore;

use crate::coerce::{column_float, column_integer, format_day, parse_day};
use crate::DuckDbBackend;

/// Both rollup tables joined on (tenant, property, day). Days without an
/// ingest row read as zero counts and a NULL p95.
pub(crate) const JOINED_ROLLUPS_SQL: &str = "SELECT
        m.tenant_id, m.property_id, m.day,
        m.unique_visitors, m.returning_visitors, m.page_views,
        m.entrances, m.exits, m.conversions,
        m.form_starts, m.form_submits, m.new_leads,
        m.time_to_first_capture_sum_ms, m.time_to_first_capture_count,
        m.traffic_sources, m.top_landing_paths,
        COALESCE(i.accepted_events, 0) AS accepted_events,
        COALESCE(i.rejected_events, 0) AS rejected_events,
        COALESCE(i.accepted_leads, 0) AS accepted_leads,
        COALESCE(i.rejected_leads, 0) AS rejected_leads,
        i.p95_ttfb_ms,
        COALESCE(i.error_breakdown, '{}') AS error_breakdown,
        m.generated_at
    FROM daily_metric_rollups m
    LEFT JOIN daily_ingest_rollups i
        ON i.tenant_id = m.tenant_id AND i.property_id = m.property_id AND i.day = m.day";

/// Scoped rows of `relation` (a table name or a parenthesised subquery
/// shaped like [`JOINED_ROLLUPS_SQL`]), ascending by day.
pub(crate) fn read_rollup_rows(
    conn: &Connection,
    relation: &str,
    scope: &RollupScope,
    range: DayRange,
) -> Result<Vec<RollupDay>> {
    let sql = format!(
        "SELECT
            CAST(r.day AS VARCHAR),
            r.unique_visitors, r.returning_visitors, r.page_views,
            r.entrances, r.exits, r.conversions,
            r.form_starts, r.form_submits, r.new_leads,
            r.time_to_first_capture_sum_ms, r.time_to_first_capture_count,
            r.traffic_sources, r.top_landing_paths,
            r.accepted_events, r.rejected_events, r.accepted_leads, r.rejected_leads,
            r.p95_ttfb_ms, r.error_breakdown
         FROM {relation} r
         WHERE r.tenant_id = ?1
           AND r.property_id = ?2
           AND r.day >= CAST(?3 AS DATE)
           AND r.day <= CAST(?4 AS DATE)
         ORDER BY r.day"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        duckdb::params![
            scope.tenant_id,
            scope.property_id,
            format_day(range.start),
            format_day(range.end)
        ],
        |row| {
            let day: String = row.get(0)?;
            let traffic_sources: Option<String> = row.get(12)?;
            let top_landing_paths: Option<String> = row.get(13)?;
            let error_breakdown: Option<String> = row.get(19)?;
            Ok((
                day,
                DailyMetricRollup {
                    unique_visitors: column_integer(row, 1)?,
                    returning_visitors: column_integer(row, 2)?,
                    page_views: column_integer(row, 3)?,
                    entrances: column_integer(row, 4)?,
                    exits: column_integer(row, 5)?,
                    conversions: column_integer(row, 6)?,
                    form_starts: column_integer(row, 7)?,
                    form_submits: column_integer(row, 8)?,
                    new_leads: column_integer(row, 9)?,
                    time_to_first_capture_sum_ms: column_integer(row, 10)?,
                    time_to_first_capture_count: column_integer(row, 11)?,
                    traffic_sources: parse_counts(traffic_sources.as_deref()),
                    top_landing_paths: parse_landing_paths(top_landing_paths.as_deref()),
                },
                DailyIngestRollup {
                    accepted_events: column_integer(row, 14)?,
                    rejected_events: column_integer(row, 15)?,
                    accepted_leads: column_integer(row, 16)?,
                    rejected_leads: column_integer(row, 17)?,
                    p95_ttfb_ms: column_float(row, 18)?,
                    error_breakdown: parse_counts(error_breakdown.as_deref()),
                },
            ))
        },
    )?;

    let mut days = Vec::new();
    for row in rows {
        let (raw_day, metrics, ingest) = row?;
        if let Some(day) = parse_day(&raw_day) {
            days.push(RollupDay {
                day,
                metrics,
                ingest,
            });
        }
    }
    Ok(days)
}

/// JSON `{key: count}`; anything unreadable is an empty map.
fn parse_counts(raw: Option<&str>) -> BTreeMap<String, i64> {
    let Some(raw) = raw else {
        return BTreeMap::new();
    };
    let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(raw) else {
        return BTreeMap::new();
    };
    map.into_iter()
        .map(|(key, value)| {
            let count = value
                .as_i64()
                .or_else(|| value.as_f64().map(|f| f.round() as i64))
                .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
                .unwrap_or(0);
            (key, count)
        })
        .collect()
}

fn parse_landing_paths(raw: Option<&str>) -> Vec<LandingPath> {
    raw.and_then(|r| serde_json::from_str(r).ok())
        .unwrap_or_default()
}

impl DuckDbBackend {
    /// Live read: both rollup tables joined per day.
    pub async fn read_rollup_range(
        &self,
        scope: &RollupScope,
        range: DayRange,
    ) -> Result<Vec<RollupDay>> {
        let conn = self.conn.lock().await;
        read_rollup_rows(&conn, &format!("({JOINED_ROLLUPS_SQL})"), scope, range)
    }
}

#[async_trait]
impl SummaryStore for DuckDbBackend {
    async fn read_rollup_days(
        &self,
        scope: &RollupScope,
        range: DayRange,
    ) -> Result<Vec<RollupDay>> {
        self.read_rollup_range(scope, range).await
    }

    async fn read_view_days(
        &self,
        scope: &RollupScope,
        range: DayRange,
    ) -> Result<Vec<RollupDay>> {
        self.read_materialized_view(scope, range).await
    }

    fn is_missing_view_error(&self, err: &anyhow::Error) -> bool {
        self.view.is_missing_view_error(err)
    }

    async fn rollup_freshness(&self, scope: &RollupScope) -> Result<RollupFreshness> {
        self.rollup_freshness_at(scope, chrono::Utc::now().date_naive())
            .await
    }
}
