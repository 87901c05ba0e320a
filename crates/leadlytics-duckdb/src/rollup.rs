//! Rollup Engine: per-day aggregation over the raw tables and the idempotent
//! upsert into `daily_metric_rollups` / `daily_ingest_rollups`.
//!
//! Each read takes the connection lock for a single statement, so the ten
//! reads of one day (and the days of one batch) interleave freely. Batches
//! run strictly one after the other.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use duckdb::Connection;
use tokio::task::JoinSet;
use tracing::{debug, info};

use leadlytics_core::rollup::{
    day_bounds, plan_batches, rank_landing_paths, DailyIngestRollup, DailyMetricRollup, DayRange,
    LandingPath, RollupKey, RollupScope, TOP_LANDING_PATHS,
};

use crate::coerce::{column_float, column_integer, format_day, format_ts, parse_day};
use crate::predicate::{ScopeFilter, SqlParams};
use crate::rejections::{EVENTS_ENDPOINT, LEAD_CAPTURE_ENDPOINT};
use crate::DuckDbBackend;

/// What one `run_rollups` call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollupRunReport {
    pub scope: RollupScope,
    pub days: usize,
    pub batches: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct TrafficTotals {
    unique_visitors: i64,
    returning_visitors: i64,
    page_views: i64,
    entrances: i64,
    exits: i64,
    conversions: i64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct FormCounts {
    starts: i64,
    submits: i64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct FirstCaptureTiming {
    sum_ms: i64,
    count: i64,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct RejectionCounts {
    events: i64,
    leads: i64,
    by_reason: BTreeMap<String, i64>,
}

/// `{alias}.tenant_id = ? [AND {alias}.property_id = ?] AND {ts} in [day, day+1)`.
fn day_rows(
    scope: &RollupScope,
    alias: &str,
    ts_column: &str,
    day: NaiveDate,
    params: &mut SqlParams,
) -> String {
    let (start, end) = day_bounds(day);
    let rows = ScopeFilter::new(scope).rows(alias, params);
    let window = ScopeFilter::between(&format!("{alias}.{ts_column}"), &start, &end, params);
    format!("{rows} AND {window}")
}

/// Leads carry no property column: the row filter is tenant-only and the
/// property scope comes from the attribution fragment.
fn lead_day_rows(scope: &RollupScope, day: NaiveDate, params: &mut SqlParams) -> String {
    let (start, end) = day_bounds(day);
    let tenant = ScopeFilter::new(scope).tenant("l", params);
    let window = ScopeFilter::between("l.first_captured_at", &start, &end, params);
    format!("{tenant} AND {window}")
}

fn query_traffic_totals(conn: &Connection, scope: &RollupScope, day: NaiveDate) -> Result<TrafficTotals> {
    let mut params = SqlParams::new();
    let (day_start, _) = day_bounds(day);
    let returning_before = params.bind(day_start);
    let filter = day_rows(scope, "e", "occurred_at", day, &mut params);
    let sql = format!(
        "SELECT
            COUNT(DISTINCT e.visitor_id),
            COUNT(DISTINCT CASE WHEN v.first_seen_at < CAST({returning_before} AS TIMESTAMP) THEN e.visitor_id END),
            COUNT(*) FILTER (WHERE e.event_type = 'page_view'),
            COUNT(*) FILTER (WHERE e.is_entrance),
            COUNT(*) FILTER (WHERE e.is_exit),
            COUNT(*) FILTER (WHERE e.is_conversion)
         FROM events e
         LEFT JOIN visitors v ON v.id = e.visitor_id
         WHERE {filter}"
    );
    let mut stmt = conn.prepare(&sql)?;
    let totals = stmt.query_row(params.as_refs().as_slice(), |row| {
        Ok(TrafficTotals {
            unique_visitors: column_integer(row, 0)?,
            returning_visitors: column_integer(row, 1)?,
            page_views: column_integer(row, 2)?,
            entrances: column_integer(row, 3)?,
            exits: column_integer(row, 4)?,
            conversions: column_integer(row, 5)?,
        })
    })?;
    Ok(totals)
}

fn query_form_counts(conn: &Connection, scope: &RollupScope, day: NaiveDate) -> Result<FormCounts> {
    let mut params = SqlParams::new();
    let filter = day_rows(scope, "e", "occurred_at", day, &mut params);
    let sql = format!(
        "SELECT
            COUNT(*) FILTER (WHERE e.event_type = 'form_start'),
            COUNT(*) FILTER (WHERE e.event_type = 'form_submit')
         FROM events e
         WHERE {filter}"
    );
    let mut stmt = conn.prepare(&sql)?;
    let counts = stmt.query_row(params.as_refs().as_slice(), |row| {
        Ok(FormCounts {
            starts: column_integer(row, 0)?,
            submits: column_integer(row, 1)?,
        })
    })?;
    Ok(counts)
}

/// Leads whose first capture falls on `day`. For a property scope a lead
/// counts when any linked visitor had an event on the property at or before
/// that first capture.
fn query_new_leads(conn: &Connection, scope: &RollupScope, day: NaiveDate) -> Result<i64> {
    let mut params = SqlParams::new();
    let filter = lead_day_rows(scope, day, &mut params);
    let attribution = ScopeFilter::new(scope).lead_attribution("l", &mut params);
    let sql = format!("SELECT COUNT(*) FROM leads l WHERE {filter}{attribution}");
    let mut stmt = conn.prepare(&sql)?;
    let count = stmt.query_row(params.as_refs().as_slice(), |row| column_integer(row, 0))?;
    Ok(count)
}

/// Per lead first captured on `day`: capture time minus the earliest
/// `first_seen_at` over all linked visitors, floored at zero. Leads without
/// any linked visitor are left out of both sum and count.
fn query_first_capture_timing(
    conn: &Connection,
    scope: &RollupScope,
    day: NaiveDate,
) -> Result<FirstCaptureTiming> {
    let mut params = SqlParams::new();
    let filter = lead_day_rows(scope, day, &mut params);
    let attribution = ScopeFilter::new(scope).lead_attribution("l", &mut params);
    let sql = format!(
        "WITH earliest AS (
            SELECT l.id, l.first_captured_at, MIN(v.first_seen_at) AS first_seen_at
            FROM leads l
            LEFT JOIN lead_identities li ON li.lead_id = l.id
            LEFT JOIN visitors v ON v.id = li.visitor_id
            WHERE {filter}{attribution}
            GROUP BY l.id, l.first_captured_at
         )
         SELECT
            CAST(COALESCE(SUM(GREATEST(date_diff('millisecond', first_seen_at, first_captured_at), 0)), 0) AS BIGINT),
            COUNT(*)
         FROM earliest
         WHERE first_seen_at IS NOT NULL"
    );
    let mut stmt = conn.prepare(&sql)?;
    let timing = stmt.query_row(params.as_refs().as_slice(), |row| {
        Ok(FirstCaptureTiming {
            sum_ms: column_integer(row, 0)?,
            count: column_integer(row, 1)?,
        })
    })?;
    Ok(timing)
}

fn query_traffic_sources(
    conn: &Connection,
    scope: &RollupScope,
    day: NaiveDate,
) -> Result<BTreeMap<String, i64>> {
    let mut params = SqlParams::new();
    let filter = day_rows(scope, "e", "occurred_at", day, &mut params);
    let sql = format!(
        "SELECT e.traffic_source, COUNT(*)
         FROM events e
         WHERE {filter}
         GROUP BY e.traffic_source"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params.as_refs().as_slice(), |row| {
        Ok((row.get::<_, String>(0)?, column_integer(row, 1)?))
    })?;
    let mut sources = BTreeMap::new();
    for row in rows {
        let (source, count) = row?;
        sources.insert(source, count);
    }
    Ok(sources)
}

/// Entrances per path, and the converting sessions whose earliest entrance
/// was that path. A session is credited once however many times it
/// converts, so the rate never exceeds 1. Ranked by entrances, then
/// conversions, then path.
fn query_top_landing_paths(
    conn: &Connection,
    scope: &RollupScope,
    day: NaiveDate,
) -> Result<Vec<LandingPath>> {
    let mut params = SqlParams::new();
    let filter = day_rows(scope, "e", "occurred_at", day, &mut params);
    let sql = format!(
        "WITH scoped AS (
            SELECT e.session_id, e.path, e.occurred_at, e.is_entrance, e.is_conversion
            FROM events e
            WHERE {filter}
         ),
         entries AS (
            SELECT path, COUNT(*) AS entrances
            FROM scoped
            WHERE is_entrance
            GROUP BY path
         ),
         first_entry AS (
            SELECT session_id, arg_min(path, occurred_at) AS path
            FROM scoped
            WHERE is_entrance
            GROUP BY session_id
         ),
         converted AS (
            SELECT DISTINCT session_id
            FROM scoped
            WHERE is_conversion
         ),
         credited AS (
            SELECT fe.path, COUNT(*) AS conversions
            FROM first_entry fe
            JOIN converted c ON c.session_id = fe.session_id
            GROUP BY fe.path
         )
         SELECT
            en.path,
            CAST(en.entrances AS BIGINT) AS entrances,
            CAST(COALESCE(cr.conversions, 0) AS BIGINT) AS conversions
         FROM entries en
         LEFT JOIN credited cr ON cr.path = en.path
         ORDER BY entrances DESC, conversions DESC, en.path ASC
         LIMIT {TOP_LANDING_PATHS}"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params.as_refs().as_slice(), |row| {
        Ok(LandingPath::new(
            row.get::<_, String>(0)?,
            column_integer(row, 1)?,
            column_integer(row, 2)?,
        ))
    })?;
    let paths = rows.collect::<duckdb::Result<Vec<_>>>()?;
    Ok(rank_landing_paths(paths))
}

fn query_accepted_events(conn: &Connection, scope: &RollupScope, day: NaiveDate) -> Result<i64> {
    let mut params = SqlParams::new();
    let filter = day_rows(scope, "e", "occurred_at", day, &mut params);
    let sql = format!("SELECT COUNT(*) FROM events e WHERE {filter}");
    let mut stmt = conn.prepare(&sql)?;
    let count = stmt.query_row(params.as_refs().as_slice(), |row| column_integer(row, 0))?;
    Ok(count)
}

/// Accepted form submissions. Rejected submissions are counted from the
/// rejection log, which every rejected capture also writes to.
fn query_accepted_leads(conn: &Connection, scope: &RollupScope, day: NaiveDate) -> Result<i64> {
    let mut params = SqlParams::new();
    let filter = day_rows(scope, "fs", "submitted_at", day, &mut params);
    let sql = format!(
        "SELECT COUNT(*)
         FROM form_submissions fs
         WHERE {filter} AND fs.validation_status = 'accepted'"
    );
    let mut stmt = conn.prepare(&sql)?;
    let count = stmt.query_row(params.as_refs().as_slice(), |row| column_integer(row, 0))?;
    Ok(count)
}

/// Continuous 95th percentile of the `ttfbMs` prop; NULL when no event of
/// the day carries one.
fn query_p95_ttfb(conn: &Connection, scope: &RollupScope, day: NaiveDate) -> Result<Option<f64>> {
    let mut params = SqlParams::new();
    let filter = day_rows(scope, "e", "occurred_at", day, &mut params);
    let sql = format!(
        "SELECT quantile_cont(TRY_CAST(json_extract_string(e.props, '$.ttfbMs') AS DOUBLE), 0.95)
         FROM events e
         WHERE {filter}"
    );
    let mut stmt = conn.prepare(&sql)?;
    let p95 = stmt.query_row(params.as_refs().as_slice(), |row| column_float(row, 0))?;
    Ok(p95)
}

fn query_rejections(conn: &Connection, scope: &RollupScope, day: NaiveDate) -> Result<RejectionCounts> {
    let mut params = SqlParams::new();
    let filter = day_rows(scope, "r", "occurred_at", day, &mut params);
    let sql = format!(
        "SELECT r.endpoint, r.reason, COUNT(*)
         FROM ingest_rejections r
         WHERE {filter}
         GROUP BY r.endpoint, r.reason"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params.as_refs().as_slice(), |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            column_integer(row, 2)?,
        ))
    })?;
    let mut counts = RejectionCounts::default();
    for row in rows {
        let (endpoint, reason, count) = row?;
        match endpoint.as_str() {
            EVENTS_ENDPOINT => counts.events += count,
            LEAD_CAPTURE_ENDPOINT => counts.leads += count,
            _ => {}
        }
        *counts.by_reason.entry(reason).or_insert(0) += count;
    }
    Ok(counts)
}

impl DuckDbBackend {
    async fn traffic_totals(&self, scope: &RollupScope, day: NaiveDate) -> Result<TrafficTotals> {
        let conn = self.conn.lock().await;
        query_traffic_totals(&conn, scope, day)
    }

    async fn form_counts(&self, scope: &RollupScope, day: NaiveDate) -> Result<FormCounts> {
        let conn = self.conn.lock().await;
        query_form_counts(&conn, scope, day)
    }

    async fn new_leads(&self, scope: &RollupScope, day: NaiveDate) -> Result<i64> {
        let conn = self.conn.lock().await;
        query_new_leads(&conn, scope, day)
    }

    async fn first_capture_timing(
        &self,
        scope: &RollupScope,
        day: NaiveDate,
    ) -> Result<FirstCaptureTiming> {
        let conn = self.conn.lock().await;
        query_first_capture_timing(&conn, scope, day)
    }

    async fn traffic_sources(
        &self,
        scope: &RollupScope,
        day: NaiveDate,
    ) -> Result<BTreeMap<String, i64>> {
        let conn = self.conn.lock().await;
        query_traffic_sources(&conn, scope, day)
    }

    async fn top_landing_paths(&self, scope: &RollupScope, day: NaiveDate) -> Result<Vec<LandingPath>> {
        let conn = self.conn.lock().await;
        query_top_landing_paths(&conn, scope, day)
    }

    async fn accepted_events(&self, scope: &RollupScope, day: NaiveDate) -> Result<i64> {
        let conn = self.conn.lock().await;
        query_accepted_events(&conn, scope, day)
    }

    async fn accepted_leads(&self, scope: &RollupScope, day: NaiveDate) -> Result<i64> {
        let conn = self.conn.lock().await;
        query_accepted_leads(&conn, scope, day)
    }

    async fn p95_ttfb(&self, scope: &RollupScope, day: NaiveDate) -> Result<Option<f64>> {
        let conn = self.conn.lock().await;
        query_p95_ttfb(&conn, scope, day)
    }

    async fn rejections(&self, scope: &RollupScope, day: NaiveDate) -> Result<RejectionCounts> {
        let conn = self.conn.lock().await;
        query_rejections(&conn, scope, day)
    }

    /// Compute both rollup rows for one day without writing them.
    pub async fn compute_daily_rollup(
        &self,
        scope: &RollupScope,
        day: NaiveDate,
    ) -> Result<(DailyMetricRollup, DailyIngestRollup)> {
        let (
            traffic,
            forms,
            new_leads,
            timing,
            sources,
            landing_paths,
            accepted_events,
            accepted_leads,
            p95_ttfb_ms,
            rejections,
        ) = tokio::try_join!(
            self.traffic_totals(scope, day),
            self.form_counts(scope, day),
            self.new_leads(scope, day),
            self.first_capture_timing(scope, day),
            self.traffic_sources(scope, day),
            self.top_landing_paths(scope, day),
            self.accepted_events(scope, day),
            self.accepted_leads(scope, day),
            self.p95_ttfb(scope, day),
            self.rejections(scope, day),
        )?;

        let metrics = DailyMetricRollup {
            unique_visitors: traffic.unique_visitors,
            returning_visitors: traffic.returning_visitors,
            page_views: traffic.page_views,
            entrances: traffic.entrances,
            exits: traffic.exits,
            conversions: traffic.conversions,
            form_starts: forms.starts,
            form_submits: forms.submits,
            new_leads,
            time_to_first_capture_sum_ms: timing.sum_ms,
            time_to_first_capture_count: timing.count,
            traffic_sources: sources,
            top_landing_paths: landing_paths,
        };
        let ingest = DailyIngestRollup {
            accepted_events,
            rejected_events: rejections.events,
            accepted_leads,
            rejected_leads: rejections.leads,
            p95_ttfb_ms,
            error_breakdown: rejections.by_reason,
        };
        Ok((metrics, ingest))
    }

    /// Write both rollup rows for `key`, overwriting every derived column and
    /// refreshing `generated_at`. Re-running for the same key replaces the
    /// previous values.
    pub async fn upsert_daily_rollup(
        &self,
        key: &RollupKey,
        metrics: &DailyMetricRollup,
        ingest: &DailyIngestRollup,
    ) -> Result<()> {
        let traffic_sources = serde_json::to_string(&metrics.traffic_sources)?;
        let top_landing_paths = serde_json::to_string(&metrics.top_landing_paths)?;
        let error_breakdown = serde_json::to_string(&ingest.error_breakdown)?;
        let day = format_day(key.day);
        let generated_at = format_ts(Utc::now());

        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO daily_metric_rollups (
                tenant_id, property_id, day,
                unique_visitors, returning_visitors, page_views, entrances, exits, conversions,
                form_starts, form_submits, new_leads,
                time_to_first_capture_sum_ms, time_to_first_capture_count,
                traffic_sources, top_landing_paths, generated_at
            ) VALUES (
                ?1, ?2, CAST(?3 AS DATE),
                ?4, ?5, ?6, ?7, ?8, ?9,
                ?10, ?11, ?12,
                ?13, ?14,
                ?15, ?16, CAST(?17 AS TIMESTAMP)
            )
            ON CONFLICT (tenant_id, property_id, day) DO UPDATE SET
                unique_visitors = EXCLUDED.unique_visitors,
                returning_visitors = EXCLUDED.returning_visitors,
                page_views = EXCLUDED.page_views,
                entrances = EXCLUDED.entrances,
                exits = EXCLUDED.exits,
                conversions = EXCLUDED.conversions,
                form_starts = EXCLUDED.form_starts,
                form_submits = EXCLUDED.form_submits,
                new_leads = EXCLUDED.new_leads,
                time_to_first_capture_sum_ms = EXCLUDED.time_to_first_capture_sum_ms,
                time_to_first_capture_count = EXCLUDED.time_to_first_capture_count,
                traffic_sources = EXCLUDED.traffic_sources,
                top_landing_paths = EXCLUDED.top_landing_paths,
                generated_at = EXCLUDED.generated_at",
            duckdb::params![
                key.scope.tenant_id,
                key.scope.property_id,
                day,
                metrics.unique_visitors,
                metrics.returning_visitors,
                metrics.page_views,
                metrics.entrances,
                metrics.exits,
                metrics.conversions,
                metrics.form_starts,
                metrics.form_submits,
                metrics.new_leads,
                metrics.time_to_first_capture_sum_ms,
                metrics.time_to_first_capture_count,
                traffic_sources,
                top_landing_paths,
                generated_at,
            ],
        )?;
        tx.execute(
            "INSERT INTO daily_ingest_rollups (
                tenant_id, property_id, day,
                accepted_events, rejected_events, accepted_leads, rejected_leads,
                p95_ttfb_ms, error_breakdown, generated_at
            ) VALUES (
                ?1, ?2, CAST(?3 AS DATE),
                ?4, ?5, ?6, ?7,
                ?8, ?9, CAST(?10 AS TIMESTAMP)
            )
            ON CONFLICT (tenant_id, property_id, day) DO UPDATE SET
                accepted_events = EXCLUDED.accepted_events,
                rejected_events = EXCLUDED.rejected_events,
                accepted_leads = EXCLUDED.accepted_leads,
                rejected_leads = EXCLUDED.rejected_leads,
                p95_ttfb_ms = EXCLUDED.p95_ttfb_ms,
                error_breakdown = EXCLUDED.error_breakdown,
                generated_at = EXCLUDED.generated_at",
            duckdb::params![
                key.scope.tenant_id,
                key.scope.property_id,
                day,
                ingest.accepted_events,
                ingest.rejected_events,
                ingest.accepted_leads,
                ingest.rejected_leads,
                ingest.p95_ttfb_ms,
                error_breakdown,
                generated_at,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Compute and store the rollup for one day.
    pub async fn rollup_day(&self, scope: &RollupScope, day: NaiveDate) -> Result<()> {
        let (metrics, ingest) = self.compute_daily_rollup(scope, day).await?;
        let key = RollupKey {
            scope: scope.clone(),
            day,
        };
        self.upsert_daily_rollup(&key, &metrics, &ingest).await?;
        debug!(
            tenant_id = %scope.tenant_id,
            property_id = %scope.property_id,
            day = %day,
            unique_visitors = metrics.unique_visitors,
            accepted_events = ingest.accepted_events,
            "daily rollup written"
        );
        Ok(())
    }

    /// Roll up every UTC day of `range` for `scope`. Days of one batch run
    /// concurrently; the next batch starts only after the whole batch has
    /// been written. The first failing day aborts the run.
    #[tracing::instrument(skip(self), fields(tenant_id = %scope.tenant_id, property_id = %scope.property_id))]
    pub async fn run_rollups(
        self: &Arc<Self>,
        scope: &RollupScope,
        range: DayRange,
        batch_size: usize,
    ) -> Result<RollupRunReport> {
        let batches = plan_batches(&range.days(), batch_size);
        let mut days = 0;
        for batch in &batches {
            let mut set = JoinSet::new();
            for &day in batch {
                let db = Arc::clone(self);
                let scope = scope.clone();
                set.spawn(async move { db.rollup_day(&scope, day).await });
            }
            while let Some(joined) = set.join_next().await {
                joined??;
                days += 1;
            }
        }
        info!(
            start = %range.start,
            end = %range.end,
            days,
            batches = batches.len(),
            "rollups complete"
        );
        Ok(RollupRunReport {
            scope: scope.clone(),
            days,
            batches: batches.len(),
        })
    }

    /// Every scope with events in `range`: each (tenant, property) pair seen,
    /// plus the tenant-wide scope of each tenant.
    pub async fn list_rollup_scopes(
        &self,
        range: DayRange,
        default_property_id: &str,
    ) -> Result<Vec<RollupScope>> {
        let (start, _) = day_bounds(range.start);
        let (_, end) = day_bounds(range.end);
        let pairs = {
            let conn = self.conn.lock().await;
            let mut stmt = conn.prepare(
                "SELECT DISTINCT tenant_id, property_id
                 FROM events
                 WHERE occurred_at >= CAST(?1 AS TIMESTAMP) AND occurred_at < CAST(?2 AS TIMESTAMP)
                 ORDER BY tenant_id, property_id",
            )?;
            let rows = stmt.query_map(duckdb::params![start, end], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            rows.collect::<duckdb::Result<Vec<_>>>()?
        };
        Ok(scopes_from_pairs(pairs, default_property_id))
    }

    /// Days already rolled up for `scope`, ascending.
    pub async fn rolled_up_days(&self, scope: &RollupScope) -> Result<Vec<NaiveDate>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT CAST(day AS VARCHAR) FROM daily_metric_rollups
             WHERE tenant_id = ?1 AND property_id = ?2
             ORDER BY day",
        )?;
        let rows = stmt.query_map(
            duckdb::params![scope.tenant_id, scope.property_id],
            |row| row.get::<_, String>(0),
        )?;
        let mut days = Vec::new();
        for raw in rows {
            if let Some(day) = parse_day(&raw?) {
                days.push(day);
            }
        }
        Ok(days)
    }
}

fn scopes_from_pairs(pairs: Vec<(String, String)>, default_property_id: &str) -> Vec<RollupScope> {
    let mut scopes: Vec<RollupScope> = Vec::new();
    for (tenant_id, property_id) in pairs {
        let tenant_wide = RollupScope::tenant_wide(&tenant_id, default_property_id);
        if !scopes.contains(&tenant_wide) {
            scopes.push(tenant_wide);
        }
        let scope = RollupScope::new(&tenant_id, &property_id, default_property_id);
        if !scopes.contains(&scope) {
            scopes.push(scope);
        }
    }
    scopes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_tenant_gets_its_tenant_wide_scope_once() {
        let scopes = scopes_from_pairs(
            vec![
                ("t1".into(), "default".into()),
                ("t1".into(), "site-a".into()),
                ("t2".into(), "site-b".into()),
            ],
            "default",
        );
        let keys: Vec<(&str, &str, bool)> = scopes
            .iter()
            .map(|s| (s.tenant_id.as_str(), s.property_id.as_str(), s.property_scoped))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("t1", "default", false),
                ("t1", "site-a", true),
                ("t2", "default", false),
                ("t2", "site-b", true),
            ]
        );
    }

    #[test]
    fn day_rows_bind_tenant_property_and_window() {
        let scope = RollupScope::new("t1", "site-a", "default");
        let mut params = SqlParams::new();
        let sql = day_rows(
            &scope,
            "e",
            "occurred_at",
            NaiveDate::from_ymd_opt(2026, 1, 10).expect("date"),
            &mut params,
        );
        assert_eq!(
            sql,
            "e.tenant_id = ?1 AND e.property_id = ?2 AND e.occurred_at >= CAST(?3 AS TIMESTAMP) AND e.occurred_at < CAST(?4 AS TIMESTAMP)"
        );
        assert_eq!(params.len(), 4);
    }
}
