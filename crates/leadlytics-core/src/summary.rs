//! Dashboard summary shapes and the window aggregation behind them.

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::classify::TrafficSource;
use crate::rollup::{rank_landing_paths, DayRange, LandingPath, RollupDay, RollupFreshness};

/// Where the rows behind a summary came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackingMode {
    Live,
    Materialized,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryRequest {
    pub tenant_id: String,
    pub property_id: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// Compare against the preceding window of equal length.
    pub compare: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowBounds {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl From<DayRange> for WindowBounds {
    fn from(range: DayRange) -> Self {
        Self {
            start: range.start,
            end: range.end,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricValue<V = f64> {
    pub value: V,
    pub previous: Option<f64>,
    /// `(current - previous) / previous`; `None` without a comparison window
    /// or when the previous value is zero.
    pub delta: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryMetrics {
    pub unique_visitors: MetricValue,
    pub returning_visitors: MetricValue,
    pub page_views: MetricValue,
    pub entrances: MetricValue,
    pub exits: MetricValue,
    pub conversions: MetricValue,
    pub form_starts: MetricValue,
    pub form_submits: MetricValue,
    pub new_leads: MetricValue,
    pub accepted_events: MetricValue,
    pub rejected_events: MetricValue,
    pub accepted_leads: MetricValue,
    pub rejected_leads: MetricValue,
    /// 0–100.
    pub returning_visitor_pct: MetricValue,
    /// Fraction of unique visitors that became new leads.
    pub lead_capture_rate: MetricValue,
    /// Fraction of form starts that were submitted.
    pub form_completion_rate: MetricValue,
    /// Fraction of entrances that converted.
    pub landing_conversion_rate: MetricValue,
    /// 0–100.
    pub ingest_success_pct: MetricValue,
    pub avg_time_to_first_capture_hours: MetricValue,
    /// Accepted-event-weighted mean of the daily p95 values. This is an
    /// approximation: a percentile of the raw samples is not recomputed.
    pub p95_ttfb_ms: MetricValue<Option<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendPoint {
    pub date: NaiveDate,
    pub unique_visitors: i64,
    pub page_views: i64,
    pub conversions: i64,
    pub new_leads: i64,
    pub accepted_events: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub tenant_id: String,
    pub property_id: String,
    pub window: WindowBounds,
    pub compare_to: Option<WindowBounds>,
    pub metrics: SummaryMetrics,
    pub trend: Vec<TrendPoint>,
    pub traffic_source_mix: BTreeMap<TrafficSource, f64>,
    pub top_landing_paths: Vec<LandingPath>,
    pub error_breakdown: BTreeMap<String, i64>,
    pub freshness: RollupFreshness,
    pub backing_mode: BackingMode,
}

/// Every count in a window summed across days.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WindowTotals {
    pub unique_visitors: i64,
    pub returning_visitors: i64,
    pub page_views: i64,
    pub entrances: i64,
    pub exits: i64,
    pub conversions: i64,
    pub form_starts: i64,
    pub form_submits: i64,
    pub new_leads: i64,
    pub time_to_first_capture_sum_ms: i64,
    pub time_to_first_capture_count: i64,
    pub accepted_events: i64,
    pub rejected_events: i64,
    pub accepted_leads: i64,
    pub rejected_leads: i64,
    pub p95_ttfb_ms: Option<f64>,
    pub traffic_sources: BTreeMap<String, i64>,
    /// path → (entrances, conversions)
    pub landing_paths: BTreeMap<String, (i64, i64)>,
    pub error_breakdown: BTreeMap<String, i64>,
}

pub fn safe_ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

pub fn delta(current: f64, baseline: f64) -> Option<f64> {
    if baseline == 0.0 {
        None
    } else {
        Some((current - baseline) / baseline)
    }
}

/// Weighted mean of daily p95 values, weight = accepted events that day.
/// Days with no accepted events or no p95 are skipped.
pub fn weighted_p95(days: &[RollupDay]) -> Option<f64> {
    let (weighted_sum, weight) = days
        .iter()
        .filter_map(|d| match d.ingest.p95_ttfb_ms {
            Some(p95) if d.ingest.accepted_events > 0 => {
                Some((p95 * d.ingest.accepted_events as f64, d.ingest.accepted_events))
            }
            _ => None,
        })
        .fold((0.0, 0_i64), |(sum, w), (x, n)| (sum + x, w + n));
    if weight == 0 {
        None
    } else {
        Some(weighted_sum / weight as f64)
    }
}

fn merge_counts(into: &mut BTreeMap<String, i64>, from: &BTreeMap<String, i64>) {
    for (key, count) in from {
        *into.entry(key.clone()).or_default() += count;
    }
}

pub fn aggregate_window(days: &[RollupDay]) -> WindowTotals {
    let mut totals = WindowTotals::default();
    for day in days {
        let m = &day.metrics;
        let i = &day.ingest;
        totals.unique_visitors += m.unique_visitors;
        totals.returning_visitors += m.returning_visitors;
        totals.page_views += m.page_views;
        totals.entrances += m.entrances;
        totals.exits += m.exits;
        totals.conversions += m.conversions;
        totals.form_starts += m.form_starts;
        totals.form_submits += m.form_submits;
        totals.new_leads += m.new_leads;
        totals.time_to_first_capture_sum_ms += m.time_to_first_capture_sum_ms;
        totals.time_to_first_capture_count += m.time_to_first_capture_count;
        totals.accepted_events += i.accepted_events;
        totals.rejected_events += i.rejected_events;
        totals.accepted_leads += i.accepted_leads;
        totals.rejected_leads += i.rejected_leads;

        merge_counts(&mut totals.traffic_sources, &m.traffic_sources);
        merge_counts(&mut totals.error_breakdown, &i.error_breakdown);
        for path in &m.top_landing_paths {
            let entry = totals.landing_paths.entry(path.path.clone()).or_default();
            entry.0 += path.entrances;
            entry.1 += path.conversions;
        }
    }
    totals.p95_ttfb_ms = weighted_p95(days);
    totals
}

const MS_PER_HOUR: f64 = 3_600_000.0;

/// Derived values of a window, keyed in the order they appear in
/// [`SummaryMetrics`].
struct DerivedValues {
    returning_visitor_pct: f64,
    lead_capture_rate: f64,
    form_completion_rate: f64,
    landing_conversion_rate: f64,
    ingest_success_pct: f64,
    avg_time_to_first_capture_hours: f64,
}

impl DerivedValues {
    fn of(t: &WindowTotals) -> Self {
        Self {
            returning_visitor_pct: safe_ratio(
                t.returning_visitors as f64,
                t.unique_visitors as f64,
            ) * 100.0,
            lead_capture_rate: safe_ratio(t.new_leads as f64, t.unique_visitors as f64),
            form_completion_rate: safe_ratio(t.form_submits as f64, t.form_starts as f64),
            landing_conversion_rate: safe_ratio(t.conversions as f64, t.entrances as f64),
            ingest_success_pct: safe_ratio(
                t.accepted_events as f64,
                (t.accepted_events + t.rejected_events) as f64,
            ) * 100.0,
            avg_time_to_first_capture_hours: safe_ratio(
                t.time_to_first_capture_sum_ms as f64,
                t.time_to_first_capture_count as f64,
            ) / MS_PER_HOUR,
        }
    }
}

fn metric(current: f64, baseline: Option<f64>) -> MetricValue {
    MetricValue {
        value: current,
        previous: baseline,
        delta: baseline.and_then(|b| delta(current, b)),
    }
}

pub fn derive_metrics(current: &WindowTotals, baseline: Option<&WindowTotals>) -> SummaryMetrics {
    let count = |f: fn(&WindowTotals) -> i64| metric(f(current) as f64, baseline.map(|b| f(b) as f64));

    let cur = DerivedValues::of(current);
    let base = baseline.map(DerivedValues::of);
    let derived =
        |f: fn(&DerivedValues) -> f64| metric(f(&cur), base.as_ref().map(f));

    let p95_baseline = baseline.and_then(|b| b.p95_ttfb_ms);
    let p95_ttfb_ms = MetricValue {
        value: current.p95_ttfb_ms,
        previous: p95_baseline,
        delta: match (current.p95_ttfb_ms, p95_baseline) {
            (Some(c), Some(b)) => delta(c, b),
            _ => None,
        },
    };

    SummaryMetrics {
        unique_visitors: count(|t| t.unique_visitors),
        returning_visitors: count(|t| t.returning_visitors),
        page_views: count(|t| t.page_views),
        entrances: count(|t| t.entrances),
        exits: count(|t| t.exits),
        conversions: count(|t| t.conversions),
        form_starts: count(|t| t.form_starts),
        form_submits: count(|t| t.form_submits),
        new_leads: count(|t| t.new_leads),
        accepted_events: count(|t| t.accepted_events),
        rejected_events: count(|t| t.rejected_events),
        accepted_leads: count(|t| t.accepted_leads),
        rejected_leads: count(|t| t.rejected_leads),
        returning_visitor_pct: derived(|d| d.returning_visitor_pct),
        lead_capture_rate: derived(|d| d.lead_capture_rate),
        form_completion_rate: derived(|d| d.form_completion_rate),
        landing_conversion_rate: derived(|d| d.landing_conversion_rate),
        ingest_success_pct: derived(|d| d.ingest_success_pct),
        avg_time_to_first_capture_hours: derived(|d| d.avg_time_to_first_capture_hours),
        p95_ttfb_ms,
    }
}

/// One point per day of the window, zero-filled where no rollup exists.
pub fn build_trend(range: DayRange, days: &[RollupDay]) -> Vec<TrendPoint> {
    let by_day: HashMap<NaiveDate, &RollupDay> = days.iter().map(|d| (d.day, d)).collect();
    range
        .days()
        .into_iter()
        .map(|date| match by_day.get(&date) {
            Some(d) => TrendPoint {
                date,
                unique_visitors: d.metrics.unique_visitors,
                page_views: d.metrics.page_views,
                conversions: d.metrics.conversions,
                new_leads: d.metrics.new_leads,
                accepted_events: d.ingest.accepted_events,
            },
            None => TrendPoint {
                date,
                unique_visitors: 0,
                page_views: 0,
                conversions: 0,
                new_leads: 0,
                accepted_events: 0,
            },
        })
        .collect()
}

/// Share of each known traffic source. Every category is present; shares
/// sum to 1.0 unless there was no traffic at all.
pub fn traffic_source_mix(sources: &BTreeMap<String, i64>) -> BTreeMap<TrafficSource, f64> {
    let count_of = |s: TrafficSource| sources.get(s.as_str()).copied().unwrap_or(0).max(0);
    let total: i64 = TrafficSource::ALL.into_iter().map(count_of).sum();
    TrafficSource::ALL
        .into_iter()
        .map(|s| (s, safe_ratio(count_of(s) as f64, total as f64)))
        .collect()
}

pub fn merged_landing_paths(totals: &WindowTotals) -> Vec<LandingPath> {
    rank_landing_paths(
        totals
            .landing_paths
            .iter()
            .map(|(path, (entrances, conversions))| {
                LandingPath::new(path.clone(), *entrances, *conversions)
            })
            .collect(),
    )
}

/// Everything a summary needs besides the request echo and freshness.
pub struct WindowInputs<'a> {
    pub range: DayRange,
    pub days: &'a [RollupDay],
    pub comparison: Option<(DayRange, &'a [RollupDay])>,
}

pub fn build_summary(
    request: &SummaryRequest,
    inputs: WindowInputs<'_>,
    freshness: RollupFreshness,
    backing_mode: BackingMode,
) -> Summary {
    let current = aggregate_window(inputs.days);
    let baseline = inputs.comparison.map(|(_, days)| aggregate_window(days));

    Summary {
        tenant_id: request.tenant_id.clone(),
        property_id: request.property_id.clone(),
        window: inputs.range.into(),
        compare_to: inputs.comparison.map(|(range, _)| range.into()),
        metrics: derive_metrics(&current, baseline.as_ref()),
        trend: build_trend(inputs.range, inputs.days),
        traffic_source_mix: traffic_source_mix(&current.traffic_sources),
        top_landing_paths: merged_landing_paths(&current),
        error_breakdown: current.error_breakdown.clone(),
        freshness,
        backing_mode,
    }
}
