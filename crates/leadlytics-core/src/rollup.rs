//! Daily rollup rows and the date planning around them.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Landing paths kept per day (and per summary window).
pub const TOP_LANDING_PATHS: usize = 10;

/// Which slice of a tenant a rollup covers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RollupScope {
    pub tenant_id: String,
    pub property_id: String,
    /// `true` when `property_id` is a real property; `false` when it is the
    /// tenant-wide default and queries must not filter by property.
    pub property_scoped: bool,
}

impl RollupScope {
    pub fn new(tenant_id: &str, property_id: &str, default_property_id: &str) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            property_id: property_id.to_string(),
            property_scoped: property_id != default_property_id,
        }
    }

    pub fn tenant_wide(tenant_id: &str, default_property_id: &str) -> Self {
        Self::new(tenant_id, default_property_id, default_property_id)
    }
}

/// Upsert key of both rollup tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollupKey {
    pub scope: RollupScope,
    pub day: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LandingPath {
    pub path: String,
    pub entrances: i64,
    pub conversions: i64,
    pub conversion_rate: f64,
}

impl LandingPath {
    pub fn new(path: String, entrances: i64, conversions: i64) -> Self {
        let conversion_rate = if entrances == 0 {
            0.0
        } else {
            conversions as f64 / entrances as f64
        };
        Self {
            path,
            entrances,
            conversions,
            conversion_rate,
        }
    }
}

/// Order by entrances desc, conversions desc, path asc, and keep the top ten.
pub fn rank_landing_paths(mut paths: Vec<LandingPath>) -> Vec<LandingPath> {
    paths.sort_by(|a, b| {
        b.entrances
            .cmp(&a.entrances)
            .then_with(|| b.conversions.cmp(&a.conversions))
            .then_with(|| a.path.cmp(&b.path))
    });
    paths.truncate(TOP_LANDING_PATHS);
    paths
}

/// Traffic, engagement and lead metrics for one (tenant, property, day).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DailyMetricRollup {
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
    pub traffic_sources: BTreeMap<String, i64>,
    pub top_landing_paths: Vec<LandingPath>,
}

/// Ingestion health for one (tenant, property, day).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DailyIngestRollup {
    pub accepted_events: i64,
    pub rejected_events: i64,
    pub accepted_leads: i64,
    pub rejected_leads: i64,
    pub p95_ttfb_ms: Option<f64>,
    pub error_breakdown: BTreeMap<String, i64>,
}

/// One day as read back for summaries: both rollup tables joined.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RollupDay {
    pub day: NaiveDate,
    pub metrics: DailyMetricRollup,
    pub ingest: DailyIngestRollup,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollupFreshness {
    pub last_rollup_day: Option<NaiveDate>,
    pub generated_at: Option<DateTime<Utc>>,
    pub lag_days: Option<i64>,
}

impl RollupFreshness {
    pub fn from_latest(
        latest: Option<(NaiveDate, DateTime<Utc>)>,
        today: NaiveDate,
    ) -> Self {
        match latest {
            Some((day, generated_at)) => Self {
                last_rollup_day: Some(day),
                generated_at: Some(generated_at),
                lag_days: Some((today - day).num_days()),
            },
            None => Self::default(),
        }
    }
}

/// Inclusive UTC day range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DayRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, CoreError> {
        if start > end {
            return Err(CoreError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// Normalize both bounds to their UTC day.
    pub fn from_instants(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, CoreError> {
        Self::new(start.date_naive(), end.date_naive())
    }

    pub fn num_days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    pub fn days(&self) -> Vec<NaiveDate> {
        self.start.iter_days().take_while(|d| *d <= self.end).collect()
    }

    /// The window of equal length that ends the day before this one starts.
    pub fn previous(&self) -> Self {
        let end = self.start - chrono::Duration::days(1);
        let start = end - chrono::Duration::days(self.num_days() - 1);
        Self { start, end }
    }
}

/// Split days into sequential batches of at most `batch_size`.
pub fn plan_batches(days: &[NaiveDate], batch_size: usize) -> Vec<Vec<NaiveDate>> {
    days.chunks(batch_size.max(1)).map(<[NaiveDate]>::to_vec).collect()
}

/// Half-open `[day 00:00, next day 00:00)` bounds formatted for SQL binding.
pub fn day_bounds(day: NaiveDate) -> (String, String) {
    let next = day + chrono::Duration::days(1);
    (
        format!("{} 00:00:00", day.format("%Y-%m-%d")),
        format!("{} 00:00:00", next.format("%Y-%m-%d")),
    )
}
