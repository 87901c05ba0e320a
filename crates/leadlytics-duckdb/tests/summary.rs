use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;

use leadlytics_core::classify::TrafficSource;
use leadlytics_core::config::Config;
use leadlytics_core::rollup::{DailyIngestRollup, DailyMetricRollup, RollupKey, RollupScope};
use leadlytics_core::service::SummaryService;
use leadlytics_core::summary::{BackingMode, SummaryRequest};
use leadlytics_duckdb::DuckDbBackend;

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 1, d).expect("valid date")
}

async fn store_visitors(db: &DuckDbBackend, tenant_id: &str, d: NaiveDate, unique_visitors: i64) {
    let key = RollupKey {
        scope: RollupScope::tenant_wide(tenant_id, "default"),
        day: d,
    };
    let metrics = DailyMetricRollup {
        unique_visitors,
        page_views: unique_visitors * 2,
        traffic_sources: BTreeMap::from([("direct".to_string(), 10)]),
        ..Default::default()
    };
    let ingest = DailyIngestRollup {
        accepted_events: unique_visitors * 2,
        ..Default::default()
    };
    db.upsert_daily_rollup(&key, &metrics, &ingest)
        .await
        .expect("upsert rollup");
}

async fn seeded() -> Arc<DuckDbBackend> {
    let db = Arc::new(DuckDbBackend::open_in_memory().expect("open"));
    for (d, visitors) in [(10, 100), (11, 120), (12, 80)] {
        store_visitors(&db, "t1", day(d), visitors).await;
    }
    db
}

fn request(tenant_id: &str) -> SummaryRequest {
    SummaryRequest {
        tenant_id: tenant_id.into(),
        property_id: "default".into(),
        start: day(10),
        end: day(12),
        compare: false,
    }
}

fn uncached() -> Config {
    Config {
        summary_cache_ttl_ms: 0,
        ..Config::default()
    }
}

#[tokio::test]
async fn window_sums_every_stored_day() {
    let db = seeded().await;
    let service = SummaryService::new(Arc::clone(&db), &uncached());

    let summary = service.get_summary(&request("t1")).await.expect("summary");
    assert_eq!(summary.trend.len(), 3);
    assert_eq!(summary.trend[1].unique_visitors, 120);
    assert_eq!(summary.metrics.unique_visitors.value, 300.0);
    assert_eq!(summary.metrics.page_views.value, 600.0);
    assert_eq!(summary.backing_mode, BackingMode::Live);
    assert_eq!(summary.freshness.last_rollup_day, Some(day(12)));
}

#[tokio::test]
async fn empty_window_reports_zeros_without_deltas() {
    let db = seeded().await;
    let service = SummaryService::new(Arc::clone(&db), &uncached());

    let mut req = request("t-empty");
    req.compare = true;
    let summary = service.get_summary(&req).await.expect("summary");
    assert_eq!(summary.metrics.unique_visitors.value, 0.0);
    assert_eq!(summary.metrics.unique_visitors.delta, None);
    assert_eq!(summary.metrics.p95_ttfb_ms.value, None);
    assert!(summary.trend.iter().all(|p| p.unique_visitors == 0));
    assert_eq!(summary.freshness.last_rollup_day, None);
    assert_eq!(summary.freshness.lag_days, None);
}

#[tokio::test]
async fn cached_summary_survives_a_rollup_until_invalidated() {
    let db = seeded().await;
    let service = SummaryService::new(Arc::clone(&db), &Config::default());

    let before = service.get_summary(&request("t1")).await.expect("summary");
    store_visitors(&db, "t1", day(12), 180).await;
    let cached = service.get_summary(&request("t1")).await.expect("summary");
    assert_eq!(before.metrics.unique_visitors.value, 300.0);
    assert_eq!(cached.metrics.unique_visitors.value, 300.0);

    service.invalidate();
    let fresh = service.get_summary(&request("t1")).await.expect("summary");
    assert_eq!(fresh.metrics.unique_visitors.value, 400.0);
}

#[tokio::test]
async fn disabled_cache_always_reads_through() {
    let db = seeded().await;
    let service = SummaryService::new(Arc::clone(&db), &uncached());

    service.get_summary(&request("t1")).await.expect("summary");
    store_visitors(&db, "t1", day(12), 180).await;
    let fresh = service.get_summary(&request("t1")).await.expect("summary");
    assert_eq!(fresh.metrics.unique_visitors.value, 400.0);
}

#[tokio::test]
async fn missing_view_falls_back_until_it_is_built() {
    let db = seeded().await;
    let config = Config {
        materialized_view_enabled: true,
        ..uncached()
    };
    let service = SummaryService::new(Arc::clone(&db), &config);

    assert!(!db.materialized_view_exists().await.expect("exists"));
    let live = service.get_summary(&request("t1")).await.expect("summary");
    assert_eq!(live.backing_mode, BackingMode::Live);
    assert_eq!(live.metrics.unique_visitors.value, 300.0);

    db.create_materialized_view().await.expect("create");
    db.refresh_materialized_view().await.expect("refresh");
    let viewed = service.get_summary(&request("t1")).await.expect("summary");
    assert_eq!(viewed.backing_mode, BackingMode::Materialized);
    assert_eq!(viewed.metrics.unique_visitors.value, 300.0);

    // The view only changes on refresh.
    store_visitors(&db, "t1", day(12), 180).await;
    let stale = service.get_summary(&request("t1")).await.expect("summary");
    assert_eq!(stale.metrics.unique_visitors.value, 300.0);
    db.refresh_materialized_view().await.expect("refresh again");
    let refreshed = service.get_summary(&request("t1")).await.expect("summary");
    assert_eq!(refreshed.metrics.unique_visitors.value, 400.0);
}

#[tokio::test]
async fn traffic_mix_covers_every_source() {
    let db = seeded().await;
    let service = SummaryService::new(Arc::clone(&db), &uncached());

    let summary = service.get_summary(&request("t1")).await.expect("summary");
    let mix = &summary.traffic_source_mix;
    assert_eq!(mix.len(), TrafficSource::ALL.len());
    assert_eq!(mix.get(&TrafficSource::Direct), Some(&1.0));
    let total: f64 = mix.values().sum();
    assert!((total - 1.0).abs() < 1e-9);
}

#[tokio::test]
async fn freshness_tracks_the_latest_rolled_up_day() {
    let db = seeded().await;
    let freshness = db
        .rollup_freshness_at(&RollupScope::tenant_wide("t1", "default"), day(14))
        .await
        .expect("freshness");
    assert_eq!(freshness.last_rollup_day, Some(day(12)));
    assert_eq!(freshness.lag_days, Some(2));
    assert!(freshness.generated_at.is_some());
}
