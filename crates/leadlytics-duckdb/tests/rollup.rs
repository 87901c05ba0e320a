use std::sync::Arc;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};

use leadlytics_core::event::{EventBody, EventType, RequestContext, TrafficHints};
use leadlytics_core::identity::{LeadCaptureRequest, NullConsentApplier};
use leadlytics_core::rollup::{DayRange, RollupDay, RollupScope};
use leadlytics_duckdb::{DuckDbBackend, EVENTS_ENDPOINT, LEAD_CAPTURE_ENDPOINT};

fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, day, hour, minute, 0)
        .single()
        .expect("valid timestamp")
}

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 1, d).expect("valid date")
}

fn context(ip: &str, ua: &str) -> RequestContext {
    RequestContext {
        ip_hash: ip.into(),
        ua_hash: ua.into(),
        host: "example.com".into(),
        user_agent: "Mozilla/5.0 (X11; Linux x86_64)".into(),
    }
}

fn event(
    anon_id: &str,
    property_id: &str,
    event_type: EventType,
    path: &str,
    occurred_at: DateTime<Utc>,
) -> EventBody {
    EventBody {
        tenant_id: "t1".into(),
        property_id: Some(property_id.into()),
        anon_id: anon_id.into(),
        event_type,
        path: path.into(),
        occurred_at: Some(occurred_at),
        referrer: None,
        utm: None,
        traffic: None,
        props: None,
    }
}

fn with_ttfb(mut body: EventBody, ttfb_ms: f64) -> EventBody {
    body.traffic = Some(TrafficHints {
        ttfb_ms: Some(ttfb_ms),
        ..Default::default()
    });
    body
}

/// Three visitors on two properties of tenant `t1`:
/// A converts on site-a and becomes a lead, B only browses site-a,
/// C returns to site-b after a first visit the previous day.
async fn seed(db: &DuckDbBackend) {
    let ctx_a = context("ip-1", "ua-1");
    let ctx_b = context("ip-1", "ua-2");
    let ctx_c = context("ip-3", "ua-1");

    let mut landing = with_ttfb(event("anon-a", "site-a", EventType::PageView, "/", at(10, 9, 0)), 100.0);
    landing.referrer = Some("https://www.google.com/".into());

    let seeded = [
        (landing, &ctx_a),
        (event("anon-a", "site-a", EventType::FormStart, "/", at(10, 9, 1)), &ctx_a),
        (event("anon-a", "site-a", EventType::FormSubmit, "/", at(10, 9, 2)), &ctx_a),
        (
            with_ttfb(event("anon-b", "site-a", EventType::PageView, "/pricing", at(10, 10, 0)), 200.0),
            &ctx_b,
        ),
        (event("anon-c", "site-b", EventType::PageView, "/", at(9, 12, 0)), &ctx_c),
        (event("anon-c", "site-b", EventType::PageView, "/blog", at(10, 12, 0)), &ctx_c),
    ];
    let mut visitor_a = None;
    for (body, ctx) in &seeded {
        let ingested = db
            .ingest_event(body, ctx, db, "default")
            .await
            .expect("ingest");
        if body.anon_id == "anon-a" {
            visitor_a = Some(ingested.visitor_id);
        }
    }

    let request = LeadCaptureRequest {
        tenant_id: "t1".into(),
        property_id: Some("site-a".into()),
        email: "a@example.com".into(),
        visitor_id: visitor_a.expect("visitor a"),
        consent_status: None,
        captured_at: Some(at(10, 9, 3)),
    };
    db.capture_lead(&request, Some(&ctx_a), &NullConsentApplier, "default", 30)
        .await
        .expect("capture");

    db.record_ingest_rejection(EVENTS_ENDPOINT, "t1", "site-a", "invalid_payload", at(10, 11, 0))
        .await
        .expect("event rejection");
    db.record_rejected_lead("t1", "site-a", None, "invalid_email", at(10, 11, 5))
        .await
        .expect("rejected lead");
}

async fn rolled_day(db: &DuckDbBackend, scope: &RollupScope, d: NaiveDate) -> RollupDay {
    let range = DayRange::new(d, d).expect("range");
    let mut days = db.read_rollup_range(scope, range).await.expect("read");
    assert_eq!(days.len(), 1, "one stored row for {d}");
    days.remove(0)
}

#[tokio::test]
async fn tenant_wide_day_aggregates_every_property() {
    let db = Arc::new(DuckDbBackend::open_in_memory().expect("open"));
    seed(&db).await;

    let scope = RollupScope::tenant_wide("t1", "default");
    let range = DayRange::new(day(9), day(10)).expect("range");
    let report = db.run_rollups(&scope, range, 1).await.expect("run");
    assert_eq!(report.days, 2);
    assert_eq!(report.batches, 2);

    let stored = rolled_day(&db, &scope, day(10)).await;
    let m = &stored.metrics;
    assert_eq!(m.unique_visitors, 3);
    assert_eq!(m.returning_visitors, 1);
    assert_eq!(m.page_views, 3);
    assert_eq!(m.entrances, 3);
    assert_eq!(m.conversions, 1);
    assert_eq!(m.form_starts, 1);
    assert_eq!(m.form_submits, 1);
    assert_eq!(m.new_leads, 1);
    assert_eq!(m.time_to_first_capture_sum_ms, 180_000);
    assert_eq!(m.time_to_first_capture_count, 1);
    assert_eq!(m.traffic_sources.get("organic_search"), Some(&1));
    assert_eq!(m.traffic_sources.values().sum::<i64>(), 5);

    let paths: Vec<&str> = m.top_landing_paths.iter().map(|p| p.path.as_str()).collect();
    assert_eq!(paths, vec!["/", "/blog", "/pricing"]);
    assert_eq!(m.top_landing_paths[0].conversions, 1);

    let i = &stored.ingest;
    assert_eq!(i.accepted_events, 5);
    assert_eq!(i.rejected_events, 1);
    assert_eq!(i.accepted_leads, 1);
    assert_eq!(i.rejected_leads, 1);
    let p95 = i.p95_ttfb_ms.expect("p95");
    assert!((p95 - 195.0).abs() < 1e-6, "p95 was {p95}");
    assert_eq!(i.error_breakdown.get("invalid_payload"), Some(&1));
    assert_eq!(i.error_breakdown.get("invalid_email"), Some(&1));

    let previous = rolled_day(&db, &scope, day(9)).await;
    assert_eq!(previous.metrics.unique_visitors, 1);
    assert_eq!(previous.metrics.returning_visitors, 0);
    assert_eq!(previous.ingest.p95_ttfb_ms, None);
}

#[tokio::test]
async fn property_scopes_filter_events_and_attribute_leads() {
    let db = Arc::new(DuckDbBackend::open_in_memory().expect("open"));
    seed(&db).await;

    let site_a = RollupScope::new("t1", "site-a", "default");
    let (metrics, ingest) = db
        .compute_daily_rollup(&site_a, day(10))
        .await
        .expect("site-a");
    assert_eq!(metrics.unique_visitors, 2);
    assert_eq!(metrics.returning_visitors, 0);
    assert_eq!(metrics.new_leads, 1);
    assert_eq!(metrics.time_to_first_capture_count, 1);
    assert_eq!(ingest.accepted_events, 4);
    assert_eq!(ingest.accepted_leads, 1);

    let site_b = RollupScope::new("t1", "site-b", "default");
    let (metrics, ingest) = db
        .compute_daily_rollup(&site_b, day(10))
        .await
        .expect("site-b");
    assert_eq!(metrics.unique_visitors, 1);
    assert_eq!(metrics.returning_visitors, 1);
    assert_eq!(metrics.new_leads, 0);
    assert_eq!(metrics.time_to_first_capture_count, 0);
    assert_eq!(ingest.accepted_events, 1);
    assert_eq!(ingest.rejected_events, 0);
    assert_eq!(ingest.p95_ttfb_ms, None);
    assert!(ingest.error_breakdown.is_empty());
}

#[tokio::test]
async fn a_converting_session_is_credited_once_to_its_first_landing_path() {
    let db = Arc::new(DuckDbBackend::open_in_memory().expect("open"));
    let ctx = context("ip-1", "ua-1");
    for body in [
        event("anon-a", "site-a", EventType::PageView, "/", at(10, 9, 0)),
        event("anon-a", "site-a", EventType::PageView, "/pricing", at(10, 9, 5)),
        event("anon-a", "site-a", EventType::FormSubmit, "/pricing", at(10, 9, 6)),
        event("anon-a", "site-a", EventType::FormSubmit, "/pricing", at(10, 9, 7)),
    ] {
        db.ingest_event(&body, &ctx, &*db, "default")
            .await
            .expect("ingest");
    }

    let scope = RollupScope::new("t1", "site-a", "default");
    let (metrics, _) = db.compute_daily_rollup(&scope, day(10)).await.expect("rollup");
    assert_eq!(metrics.conversions, 2);

    let paths: Vec<(&str, i64, i64)> = metrics
        .top_landing_paths
        .iter()
        .map(|p| (p.path.as_str(), p.entrances, p.conversions))
        .collect();
    assert_eq!(paths, vec![("/", 1, 1), ("/pricing", 1, 0)]);

    let credited: i64 = metrics.top_landing_paths.iter().map(|p| p.conversions).sum();
    assert!(credited <= metrics.conversions);
    assert!(metrics
        .top_landing_paths
        .iter()
        .all(|p| p.conversion_rate <= 1.0));
    assert_eq!(metrics.top_landing_paths[0].conversion_rate, 1.0);
}

#[tokio::test]
async fn each_rejected_capture_counts_once() {
    let db = Arc::new(DuckDbBackend::open_in_memory().expect("open"));
    db.record_rejected_lead("t1", "site-a", Some("v1"), "invalid_email", at(10, 9, 0))
        .await
        .expect("rejected lead");
    db.record_ingest_rejection(LEAD_CAPTURE_ENDPOINT, "t1", "site-a", "invalid_payload", at(10, 9, 5))
        .await
        .expect("malformed capture");

    let scope = RollupScope::new("t1", "site-a", "default");
    let (_, ingest) = db.compute_daily_rollup(&scope, day(10)).await.expect("rollup");
    assert_eq!(ingest.rejected_leads, 2);
    assert_eq!(ingest.accepted_leads, 0);
    assert_eq!(ingest.rejected_events, 0);
    assert_eq!(ingest.error_breakdown.get("invalid_email"), Some(&1));
    assert_eq!(ingest.error_breakdown.get("invalid_payload"), Some(&1));

    let conn = db.conn_for_test().await;
    let rejected_submissions: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM form_submissions WHERE validation_status = 'rejected'",
            [],
            |row| row.get(0),
        )
        .expect("count");
    assert_eq!(rejected_submissions, 1);
}

#[tokio::test]
async fn rerunning_a_range_overwrites_in_place() {
    let db = Arc::new(DuckDbBackend::open_in_memory().expect("open"));
    seed(&db).await;

    let scope = RollupScope::new("t1", "site-a", "default");
    let range = DayRange::new(day(9), day(10)).expect("range");
    db.run_rollups(&scope, range, 7).await.expect("first run");
    let first = rolled_day(&db, &scope, day(10)).await;

    let report = db.run_rollups(&scope, range, 7).await.expect("second run");
    assert_eq!(report.batches, 1);
    let second = rolled_day(&db, &scope, day(10)).await;

    assert_eq!(first.metrics, second.metrics);
    assert_eq!(first.ingest, second.ingest);
    assert_eq!(db.rolled_up_days(&scope).await.expect("days"), vec![day(9), day(10)]);
}

#[tokio::test]
async fn a_day_without_activity_stores_zeros() {
    let db = Arc::new(DuckDbBackend::open_in_memory().expect("open"));
    let scope = RollupScope::tenant_wide("t-empty", "default");
    db.rollup_day(&scope, day(10)).await.expect("rollup");

    let stored = rolled_day(&db, &scope, day(10)).await;
    assert_eq!(stored.metrics.unique_visitors, 0);
    assert!(stored.metrics.traffic_sources.is_empty());
    assert!(stored.metrics.top_landing_paths.is_empty());
    assert_eq!(stored.ingest.accepted_events, 0);
    assert_eq!(stored.ingest.p95_ttfb_ms, None);
}

#[tokio::test]
async fn scopes_come_from_the_events_in_range() {
    let db = Arc::new(DuckDbBackend::open_in_memory().expect("open"));
    seed(&db).await;

    let scopes = db
        .list_rollup_scopes(DayRange::new(day(9), day(10)).expect("range"), "default")
        .await
        .expect("scopes");
    let keys: Vec<(&str, bool)> = scopes
        .iter()
        .map(|s| (s.property_id.as_str(), s.property_scoped))
        .collect();
    assert_eq!(
        keys,
        vec![("default", false), ("site-a", true), ("site-b", true)]
    );

    let only_ninth = db
        .list_rollup_scopes(DayRange::new(day(9), day(9)).expect("range"), "default")
        .await
        .expect("scopes");
    assert_eq!(only_ninth.len(), 2);
    assert_eq!(only_ninth[1].property_id, "site-b");
}
