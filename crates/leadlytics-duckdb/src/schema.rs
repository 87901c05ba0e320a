/// DuckDB initialization SQL.
///
/// Executed once at database open time via `Connection::execute_batch`.
/// All statements use `IF NOT EXISTS` so they are safe to re-run on every
/// startup.
///
/// `memory_limit` comes from `Config.duckdb_memory_limit`
/// (env `LEADLYTICS_DUCKDB_MEMORY`, default `"1GB"`). Always set an explicit
/// limit: the DuckDB default (80% of system RAM) is not acceptable for a
/// server process.
///
/// Timestamps are stored as naive UTC `TIMESTAMP`s. JSON payloads
/// (`props`, breakdowns, top paths) are stored as `VARCHAR` and read with
/// `json_extract_string` where a query needs a field.
///
/// Columns rewritten by UPDATE (`leads.first_captured_at`, visitor and
/// session `last_seen_at`, link confidence) stay out of
/// indexes: DuckDB turns an update of an indexed column into delete+insert,
/// which trips unique constraints inside a transaction.
pub fn init_sql(memory_limit: &str) -> String {
    format!(
        r#"SET memory_limit = '{memory_limit}';
SET threads = 2;

-- ===========================================
-- VISITORS (anonymous identities)
-- ===========================================
CREATE TABLE IF NOT EXISTS visitors (
    id              VARCHAR PRIMARY KEY,           -- UUID v4
    tenant_id       VARCHAR NOT NULL,
    anon_id         VARCHAR NOT NULL,              -- client-side anonymous id
    first_seen_at   TIMESTAMP NOT NULL,
    last_seen_at    TIMESTAMP NOT NULL,
    last_ip_hash    VARCHAR,
    last_ua_hash    VARCHAR,
    UNIQUE (tenant_id, anon_id)
);

-- ===========================================
-- SESSIONS (30-minute idle window)
-- ===========================================
CREATE TABLE IF NOT EXISTS sessions (
    id              VARCHAR PRIMARY KEY,
    tenant_id       VARCHAR NOT NULL,
    visitor_id      VARCHAR NOT NULL,
    started_at      TIMESTAMP NOT NULL,
    last_seen_at    TIMESTAMP NOT NULL,
    entry_path      VARCHAR NOT NULL,
    referrer        VARCHAR
);
CREATE INDEX IF NOT EXISTS idx_sessions_visitor
    ON sessions(visitor_id);

-- ===========================================
-- EVENTS (append-only, deduplicated)
-- ===========================================
CREATE TABLE IF NOT EXISTS events (
    id              VARCHAR PRIMARY KEY,           -- UUID v4
    tenant_id       VARCHAR NOT NULL,
    property_id     VARCHAR NOT NULL,
    visitor_id      VARCHAR NOT NULL,
    session_id      VARCHAR NOT NULL,
    event_type      VARCHAR NOT NULL,              -- 'page_view' | 'form_start' | 'form_submit' | ...
    path            VARCHAR NOT NULL,
    occurred_at     TIMESTAMP NOT NULL,
    referrer        VARCHAR,
    ip_hash         VARCHAR NOT NULL,
    ua_hash         VARCHAR NOT NULL,
    dedupe_key      VARCHAR NOT NULL,              -- hex sha256, see leadlytics_core::dedupe
    props           VARCHAR NOT NULL DEFAULT '{{}}',

    -- Derived traffic fields
    traffic_source  VARCHAR NOT NULL,
    device_type     VARCHAR NOT NULL,
    country_code    VARCHAR(2),
    is_entrance     BOOLEAN NOT NULL DEFAULT false,
    is_exit         BOOLEAN NOT NULL DEFAULT false,
    is_conversion   BOOLEAN NOT NULL DEFAULT false,

    utm_source      VARCHAR,
    utm_medium      VARCHAR,
    utm_campaign    VARCHAR,
    UNIQUE (tenant_id, dedupe_key)
);
CREATE INDEX IF NOT EXISTS idx_events_tenant_time
    ON events(tenant_id, occurred_at);
CREATE INDEX IF NOT EXISTS idx_events_property_time
    ON events(tenant_id, property_id, occurred_at);
CREATE INDEX IF NOT EXISTS idx_events_visitor_time
    ON events(visitor_id, occurred_at);

-- ===========================================
-- LEADS (identified people)
-- ===========================================
CREATE TABLE IF NOT EXISTS leads (
    id                  VARCHAR PRIMARY KEY,
    tenant_id           VARCHAR NOT NULL,
    email_normalized    VARCHAR NOT NULL,
    first_captured_at   TIMESTAMP NOT NULL,
    last_captured_at    TIMESTAMP NOT NULL,
    consent_status      VARCHAR NOT NULL DEFAULT 'unknown',
    UNIQUE (tenant_id, email_normalized)
);

-- ===========================================
-- LEAD IDENTITIES (lead <-> visitor links)
-- ===========================================
-- confidence never decreases for a given (lead_id, visitor_id).
CREATE TABLE IF NOT EXISTS lead_identities (
    lead_id         VARCHAR NOT NULL,
    visitor_id      VARCHAR NOT NULL,
    tenant_id       VARCHAR NOT NULL,
    link_source     VARCHAR NOT NULL,              -- 'form_submit' | 'same_ip_ua_window'
    confidence      DOUBLE NOT NULL,
    linked_at       TIMESTAMP NOT NULL,
    PRIMARY KEY (lead_id, visitor_id)
);
CREATE INDEX IF NOT EXISTS idx_lead_identities_visitor
    ON lead_identities(visitor_id);

-- ===========================================
-- FORM SUBMISSIONS (lead-capture validation outcome)
-- ===========================================
CREATE TABLE IF NOT EXISTS form_submissions (
    id                  VARCHAR PRIMARY KEY,
    tenant_id           VARCHAR NOT NULL,
    property_id         VARCHAR NOT NULL,
    lead_id             VARCHAR,                   -- NULL when rejected before a lead existed
    visitor_id          VARCHAR,
    validation_status   VARCHAR NOT NULL,          -- 'accepted' | 'rejected'
    submitted_at        TIMESTAMP NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_form_submissions_tenant_time
    ON form_submissions(tenant_id, submitted_at);

-- ===========================================
-- INGEST REJECTIONS (append-only)
-- ===========================================
CREATE TABLE IF NOT EXISTS ingest_rejections (
    id              VARCHAR PRIMARY KEY,
    endpoint        VARCHAR NOT NULL,              -- '/v1/events' | '/v1/leads/capture'
    tenant_id       VARCHAR NOT NULL,
    property_id     VARCHAR NOT NULL,
    reason          VARCHAR NOT NULL,
    occurred_at     TIMESTAMP NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_ingest_rejections_tenant_time
    ON ingest_rejections(tenant_id, occurred_at);

-- ===========================================
-- DAILY ROLLUPS (one row per tenant, property, day; upserted)
-- ===========================================
CREATE TABLE IF NOT EXISTS daily_metric_rollups (
    tenant_id                       VARCHAR NOT NULL,
    property_id                     VARCHAR NOT NULL,
    day                             DATE NOT NULL,
    unique_visitors                 BIGINT NOT NULL DEFAULT 0,
    returning_visitors              BIGINT NOT NULL DEFAULT 0,
    page_views                      BIGINT NOT NULL DEFAULT 0,
    entrances                       BIGINT NOT NULL DEFAULT 0,
    exits                           BIGINT NOT NULL DEFAULT 0,
    conversions                     BIGINT NOT NULL DEFAULT 0,
    form_starts                     BIGINT NOT NULL DEFAULT 0,
    form_submits                    BIGINT NOT NULL DEFAULT 0,
    new_leads                       BIGINT NOT NULL DEFAULT 0,
    time_to_first_capture_sum_ms    BIGINT NOT NULL DEFAULT 0,
    time_to_first_capture_count     BIGINT NOT NULL DEFAULT 0,
    traffic_sources                 VARCHAR NOT NULL DEFAULT '{{}}',  -- JSON {{source: count}}
    top_landing_paths               VARCHAR NOT NULL DEFAULT '[]',  -- JSON [LandingPath]
    generated_at                    TIMESTAMP NOT NULL,
    PRIMARY KEY (tenant_id, property_id, day)
);

CREATE TABLE IF NOT EXISTS daily_ingest_rollups (
    tenant_id           VARCHAR NOT NULL,
    property_id         VARCHAR NOT NULL,
    day                 DATE NOT NULL,
    accepted_events     BIGINT NOT NULL DEFAULT 0,
    rejected_events     BIGINT NOT NULL DEFAULT 0,
    accepted_leads      BIGINT NOT NULL DEFAULT 0,
    rejected_leads      BIGINT NOT NULL DEFAULT 0,
    p95_ttfb_ms         DOUBLE,
    error_breakdown     VARCHAR NOT NULL DEFAULT '{{}}',  -- JSON {{reason: count}}
    generated_at        TIMESTAMP NOT NULL,
    PRIMARY KEY (tenant_id, property_id, day)
);
"#
    )
}
