use anyhow::Result;
use chrono::{DateTime, Utc};
use duckdb::Connection;
use tracing::debug;

use crate::coerce::format_ts;
use crate::DuckDbBackend;

/// Endpoint identity of event ingestion in the rejection log.
pub const EVENTS_ENDPOINT: &str = "/v1/events";

/// Endpoint identity of lead capture in the rejection log.
pub const LEAD_CAPTURE_ENDPOINT: &str = "/v1/leads/capture";

impl DuckDbBackend {
    /// Append one rejected request to the ingest-rejection log. Rows are
    /// never updated; the ingest rollup counts them per endpoint and groups
    /// them by `reason`.
    pub async fn record_ingest_rejection(
        &self,
        endpoint: &str,
        tenant_id: &str,
        property_id: &str,
        reason: &str,
        occurred_at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        insert_ingest_rejection(&conn, endpoint, tenant_id, property_id, reason, occurred_at)?;
        debug!(endpoint, tenant_id, reason, "ingest rejection recorded");
        Ok(())
    }
}

pub(crate) fn insert_ingest_rejection(
    conn: &Connection,
    endpoint: &str,
    tenant_id: &str,
    property_id: &str,
    reason: &str,
    occurred_at: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO ingest_rejections (id, endpoint, tenant_id, property_id, reason, occurred_at)
         VALUES (?1, ?2, ?3, ?4, ?5, CAST(?6 AS TIMESTAMP))",
        duckdb::params![
            uuid::Uuid::new_v4().to_string(),
            endpoint,
            tenant_id,
            property_id,
            reason,
            format_ts(occurred_at)
        ],
    )?;
    Ok(())
}
