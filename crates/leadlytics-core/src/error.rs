use chrono::NaiveDate;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// An insert hit the dedupe-key conflict branch but the follow-up lookup
    /// found no row. Never retried: the events table is inconsistent.
    #[error("dedupe lookup failed for tenant {tenant_id}, key {dedupe_key}")]
    DedupeLookupFailed {
        tenant_id: String,
        dedupe_key: String,
    },

    #[error("invalid event: {0}")]
    InvalidEvent(String),

    #[error("invalid lead: {0}")]
    InvalidLead(String),

    #[error("invalid date range: {start} is after {end}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
