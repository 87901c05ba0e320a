//! Read accelerator over the two rollup tables.
//!
//! DuckDB has no materialized views, so the accelerator is a table built
//! from the rollup join and rebuilt on refresh. Reads against it fail with a
//! catalog error until it has been created; [`is_missing_view_error`] tells
//! that case apart from every other failure.

use anyhow::Result;
use chrono::Utc;
use tracing::info;

use leadlytics_core::rollup::{DayRange, RollupDay, RollupScope};

use crate::summary_store::{read_rollup_rows, JOINED_ROLLUPS_SQL};
use crate::DuckDbBackend;

pub const DEFAULT_VIEW_NAME: &str = "daily_rollup_summary_mv";

/// PostgreSQL's SQLSTATE for `undefined_table`, reported by drivers that
/// surface SQLSTATEs.
const UNDEFINED_TABLE_SQLSTATE: &str = "42P01";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializedView {
    name: String,
}

impl Default for MaterializedView {
    fn default() -> Self {
        Self::new(DEFAULT_VIEW_NAME)
    }
}

impl MaterializedView {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn index_name(&self) -> String {
        format!("{}_key", self.name)
    }

    pub fn create_sql(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {name} AS {JOINED_ROLLUPS_SQL};
             CREATE UNIQUE INDEX IF NOT EXISTS {index} ON {name}(tenant_id, property_id, day);",
            name = self.name,
            index = self.index_name(),
        )
    }

    /// The index is dropped first: DuckDB refuses to replace a table that
    /// still has dependent indexes.
    pub fn refresh_sql(&self) -> String {
        format!(
            "DROP INDEX IF EXISTS {index};
             CREATE OR REPLACE TABLE {name} AS {JOINED_ROLLUPS_SQL};
             CREATE UNIQUE INDEX IF NOT EXISTS {index} ON {name}(tenant_id, property_id, day);",
            name = self.name,
            index = self.index_name(),
        )
    }

    pub fn is_missing_view_error(&self, err: &anyhow::Error) -> bool {
        is_missing_view_error(err, &self.name)
    }
}

/// `true` when `err` says the relation `view_name` does not exist: either a
/// DuckDB catalog error or an `undefined_table` SQLSTATE, naming that
/// relation in both cases.
pub fn is_missing_view_error(err: &anyhow::Error, view_name: &str) -> bool {
    let name = view_name.to_lowercase();
    err.chain().any(|cause| {
        let message = cause.to_string().to_lowercase();
        if !mentions_relation(&message, &name) {
            return false;
        }
        if message.contains(UNDEFINED_TABLE_SQLSTATE) {
            return true;
        }
        cause.downcast_ref::<duckdb::Error>().is_some()
            && message.contains("catalog error")
            && message.contains("does not exist")
    })
}

/// Whole-identifier match, so `mv` is not found inside `mv_other`.
fn mentions_relation(message: &str, name: &str) -> bool {
    if name.is_empty() {
        return false;
    }
    let is_ident = |c: char| c.is_ascii_alphanumeric() || c == '_';
    message.match_indices(name).any(|(start, _)| {
        let before = message[..start].chars().next_back();
        let after = message[start + name.len()..].chars().next();
        !before.is_some_and(is_ident) && !after.is_some_and(is_ident)
    })
}

impl DuckDbBackend {
    pub async fn materialized_view_exists(&self) -> Result<bool> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM information_schema.tables WHERE lower(table_name) = lower(?1)",
            duckdb::params![self.view.name()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Create the accelerator if it is absent. Safe to call on every start.
    pub async fn create_materialized_view(&self) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute_batch(&self.view.create_sql())?;
        info!(view = self.view.name(), "materialized view ensured");
        Ok(())
    }

    /// Rebuild the accelerator from the current rollup tables.
    pub async fn refresh_materialized_view(&self) -> Result<()> {
        let started = Utc::now();
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        tx.execute_batch(&self.view.refresh_sql())?;
        tx.commit()?;
        info!(
            view = self.view.name(),
            elapsed_ms = (Utc::now() - started).num_milliseconds(),
            "materialized view refreshed"
        );
        Ok(())
    }

    /// Scoped rows from the accelerator, ascending by day.
    pub async fn read_materialized_view(
        &self,
        scope: &RollupScope,
        range: DayRange,
    ) -> Result<Vec<RollupDay>> {
        let conn = self.conn.lock().await;
        read_rollup_rows(&conn, self.view.name(), scope, range)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn missing_table_error(name: &str) -> anyhow::Error {
        let conn = duckdb::Connection::open_in_memory().expect("in-memory duckdb");
        let err = conn
            .execute_batch(&format!("SELECT * FROM {name}"))
            .expect_err("table does not exist");
        anyhow::Error::from(err)
    }

    #[test]
    fn duckdb_catalog_error_for_the_view_is_recognised() {
        let err = missing_table_error("daily_rollup_summary_mv");
        assert!(is_missing_view_error(&err, "daily_rollup_summary_mv"));
    }

    #[test]
    fn catalog_error_for_another_relation_is_not() {
        let err = missing_table_error("some_other_table");
        assert!(!is_missing_view_error(&err, "daily_rollup_summary_mv"));
    }

    #[test]
    fn sqlstate_signature_is_recognised() {
        let err = anyhow::anyhow!("ERROR 42P01: relation \"mv\" does not exist");
        assert!(is_missing_view_error(&err, "mv"));
    }

    #[test]
    fn sqlstate_for_another_relation_is_not() {
        let err = anyhow::anyhow!("ERROR 42P01: relation \"daily_metric_rollups\" does not exist");
        assert!(!is_missing_view_error(&err, "mv"));
        let prefixed = anyhow::anyhow!("ERROR 42P01: relation \"mv_other\" does not exist");
        assert!(!is_missing_view_error(&prefixed, "mv"));
    }

    #[test]
    fn plain_text_without_driver_error_is_not() {
        let err = anyhow::anyhow!("Catalog Error: Table with name mv does not exist!");
        assert!(!is_missing_view_error(&err, "mv"));
        let io = anyhow::anyhow!("IO Error: disk full");
        assert!(!is_missing_view_error(&io, "mv"));
    }

    #[test]
    fn refresh_drops_and_rebuilds_the_index() {
        let view = MaterializedView::new("mv_test");
        let sql = view.refresh_sql();
        assert!(sql.starts_with("DROP INDEX IF EXISTS mv_test_key;"));
        assert!(sql.contains("CREATE OR REPLACE TABLE mv_test AS"));
        assert!(view.create_sql().contains("CREATE TABLE IF NOT EXISTS mv_test AS"));
    }
}
