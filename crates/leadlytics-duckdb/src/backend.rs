use std::sync::Arc;

use anyhow::Result;
use duckdb::Connection;
use tokio::sync::Mutex;
use tracing::info;

use crate::schema::init_sql;
use crate::view::MaterializedView;

/// A DuckDB backend for leadlytics.
///
/// DuckDB is single-writer: concurrent reads are fine, but concurrent writes
/// cause contention. The connection lives behind `Arc<Mutex<_>>` so the
/// async runtime serialises statements while the backend itself stays cheap
/// to share between the ingest path, the rollup scheduler and summary reads.
///
/// Every operation takes the lock for a single statement (or one short
/// transaction), so independent reads fanned out with `tokio::try_join!`
/// interleave at statement granularity.
pub struct DuckDbBackend {
    pub(crate) conn: Arc<Mutex<Connection>>,
    pub(crate) view: MaterializedView,
}

impl DuckDbBackend {
    /// Open (or create) a DuckDB database file at `path`.
    ///
    /// `memory_limit` is a DuckDB size string such as `"1GB"` or `"512MB"`.
    /// Runs the schema init SQL so all tables and indexes exist.
    pub fn open(path: &str, memory_limit: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(&init_sql(memory_limit))?;
        info!(
            "DuckDB opened at {} with memory_limit={}, threads=2",
            path, memory_limit
        );
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            view: MaterializedView::default(),
        })
    }

    /// Open an **in-memory** DuckDB database.
    ///
    /// Intended for tests: data is discarded when the struct is dropped.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(&init_sql("1GB"))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            view: MaterializedView::default(),
        })
    }

    /// Use `name` for the read accelerator relation. The name must already
    /// be validated as a plain identifier (see `Config::from_env`).
    pub fn with_materialized_view_name(mut self, name: &str) -> Self {
        self.view = MaterializedView::new(name);
        self
    }

    /// Acquire the DuckDB connection lock for direct queries.
    ///
    /// Intended for integration tests that need to seed or verify rows.
    /// Production code should use the typed methods.
    pub async fn conn_for_test(&self) -> tokio::sync::MutexGuard<'_, Connection> {
        self.conn.lock().await
    }
}
