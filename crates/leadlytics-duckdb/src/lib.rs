pub mod backend;
pub mod coerce;
pub mod freshness;
pub mod identity;
pub mod ingest;
pub mod predicate;
pub mod rejections;
pub mod rollup;
pub mod schema;
pub mod session;
pub mod summary_store;
pub mod view;

pub use backend::DuckDbBackend;
pub use rejections::{EVENTS_ENDPOINT, LEAD_CAPTURE_ENDPOINT};
pub use rollup::RollupRunReport;
pub use view::{is_missing_view_error, MaterializedView};

/// Re-export the `duckdb` crate so consumers (especially tests) can use
/// `leadlytics_duckdb::duckdb::params!` without an extra dependency.
pub use duckdb;
