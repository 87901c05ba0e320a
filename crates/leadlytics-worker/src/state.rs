use std::sync::Arc;

use leadlytics_core::config::Config;
use leadlytics_core::service::SummaryService;
use leadlytics_duckdb::DuckDbBackend;

/// Shared state of the worker process.
///
/// The backend is behind an `Arc` so rollup batches can fan days out onto
/// their own tasks; the summary service shares the same handle.
pub struct AppState {
    pub db: Arc<DuckDbBackend>,

    /// Parsed configuration, loaded once at startup from environment variables.
    pub config: Arc<Config>,

    /// Cached dashboard summaries. Invalidated after every scheduler tick so
    /// fresh rollups are visible without waiting for the TTL.
    pub summaries: SummaryService<DuckDbBackend>,
}

impl AppState {
    pub fn new(db: DuckDbBackend, config: Config) -> Self {
        let db = Arc::new(db);
        let summaries = SummaryService::new(Arc::clone(&db), &config);
        Self {
            db,
            config: Arc::new(config),
            summaries,
        }
    }
}
