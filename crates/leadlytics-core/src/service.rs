//! Summary orchestration: cache, backing-store selection and fallback.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::cache::{clone_summary, SummaryCache, SummaryCacheKey};
use crate::config::Config;
use crate::rollup::{DayRange, RollupDay, RollupFreshness, RollupScope};
use crate::summary::{build_summary, BackingMode, Summary, SummaryRequest, WindowInputs};

/// Read side of the rollup tables and their optional accelerator.
#[async_trait]
pub trait SummaryStore: Send + Sync + 'static {
    /// Rows aggregated live from the two rollup tables.
    async fn read_rollup_days(
        &self,
        scope: &RollupScope,
        range: DayRange,
    ) -> anyhow::Result<Vec<RollupDay>>;

    /// Rows from the precomputed accelerator. Fails with an error that
    /// [`SummaryStore::is_missing_view_error`] recognises when it does not exist.
    async fn read_view_days(
        &self,
        scope: &RollupScope,
        range: DayRange,
    ) -> anyhow::Result<Vec<RollupDay>>;

    fn is_missing_view_error(&self, err: &anyhow::Error) -> bool;

    async fn rollup_freshness(&self, scope: &RollupScope) -> anyhow::Result<RollupFreshness>;
}

pub struct SummaryService<S: SummaryStore> {
    store: Arc<S>,
    cache: Mutex<SummaryCache>,
    view_enabled: bool,
    default_property_id: String,
    missing_view_logged: AtomicBool,
}

impl<S: SummaryStore> SummaryService<S> {
    pub fn new(store: Arc<S>, config: &Config) -> Self {
        Self::with_cache(
            store,
            config,
            SummaryCache::new(config.summary_cache_ttl_ms, config.summary_cache_max_entries),
        )
    }

    pub fn with_cache(store: Arc<S>, config: &Config, cache: SummaryCache) -> Self {
        Self {
            store,
            cache: Mutex::new(cache),
            view_enabled: config.materialized_view_enabled,
            default_property_id: config.default_property_id.clone(),
            missing_view_logged: AtomicBool::new(false),
        }
    }

    fn configured_mode(&self) -> BackingMode {
        if self.view_enabled {
            BackingMode::Materialized
        } else {
            BackingMode::Live
        }
    }

    fn cache_get(&self, key: &SummaryCacheKey) -> Option<Summary> {
        let mut cache = self.cache.lock().ok()?;
        cache.get(key).as_ref().map(clone_summary)
    }

    fn cache_put(&self, key: SummaryCacheKey, summary: &Summary) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(key, &clone_summary(summary));
        }
    }

    /// Drop every cached summary, e.g. after a rollup run.
    pub fn invalidate(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.clear();
        }
    }

    #[tracing::instrument(skip(self), fields(tenant_id = %request.tenant_id, property_id = %request.property_id))]
    pub async fn get_summary(&self, request: &SummaryRequest) -> anyhow::Result<Summary> {
        let range = DayRange::new(request.start, request.end)?;
        let key = SummaryCacheKey {
            tenant_id: request.tenant_id.clone(),
            property_id: request.property_id.clone(),
            start: request.start,
            end: request.end,
            compare: request.compare,
            mode: self.configured_mode(),
        };
        if let Some(hit) = self.cache_get(&key) {
            debug!("summary cache hit");
            return Ok(hit);
        }

        let scope = RollupScope::new(
            &request.tenant_id,
            &request.property_id,
            &self.default_property_id,
        );
        let (days, backing_mode) = self.read_window(&scope, range).await?;
        let comparison = if request.compare {
            let previous = range.previous();
            let (prev_days, _) = self.read_window(&scope, previous).await?;
            Some((previous, prev_days))
        } else {
            None
        };
        let freshness = self.store.rollup_freshness(&scope).await?;

        let summary = build_summary(
            request,
            WindowInputs {
                range,
                days: &days,
                comparison: comparison
                    .as_ref()
                    .map(|(range, rows)| (*range, rows.as_slice())),
            },
            freshness,
            backing_mode,
        );

        self.cache_put(key, &summary);
        Ok(summary)
    }

    async fn read_window(
        &self,
        scope: &RollupScope,
        range: DayRange,
    ) -> anyhow::Result<(Vec<RollupDay>, BackingMode)> {
        if self.view_enabled {
            match self.store.read_view_days(scope, range).await {
                Ok(days) => return Ok((days, BackingMode::Materialized)),
                Err(err) if self.store.is_missing_view_error(&err) => {
                    if !self.missing_view_logged.swap(true, Ordering::Relaxed) {
                        warn!(error = %err, "materialized view missing, falling back to live rollups");
                    }
                }
                Err(err) => return Err(err),
            }
        }
        let days = self.store.read_rollup_days(scope, range).await?;
        Ok((days, BackingMode::Live))
    }
}
