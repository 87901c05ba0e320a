use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: String,
    /// DuckDB size string such as `"1GB"` or `"512MB"`.
    pub duckdb_memory_limit: String,
    /// Property id meaning "the whole tenant"; rollups for it skip property filters.
    pub default_property_id: String,
    /// Days rolled up concurrently per batch.
    pub rollup_batch_size: usize,
    pub rollup_lookback_days: u32,
    pub scheduler_tick_seconds: u64,
    pub materialized_view_enabled: bool,
    pub materialized_view_name: String,
    /// `<= 0` disables the summary cache.
    pub summary_cache_ttl_ms: i64,
    /// `<= 0` disables the summary cache.
    pub summary_cache_max_entries: i64,
    pub heuristic_lookback_days: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
            duckdb_memory_limit: "1GB".to_string(),
            default_property_id: "default".to_string(),
            rollup_batch_size: 7,
            rollup_lookback_days: 1,
            scheduler_tick_seconds: 300,
            materialized_view_enabled: false,
            materialized_view_name: "daily_rollup_summary_mv".to_string(),
            summary_cache_ttl_ms: 60_000,
            summary_cache_max_entries: 256,
            heuristic_lookback_days: 30,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup. `from_env` passes the
    /// process environment; tests pass a map.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let materialized_view_name = lookup("LEADLYTICS_MATERIALIZED_VIEW_NAME")
            .unwrap_or(defaults.materialized_view_name);
        if !is_sql_identifier(&materialized_view_name) {
            return Err(format!(
                "invalid materialized view name: {materialized_view_name}"
            ));
        }

        let default_property_id = lookup("LEADLYTICS_DEFAULT_PROPERTY_ID")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or(defaults.default_property_id);

        Ok(Self {
            data_dir: lookup("LEADLYTICS_DATA_DIR").unwrap_or(defaults.data_dir),
            duckdb_memory_limit: lookup("LEADLYTICS_DUCKDB_MEMORY")
                .unwrap_or(defaults.duckdb_memory_limit),
            default_property_id,
            rollup_batch_size: lookup("LEADLYTICS_ROLLUP_BATCH_SIZE")
                .and_then(|v| v.parse::<usize>().ok())
                .map(|v| v.max(1))
                .unwrap_or(defaults.rollup_batch_size),
            rollup_lookback_days: lookup("LEADLYTICS_ROLLUP_LOOKBACK_DAYS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.rollup_lookback_days),
            scheduler_tick_seconds: lookup("LEADLYTICS_SCHEDULER_TICK_SECONDS")
                .and_then(|v| v.parse::<u64>().ok())
                .map(|v| v.clamp(10, 86_400))
                .unwrap_or(defaults.scheduler_tick_seconds),
            materialized_view_enabled: lookup("LEADLYTICS_MATERIALIZED_VIEW")
                .map(|v| matches!(v.as_str(), "true" | "1" | "on"))
                .unwrap_or(defaults.materialized_view_enabled),
            materialized_view_name,
            summary_cache_ttl_ms: lookup("LEADLYTICS_SUMMARY_CACHE_TTL_MS")
                .map(|v| v.parse().map_err(|e| format!("invalid cache ttl: {e}")))
                .transpose()?
                .unwrap_or(defaults.summary_cache_ttl_ms),
            summary_cache_max_entries: lookup("LEADLYTICS_SUMMARY_CACHE_MAX_ENTRIES")
                .map(|v| v.parse().map_err(|e| format!("invalid cache size: {e}")))
                .transpose()?
                .unwrap_or(defaults.summary_cache_max_entries),
            heuristic_lookback_days: lookup("LEADLYTICS_HEURISTIC_LOOKBACK_DAYS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.heuristic_lookback_days),
        })
    }

    pub fn scheduler_tick(&self) -> Duration {
        Duration::from_secs(self.scheduler_tick_seconds)
    }
}

/// The view name is interpolated into DDL, so it must be a bare identifier.
fn is_sql_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let cfg = config_from(&[]).expect("config");
        assert_eq!(cfg.default_property_id, "default");
        assert_eq!(cfg.rollup_batch_size, 7);
        assert!(!cfg.materialized_view_enabled);
        assert_eq!(cfg.summary_cache_ttl_ms, 60_000);
    }

    #[test]
    fn batch_size_is_at_least_one() {
        let cfg = config_from(&[("LEADLYTICS_ROLLUP_BATCH_SIZE", "0")]).expect("config");
        assert_eq!(cfg.rollup_batch_size, 1);
    }

    #[test]
    fn negative_cache_settings_are_kept_so_caching_can_be_disabled() {
        let cfg = config_from(&[
            ("LEADLYTICS_SUMMARY_CACHE_TTL_MS", "-1"),
            ("LEADLYTICS_SUMMARY_CACHE_MAX_ENTRIES", "0"),
        ])
        .expect("config");
        assert_eq!(cfg.summary_cache_ttl_ms, -1);
        assert_eq!(cfg.summary_cache_max_entries, 0);
    }

    #[test]
    fn rejects_view_names_that_are_not_identifiers() {
        let err = config_from(&[("LEADLYTICS_MATERIALIZED_VIEW_NAME", "mv; DROP TABLE x")])
            .expect_err("must reject");
        assert!(err.contains("invalid materialized view name"));
    }

    #[test]
    fn scheduler_tick_is_clamped() {
        let cfg = config_from(&[("LEADLYTICS_SCHEDULER_TICK_SECONDS", "1")]).expect("config");
        assert_eq!(cfg.scheduler_tick(), Duration::from_secs(10));
    }
}
