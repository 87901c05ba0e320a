//! Process-local summary cache: capacity-bounded LRU with absolute TTL.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::time::{Duration, Instant};

use chrono::NaiveDate;

use crate::summary::{BackingMode, Summary};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SummaryCacheKey {
    pub tenant_id: String,
    pub property_id: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub compare: bool,
    pub mode: BackingMode,
}

pub type SummaryCache = BoundedTtlCache<SummaryCacheKey, Summary>;

/// Every value entering or leaving the cache goes through here, so callers
/// never share a value with the cache.
pub fn clone_summary(summary: &Summary) -> Summary {
    summary.clone()
}

struct Entry<V> {
    value: V,
    expires_at: Instant,
    tick: u64,
}

/// LRU by re-insert on read: a hit moves the entry to the most-recent end,
/// eviction takes from the least-recent end. Entries also expire by TTL
/// regardless of recency. A non-positive TTL or capacity disables the cache.
pub struct BoundedTtlCache<K, V> {
    ttl: Option<Duration>,
    max_entries: usize,
    entries: HashMap<K, Entry<V>>,
    /// tick → key, oldest first.
    recency: BTreeMap<u64, K>,
    next_tick: u64,
}

impl<K, V> BoundedTtlCache<K, V>
where
    K: Clone + Eq + Hash,
    V: Clone,
{
    pub fn new(ttl_ms: i64, max_entries: i64) -> Self {
        let enabled = ttl_ms > 0 && max_entries > 0;
        Self {
            ttl: enabled.then(|| Duration::from_millis(ttl_ms as u64)),
            max_entries: if enabled { max_entries as usize } else { 0 },
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            next_tick: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.ttl.is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&mut self, key: &K) -> Option<V> {
        self.get_at(key, Instant::now())
    }

    pub fn insert(&mut self, key: K, value: &V) {
        self.insert_at(key, value, Instant::now());
    }

    pub fn get_at(&mut self, key: &K, now: Instant) -> Option<V> {
        self.ttl?;
        let expired = self.entries.get(key)?.expires_at <= now;
        if expired {
            self.remove(key);
            return None;
        }
        let tick = self.bump_tick();
        let entry = self.entries.get_mut(key)?;
        self.recency.remove(&entry.tick);
        entry.tick = tick;
        self.recency.insert(tick, key.clone());
        Some(entry.value.clone())
    }

    pub fn insert_at(&mut self, key: K, value: &V, now: Instant) {
        let Some(ttl) = self.ttl else {
            return;
        };

        if let Some(existing) = self.entries.remove(&key) {
            self.recency.remove(&existing.tick);
        } else if self.entries.len() >= self.max_entries {
            self.purge_expired(now);
            while self.entries.len() >= self.max_entries {
                let Some((_, oldest)) = self.recency.pop_first() else {
                    break;
                };
                self.entries.remove(&oldest);
            }
        }

        let tick = self.bump_tick();
        self.recency.insert(tick, key.clone());
        self.entries.insert(
            key,
            Entry {
                value: value.clone(),
                expires_at: now + ttl,
                tick,
            },
        );
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.recency.clear();
    }

    fn remove(&mut self, key: &K) {
        if let Some(entry) = self.entries.remove(key) {
            self.recency.remove(&entry.tick);
        }
    }

    fn purge_expired(&mut self, now: Instant) {
        let expired: Vec<K> = self
            .entries
            .iter()
            .filter(|(_, e)| e.expires_at <= now)
            .map(|(k, _)| k.clone())
            .collect();
        for key in expired {
            self.remove(&key);
        }
    }

    fn bump_tick(&mut self) -> u64 {
        self.next_tick += 1;
        self.next_tick
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_when_ttl_or_capacity_not_positive() {
        for (ttl, max) in [(0, 10), (-5, 10), (1000, 0), (1000, -1)] {
            let mut cache: BoundedTtlCache<&str, i32> = BoundedTtlCache::new(ttl, max);
            cache.insert("a", &1);
            assert!(!cache.is_enabled());
            assert_eq!(cache.get(&"a"), None);
            assert!(cache.is_empty());
        }
    }

    #[test]
    fn entries_expire_by_absolute_ttl() {
        let mut cache: BoundedTtlCache<&str, i32> = BoundedTtlCache::new(1_000, 10);
        let t0 = Instant::now();
        cache.insert_at("a", &1, t0);
        assert_eq!(cache.get_at(&"a", t0 + Duration::from_millis(999)), Some(1));
        // A read does not extend the TTL.
        assert_eq!(cache.get_at(&"a", t0 + Duration::from_millis(1_000)), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn evicts_least_recently_used() {
        let mut cache: BoundedTtlCache<&str, i32> = BoundedTtlCache::new(60_000, 2);
        let t0 = Instant::now();
        cache.insert_at("a", &1, t0);
        cache.insert_at("b", &2, t0);
        // Touch "a" so "b" becomes the oldest.
        assert_eq!(cache.get_at(&"a", t0), Some(1));
        cache.insert_at("c", &3, t0);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get_at(&"b", t0), None);
        assert_eq!(cache.get_at(&"a", t0), Some(1));
        assert_eq!(cache.get_at(&"c", t0), Some(3));
    }

    #[test]
    fn reinserting_existing_key_does_not_evict() {
        let mut cache: BoundedTtlCache<&str, i32> = BoundedTtlCache::new(60_000, 2);
        let t0 = Instant::now();
        cache.insert_at("a", &1, t0);
        cache.insert_at("b", &2, t0);
        cache.insert_at("a", &10, t0);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get_at(&"a", t0), Some(10));
        assert_eq!(cache.get_at(&"b", t0), Some(2));
    }

    #[test]
    fn expired_entries_are_purged_before_evicting_live_ones() {
        let mut cache: BoundedTtlCache<&str, i32> = BoundedTtlCache::new(1_000, 2);
        let t0 = Instant::now();
        cache.insert_at("old", &1, t0);
        let t1 = t0 + Duration::from_millis(600);
        cache.insert_at("live", &2, t1);
        let t2 = t0 + Duration::from_millis(1_200);
        cache.insert_at("new", &3, t2);
        assert_eq!(cache.get_at(&"live", t2), Some(2));
        assert_eq!(cache.get_at(&"new", t2), Some(3));
    }
}
