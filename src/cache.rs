//! Bounded memo of dashboard summaries keyed by working set and parameters

use crate::config::EngineConfig;
use crate::engine::pipeline::DashboardSummary;
use crate::structs::CaseRecord;
use rustc_hash::{FxHashMap, FxHasher};
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

pub const DEFAULT_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub working_set: u64,
    pub params: u64,
}

/// Hash of the working set's record ids, in order
#[must_use]
pub fn working_set_hash(records: &[&CaseRecord]) -> u64 {
    let mut hasher = FxHasher::default();
    records.len().hash(&mut hasher);
    for record in records {
        record.id.hash(&mut hasher);
    }
    hasher.finish()
}

/// Hash of the serialized config plus a caller-supplied generation
/// (bumped whenever other inputs such as the cluster assignment change)
#[must_use]
pub fn params_hash(config: &EngineConfig, generation: u64) -> u64 {
    let mut hasher = FxHasher::default();
    match serde_json::to_string(config) {
        Ok(json) => json.hash(&mut hasher),
        Err(e) => tracing::warn!("config not serializable for cache key: {e}"),
    }
    generation.hash(&mut hasher);
    hasher.finish()
}

/// FIFO-evicting summary cache
#[derive(Debug)]
pub struct SummaryCache {
    capacity: usize,
    entries: FxHashMap<CacheKey, Arc<DashboardSummary>>,
    order: VecDeque<CacheKey>,
    hits: u64,
    misses: u64,
}

impl Default for SummaryCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl SummaryCache {
    /// A capacity of 0 disables caching
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: FxHashMap::default(),
            order: VecDeque::with_capacity(capacity),
            hits: 0,
            misses: 0,
        }
    }

    /// Cached summary for `key`, computing and storing it on a miss
    pub fn get_or_compute(
        &mut self,
        key: CacheKey,
        compute: impl FnOnce() -> DashboardSummary,
    ) -> Arc<DashboardSummary> {
        if let Some(summary) = self.entries.get(&key) {
            self.hits += 1;
            tracing::trace!(?key, "summary cache hit");
            return Arc::clone(summary);
        }
        self.misses += 1;
        let summary = Arc::new(compute());
        if self.capacity == 0 {
            return summary;
        }
        while self.entries.len() >= self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }
        self.entries.insert(key, Arc::clone(&summary));
        self.order.push_back(key);
        summary
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `(hits, misses)` since creation
    #[must_use]
    pub const fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::pipeline::summarize;
    use crate::records::{JsonRecordStore, RecordStore};

    fn store() -> JsonRecordStore {
        JsonRecordStore::from_json(
            r#"[{"id": "1", "age": 40, "gender": "F"}, {"id": "2", "age": 60, "gender": "M"}]"#,
        )
        .expect("parse json")
    }

    #[test]
    fn test_hashes() {
        let store = store();
        let all: Vec<&CaseRecord> = store.get_all_records().iter().collect();
        assert_eq!(working_set_hash(&all), working_set_hash(&all));
        assert_ne!(working_set_hash(&all), working_set_hash(&all[..1]));

        let config = EngineConfig::default();
        let mut other = config.clone();
        other.top_diagnoses = 3;
        assert_ne!(params_hash(&config, 0), params_hash(&other, 0));
        assert_ne!(params_hash(&config, 0), params_hash(&config, 1));
    }

    #[test]
    fn test_hit_and_eviction() {
        let store = store();
        let all = store.get_all_records();
        let working: Vec<&CaseRecord> = all.iter().collect();
        let config = EngineConfig::default();
        let compute = || summarize(all, &working, &config, None);

        let mut cache = SummaryCache::new(2);
        let key = |n| CacheKey {
            working_set: n,
            params: 0,
        };

        let first = cache.get_or_compute(key(1), compute);
        let again = cache.get_or_compute(key(1), || unreachable!("cached"));
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(cache.stats(), (1, 1));

        cache.get_or_compute(key(2), compute);
        cache.get_or_compute(key(3), compute);
        assert_eq!(cache.len(), 2);

        // key 1 was evicted first
        let mut recomputed = false;
        cache.get_or_compute(key(1), || {
            recomputed = true;
            compute()
        });
        assert!(recomputed);
    }
}
