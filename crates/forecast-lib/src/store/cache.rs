//! In-memory cache of loaded artifacts

use super::TrainedModel;
use crate::models::{ModelId, ModelVersion};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

struct CachedModel {
    model: Arc<TrainedModel>,
    inserted: u64,
}

/// Bounded `(model id, version) -> model` cache
///
/// Artifacts are immutable, so an entry never goes stale; promotion only
/// drops the superseded versions of that model id. When full, the oldest
/// insertion is evicted. A capacity of 0 disables caching.
pub struct ModelCache {
    entries: DashMap<(ModelId, ModelVersion), CachedModel>,
    capacity: usize,
    clock: AtomicU64,
}

impl ModelCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            capacity,
            clock: AtomicU64::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, model_id: &ModelId, version: &ModelVersion) -> Option<Arc<TrainedModel>> {
        self.entries
            .get(&(model_id.clone(), version.clone()))
            .map(|cached| cached.model.clone())
    }

    pub fn insert(&self, model_id: &ModelId, version: &ModelVersion, model: Arc<TrainedModel>) {
        if self.capacity == 0 {
            return;
        }
        let key = (model_id.clone(), version.clone());
        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            self.evict_oldest();
        }
        let inserted = self.clock.fetch_add(1, Ordering::Relaxed);
        self.entries.insert(key, CachedModel { model, inserted });
    }

    /// Drop every cached version of `model_id`
    pub fn invalidate(&self, model_id: &ModelId) {
        let before = self.entries.len();
        self.entries.retain(|(id, _), _| id != model_id);
        debug!(
            model_id = %model_id,
            dropped = before.saturating_sub(self.entries.len()),
            "Model cache invalidated"
        );
    }

    fn evict_oldest(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|entry| entry.value().inserted)
            .map(|entry| entry.key().clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forecast::ForecastModel;

    fn model() -> Arc<TrainedModel> {
        Arc::new(TrainedModel::Forecast(ForecastModel::new()))
    }

    fn key(app: &str, v: u64) -> (ModelId, ModelVersion) {
        (
            ModelId::forecast(app, "Autorizada").unwrap(),
            ModelVersion::from_number(v),
        )
    }

    #[test]
    fn test_insert_get_and_invalidate() {
        let cache = ModelCache::new(8);
        let (a, v1) = key("a", 1);
        let (b, v2) = key("b", 2);
        cache.insert(&a, &v1, model());
        cache.insert(&b, &v2, model());

        assert!(cache.get(&a, &v1).is_some());
        cache.invalidate(&a);
        assert!(cache.get(&a, &v1).is_none());
        assert!(cache.get(&b, &v2).is_some());
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let cache = ModelCache::new(2);
        let (a, v1) = key("a", 1);
        let (b, v1b) = key("b", 1);
        let (c, v1c) = key("c", 1);
        cache.insert(&a, &v1, model());
        cache.insert(&b, &v1b, model());
        cache.insert(&c, &v1c, model());

        assert_eq!(cache.len(), 2);
        assert!(cache.get(&a, &v1).is_none());
        assert!(cache.get(&c, &v1c).is_some());
    }

    #[test]
    fn test_zero_capacity_disables_cache() {
        let cache = ModelCache::new(0);
        let (a, v1) = key("a", 1);
        cache.insert(&a, &v1, model());
        assert!(cache.is_empty());
    }
}
