//! Champion/challenger promotion
//!
//! A candidate replaces the production model only when its RMSE is strictly
//! lower. All writers for one model id run under a per-id lock; the artifact
//! is saved before the registry is pointed at it, and the registry update is
//! a compare-and-set against the entry read under the lock.

use crate::error::{ForecastError, Result};
use crate::models::{ModelId, ModelVersion, ProductionEntry};
use crate::store::{ModelStore, ProductionRegistry, TrainedModel};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PromotionDecision {
    /// No production entry exists yet
    FirstModel,
    /// Incumbent carries no usable RMSE
    IncumbentUnscored,
    Better { candidate: f64, incumbent: f64 },
    NotBetter { candidate: f64, incumbent: f64 },
}

impl PromotionDecision {
    pub fn promotes(&self) -> bool {
        !matches!(self, PromotionDecision::NotBetter { .. })
    }
}

/// Decide whether a candidate with `candidate_rmse` replaces `current`
///
/// Ties keep the incumbent; a NaN candidate never wins against a scored
/// incumbent.
pub fn decide(candidate_rmse: f64, current: Option<&ProductionEntry>) -> PromotionDecision {
    let Some(entry) = current else {
        return PromotionDecision::FirstModel;
    };
    match entry.rmse() {
        None => PromotionDecision::IncumbentUnscored,
        Some(incumbent) if candidate_rmse < incumbent => PromotionDecision::Better {
            candidate: candidate_rmse,
            incumbent,
        },
        Some(incumbent) => PromotionDecision::NotBetter {
            candidate: candidate_rmse,
            incumbent,
        },
    }
}

/// One async mutex per model id, created on first use
#[derive(Default)]
pub struct KeyedLocks {
    locks: DashMap<ModelId, Arc<Mutex<()>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, model_id: &ModelId) -> OwnedMutexGuard<()> {
        // Clone the Arc out so the map shard is not held across the await
        let lock = self
            .locks
            .entry(model_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }
}

/// Result of one promotion attempt
#[derive(Debug, Clone, PartialEq)]
pub struct PromotionResult {
    pub decision: PromotionDecision,
    /// Set when a new version went to production
    pub version: Option<ModelVersion>,
}

impl PromotionResult {
    pub fn promoted(&self) -> bool {
        self.version.is_some()
    }
}

/// Serializes writes to the model store and registry per model id
pub struct Promoter {
    store: Arc<ModelStore>,
    registry: Arc<dyn ProductionRegistry>,
    locks: KeyedLocks,
}

impl Promoter {
    pub fn new(store: Arc<ModelStore>, registry: Arc<dyn ProductionRegistry>) -> Self {
        Self {
            store,
            registry,
            locks: KeyedLocks::new(),
        }
    }

    /// Save and promote the candidate if it beats the production model
    pub async fn promote_if_better(
        &self,
        model_id: &ModelId,
        candidate: &TrainedModel,
        metrics: BTreeMap<String, f64>,
    ) -> Result<PromotionResult> {
        let _guard = self.locks.lock(model_id).await;

        let current = self.registry.get(model_id).await?;
        let candidate_rmse = metrics.get("rmse").copied().unwrap_or(f64::NAN);
        let decision = decide(candidate_rmse, current.as_ref());
        debug!(model_id = %model_id, decision = ?decision, "Promotion decision");

        if !decision.promotes() {
            return Ok(PromotionResult {
                decision,
                version: None,
            });
        }

        let version = self.install(model_id, candidate, metrics, current).await?;
        Ok(PromotionResult {
            decision,
            version: Some(version),
        })
    }

    /// Save the model and make it the production version unconditionally
    pub async fn publish(
        &self,
        model_id: &ModelId,
        model: &TrainedModel,
        metrics: BTreeMap<String, f64>,
    ) -> Result<ModelVersion> {
        let _guard = self.locks.lock(model_id).await;
        let current = self.registry.get(model_id).await?;
        self.install(model_id, model, metrics, current).await
    }

    /// Save first, then swing the registry pointer; caller holds the id lock
    async fn install(
        &self,
        model_id: &ModelId,
        model: &TrainedModel,
        metrics: BTreeMap<String, f64>,
        current: Option<ProductionEntry>,
    ) -> Result<ModelVersion> {
        let (version, path) = self.store.save(model, model_id).await?;
        let expected = current.as_ref().map(|e| &e.version);
        let entry = ProductionEntry::new(version.clone(), path, metrics);

        if !self
            .registry
            .compare_and_set(model_id, expected, entry)
            .await?
        {
            return Err(ForecastError::Conflict(model_id.to_string()));
        }

        info!(
            model_id = %model_id,
            version = %version,
            previous = ?expected,
            "Model promoted to production"
        );
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn entry_with(metrics: &[(&str, f64)]) -> ProductionEntry {
        ProductionEntry::new(
            ModelVersion::from_number(1),
            PathBuf::from("m.json"),
            metrics.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        )
    }

    #[test]
    fn test_first_model_always_promotes() {
        assert_eq!(decide(1e9, None), PromotionDecision::FirstModel);
        assert!(decide(f64::NAN, None).promotes());
    }

    #[test]
    fn test_strictly_better_only() {
        let current = entry_with(&[("rmse", 2.0)]);
        assert!(decide(1.9, Some(&current)).promotes());
        assert!(!decide(2.0, Some(&current)).promotes());
        assert!(!decide(2.1, Some(&current)).promotes());
        assert!(!decide(f64::NAN, Some(&current)).promotes());
    }

    #[test]
    fn test_unscored_incumbent_is_replaced() {
        let current = entry_with(&[("training_samples", 100.0)]);
        assert_eq!(
            decide(5.0, Some(&current)),
            PromotionDecision::IncumbentUnscored
        );
    }

    #[tokio::test]
    async fn test_keyed_locks_serialize_same_id() {
        let locks = Arc::new(KeyedLocks::new());
        let id = ModelId::forecast("a", "x").unwrap();
        let other = ModelId::forecast("b", "x").unwrap();

        let guard = locks.lock(&id).await;
        // a different id is not blocked
        let _other_guard = locks.lock(&other).await;

        let locks2 = locks.clone();
        let id2 = id.clone();
        let waiter = tokio::spawn(async move {
            let _g = locks2.lock(&id2).await;
        });
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());
        drop(guard);
        waiter.await.unwrap();
    }
}
