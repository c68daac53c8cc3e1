//! Detached training runs
//!
//! Outcomes are only logged and counted; nothing is sent back to the caller
//! that submitted the run.

use super::ModelService;
use crate::error::Result;
use crate::health::components;
use crate::models::{ModelId, TrainOutcome};
use crate::store::ModelKind;
use std::any::Any;
use std::future::Future;
use tokio::task::JoinError;
use tracing::error;

impl ModelService {
    /// Run `training` on the runtime without awaiting it
    ///
    /// The run executes in its own task so a panic inside it surfaces as a
    /// `JoinError` here instead of tearing down the supervising task.
    pub(super) fn spawn_training<F>(&self, kind: ModelKind, model_id: ModelId, training: F)
    where
        F: Future<Output = Result<TrainOutcome>> + Send + 'static,
    {
        let service = self.clone();
        self.inner.metrics.training_started();

        tokio::spawn(async move {
            let joined = tokio::spawn(training).await;
            service.finish_background(kind, &model_id, joined).await;
        });
    }

    async fn finish_background(
        &self,
        kind: ModelKind,
        model_id: &ModelId,
        joined: std::result::Result<Result<TrainOutcome>, JoinError>,
    ) {
        self.inner.metrics.training_finished();
        let health = &self.inner.health;

        match joined {
            Ok(Ok(_)) => health.set_healthy(components::TRAINER).await,
            Ok(Err(e)) => {
                // already logged and counted by the training run
                health
                    .set_degraded(
                        components::TRAINER,
                        format!("last {} training for '{}' failed: {}", kind, model_id, e),
                    )
                    .await;
            }
            Err(join_error) => {
                let reason = if join_error.is_panic() {
                    format!("panicked: {}", panic_message(join_error.into_panic()))
                } else {
                    "cancelled".to_string()
                };
                error!(
                    kind = %kind,
                    model_id = %model_id,
                    reason = %reason,
                    "Background training task aborted"
                );
                self.inner
                    .metrics
                    .record_training(kind, "failed", std::time::Duration::ZERO);
                self.inner
                    .logger
                    .log_training_failed(kind, model_id, &reason);
                health
                    .set_degraded(
                        components::TRAINER,
                        format!("last {} training for '{}' {}", kind, model_id, reason),
                    )
                    .await;
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
