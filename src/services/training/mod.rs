use crate::algorithms::trainer::StopHandle;
use crate::algorithms::{FunkSvd, RatingModel};
use crate::config::SvdConfig;
use crate::models::*;
use crate::utils::metrics::EvaluationMetrics;
use anyhow::{Context, Result};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{info, warn};

/// Owns the served model and retrains it off the async runtime.
///
/// Readers keep seeing the previous model until a fit succeeds, then the
/// new one is swapped in under the write lock.
pub struct TrainingService {
    model: Arc<RwLock<FunkSvd>>,
    config: Arc<SvdConfig>,
    runs: Arc<RwLock<HashMap<u64, StopHandle>>>,
    next_run: Arc<AtomicU64>,
    last_report: Arc<RwLock<Option<TrainingReport>>>,
}

impl TrainingService {
    pub fn new(config: SvdConfig) -> Result<Self> {
        let model = FunkSvd::new(config.clone()).context("invalid training configuration")?;

        Ok(Self {
            model: Arc::new(RwLock::new(model)),
            config: Arc::new(config),
            runs: Arc::new(RwLock::new(HashMap::new())),
            next_run: Arc::new(AtomicU64::new(0)),
            last_report: Arc::new(RwLock::new(None)),
        })
    }

    pub fn config(&self) -> &SvdConfig {
        &self.config
    }

    /// Fit a fresh model on a blocking thread.
    ///
    /// Each finished epoch is sent on `progress` when given. Every call gets
    /// its own stop flag, registered until the fit returns.
    pub async fn train(
        &self,
        train: Vec<Rating>,
        validation: Option<Vec<Rating>>,
        progress: Option<mpsc::UnboundedSender<EpochMetrics>>,
    ) -> Result<TrainingReport> {
        let config = (*self.config).clone();
        let run_id = self.next_run.fetch_add(1, Ordering::SeqCst);
        let stop = StopHandle::new();
        self.runs.write().await.insert(run_id, stop.clone());

        info!("Starting training run {} on {} ratings", run_id, train.len());

        let outcome = tokio::task::spawn_blocking(move || -> crate::Result<_> {
            let mut model = FunkSvd::new(config)?;
            let mut observer = |metrics: &EpochMetrics| {
                if let Some(tx) = &progress {
                    if tx.send(metrics.clone()).is_err() {
                        warn!("Progress receiver dropped at epoch {}", metrics.epoch);
                    }
                }
            };
            let report = model.fit_with(&train, validation.as_deref(), &mut observer, &stop)?;
            Ok((model, report))
        })
        .await;
        self.runs.write().await.remove(&run_id);
        let (model, report) = outcome.context("training task failed to complete")??;

        {
            let mut current = self.model.write().await;
            *current = model;
        }
        {
            let mut last = self.last_report.write().await;
            *last = Some(report.clone());
        }

        info!(
            "Training finished after {} epochs ({:?})",
            report.epochs_run, report.stop_reason
        );
        Ok(report)
    }

    /// Ask every fit currently running on this service to stop at its next
    /// epoch boundary. Fits started afterwards are unaffected.
    pub async fn cancel(&self) {
        let runs = self.runs.read().await;
        info!("Cancelling {} running fit(s)", runs.len());
        for stop in runs.values() {
            stop.stop();
        }
    }

    pub async fn predict(&self, user_id: &ExternalId, item_id: &ExternalId) -> f64 {
        let model = self.model.read().await;
        model.predict_pair(user_id, item_id)
    }

    pub async fn predict_batch(&self, table: &[Rating]) -> Vec<f64> {
        let model = self.model.read().await;
        model.predict(table)
    }

    pub async fn evaluate(&self, table: &[Rating]) -> EvaluationMetrics {
        let model = self.model.read().await;
        model.evaluate(table)
    }

    pub async fn recommend(
        &self,
        user_id: &ExternalId,
        n: usize,
        exclude: &HashSet<ExternalId>,
    ) -> Result<Vec<(ExternalId, f64)>> {
        let model = self.model.read().await;
        Ok(model.recommend(user_id, n, exclude)?)
    }

    pub async fn snapshot(&self) -> Option<ModelSnapshot> {
        let model = self.model.read().await;
        model.snapshot()
    }

    pub async fn last_report(&self) -> Option<TrainingReport> {
        self.last_report.read().await.clone()
    }

    pub async fn get_training_stats(&self) -> HashMap<String, serde_json::Value> {
        let model = self.model.read().await;
        let report = self.last_report.read().await;

        let mut stats = HashMap::new();
        stats.insert("fitted".to_string(), serde_json::Value::Bool(model.is_fitted()));
        stats.insert(
            "user_count".to_string(),
            serde_json::Value::Number(model.users().len().into()),
        );
        stats.insert(
            "item_count".to_string(),
            serde_json::Value::Number(model.items().len().into()),
        );
        if let Some(report) = report.as_ref() {
            stats.insert(
                "epochs_run".to_string(),
                serde_json::Value::Number(report.epochs_run.into()),
            );
            stats.insert(
                "stop_reason".to_string(),
                serde_json::to_value(report.stop_reason).unwrap_or(serde_json::Value::Null),
            );
        }

        stats
    }
}

impl Clone for TrainingService {
    fn clone(&self) -> Self {
        Self {
            model: self.model.clone(),
            config: self.config.clone(),
            runs: self.runs.clone(),
            next_run: self.next_run.clone(),
            last_report: self.last_report.clone(),
        }
    }
}
