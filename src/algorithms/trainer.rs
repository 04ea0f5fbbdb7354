//! Epoch-by-epoch SGD driver.
//!
//! A run moves through `Initialized -> Epoch(e) -> {Converged, EarlyStopped,
//! MaxEpochsReached, Cancelled}`. Between epochs the only state carried is the
//! parameter store and the best-validation tracker; parameters are only ever
//! observed at epoch boundaries.

use crate::algorithms::optimizer::Sgd;
use crate::algorithms::parallel::{self, BlockGrid};
use crate::algorithms::params::ParameterStore;
use crate::config::SvdConfig;
use crate::error::{Result, SvdError};
use crate::models::{EpochMetrics, IndexedRating, StopReason, TrainingReport};
use crate::utils::clamp_rating;
use crate::utils::metrics::{regularized_loss, EvaluationMetrics, MetricsAccumulator};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

pub trait EpochObserver {
    fn on_epoch_end(&mut self, metrics: &EpochMetrics);
}

impl<F> EpochObserver for F
where
    F: FnMut(&EpochMetrics),
{
    fn on_epoch_end(&mut self, metrics: &EpochMetrics) {
        self(metrics)
    }
}

/// Cooperative cancellation flag, checked before every epoch.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ValidationSet {
    pub(crate) records: Vec<IndexedRating>,
    pub(crate) skipped: usize,
}

impl ValidationSet {
    /// Indices must already be resolved against the parameter store that
    /// [`ValidationSet::evaluate`] will see.
    pub(crate) fn new(records: Vec<IndexedRating>, skipped: usize) -> Self {
        Self { records, skipped }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn evaluate(&self, params: &ParameterStore, min_rating: f64, max_rating: f64) -> EvaluationMetrics {
        let mut acc = MetricsAccumulator::new();
        for record in &self.records {
            let prediction = clamp_rating(params.score(record.user, record.item), min_rating, max_rating);
            acc.push(record.rating, prediction);
        }
        acc.finish(self.skipped)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EarlyStoppingDecision {
    Improved,
    Stalled,
    Stop,
}

/// Tracks the best validation loss and counts non-improving epochs.
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience: usize,
    best_loss: f64,
    best_epoch: Option<usize>,
    stalled: usize,
}

impl EarlyStopping {
    pub fn new(patience: usize) -> Self {
        Self {
            patience: patience.max(1),
            best_loss: f64::INFINITY,
            best_epoch: None,
            stalled: 0,
        }
    }

    /// Only a strictly lower loss counts as an improvement.
    pub fn observe(&mut self, epoch: usize, loss: f64) -> EarlyStoppingDecision {
        if loss < self.best_loss {
            self.best_loss = loss;
            self.best_epoch = Some(epoch);
            self.stalled = 0;
            return EarlyStoppingDecision::Improved;
        }

        self.stalled += 1;
        if self.stalled >= self.patience {
            EarlyStoppingDecision::Stop
        } else {
            EarlyStoppingDecision::Stalled
        }
    }

    pub fn best_epoch(&self) -> Option<usize> {
        self.best_epoch
    }

    pub fn best_loss(&self) -> Option<f64> {
        self.best_epoch.map(|_| self.best_loss)
    }

    pub fn is_stalled(&self) -> bool {
        self.stalled > 0
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct SweepTotals {
    pub errors: MetricsAccumulator,
    pub penalty: f64,
}

pub(crate) struct Trainer<'a> {
    config: &'a SvdConfig,
    sgd: Sgd,
}

impl<'a> Trainer<'a> {
    pub(crate) fn new(config: &'a SvdConfig) -> Self {
        Self {
            config,
            sgd: Sgd::new(config.learning_rate, config.regularization),
        }
    }

    fn shuffle_rng(&self) -> StdRng {
        match self.config.random_seed {
            Some(seed) => StdRng::seed_from_u64(seed ^ 0x9E37_79B9_7F4A_7C15),
            None => StdRng::from_entropy(),
        }
    }

    /// Run SGD epochs over `train`, mutating `params` in place.
    ///
    /// On early stopping the parameters are rolled back to the checkpoint of
    /// the best validation epoch. On cancellation they stay at the last
    /// completed epoch. Every index in `train` must fit `params`.
    pub(crate) fn run(
        &self,
        params: &mut ParameterStore,
        train: &[IndexedRating],
        validation: Option<&ValidationSet>,
        observer: &mut dyn EpochObserver,
        stop: &StopHandle,
    ) -> Result<TrainingReport> {
        if train.is_empty() {
            return Err(SvdError::EmptyTrainingSet);
        }

        let config = self.config;
        let mut order: Vec<usize> = (0..train.len()).collect();
        let mut rng = self.shuffle_rng();

        let mut pool = if config.parallel {
            let threads = config.worker_threads();
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build()
                .map_err(|e| SvdError::InvalidConfiguration(format!("thread pool: {}", e)))?;
            let blocks = threads.min(params.n_users()).min(params.n_items()).max(1);
            info!("Parallel training with {} threads over {} blocks", threads, blocks);
            Some((pool, BlockGrid::new(params.n_users(), params.n_items(), blocks)))
        } else {
            None
        };

        let mut tracker = validation.map(|_| EarlyStopping::new(config.patience));
        let mut checkpoint: Option<ParameterStore> = None;
        let mut history = Vec::with_capacity(config.n_epochs);
        let mut stop_reason = StopReason::MaxEpochsReached;
        let mut updates = 0u64;
        let mut previous_loss: Option<f64> = None;

        for epoch in 0..config.n_epochs {
            if stop.is_stopped() {
                info!("Training cancelled before epoch {}", epoch);
                stop_reason = StopReason::Cancelled;
                break;
            }

            let started = Instant::now();
            if config.shuffle {
                order.shuffle(&mut rng);
            }

            let totals = match pool.as_mut() {
                Some((pool, grid)) => {
                    grid.fill(train, &order);
                    parallel::run_epoch(pool, &self.sgd, params, train, grid)
                }
                None => self.sweep(params, train, &order),
            };
            updates += train.len() as u64;

            let train_mse = totals.errors.mse();
            let train_loss = regularized_loss(
                train_mse,
                config.regularization,
                totals.penalty / train.len() as f64,
            );
            let validation_metrics =
                validation.map(|set| set.evaluate(params, config.min_rating, config.max_rating));

            let metrics = EpochMetrics {
                epoch,
                train_mse,
                train_loss,
                validation: validation_metrics,
                elapsed_secs: started.elapsed().as_secs_f64(),
            };
            log_epoch(&metrics, config.n_epochs);
            observer.on_epoch_end(&metrics);
            history.push(metrics);

            if let (Some(tracker), Some(val)) = (tracker.as_mut(), validation_metrics) {
                if val.evaluated == 0 {
                    warn!("Epoch {}: no validation rows with known identifiers", epoch);
                } else {
                    match tracker.observe(epoch, val.loss) {
                        EarlyStoppingDecision::Improved => {
                            if config.early_stopping {
                                checkpoint = Some(params.clone());
                            }
                        }
                        EarlyStoppingDecision::Stalled => {
                            debug!("Epoch {}: validation loss did not improve", epoch);
                        }
                        EarlyStoppingDecision::Stop => {
                            if config.early_stopping {
                                info!(
                                    "Early stopping after epoch {}; best epoch was {:?}",
                                    epoch,
                                    tracker.best_epoch()
                                );
                                stop_reason = StopReason::EarlyStopped;
                                break;
                            }
                        }
                    }
                }
            }

            if let Some(tolerance) = config.convergence_tolerance {
                if let Some(previous) = previous_loss {
                    if (previous - train_loss).abs() < tolerance {
                        info!("Converged after epoch {} (loss change below {})", epoch, tolerance);
                        stop_reason = StopReason::Converged;
                        break;
                    }
                }
                previous_loss = Some(train_loss);
            }
        }

        let rollback = config.early_stopping
            && stop_reason != StopReason::Cancelled
            && tracker.as_ref().map(|t| t.is_stalled()).unwrap_or(false);
        if rollback {
            if let Some(best) = checkpoint.take() {
                debug!("Restoring parameters from best validation epoch");
                *params = best;
            }
        }

        Ok(TrainingReport {
            epochs_run: history.len(),
            updates,
            stop_reason,
            best_epoch: tracker.as_ref().and_then(|t| t.best_epoch()),
            best_validation_loss: tracker.as_ref().and_then(|t| t.best_loss()),
            history,
        })
    }

    fn sweep(&self, params: &mut ParameterStore, train: &[IndexedRating], order: &[usize]) -> SweepTotals {
        let mut totals = SweepTotals::default();
        for &position in order {
            let outcome = self.sgd.update(params, &train[position]);
            totals.errors.push_error(outcome.error);
            totals.penalty += outcome.penalty;
        }
        totals
    }
}

fn log_epoch(metrics: &EpochMetrics, n_epochs: usize) {
    match &metrics.validation {
        Some(val) => info!(
            "Epoch {}/{} | train loss {:.5} | val loss {:.5} - val rmse {:.5} - val mae {:.5} | took {:.3}s",
            metrics.epoch + 1,
            n_epochs,
            metrics.train_loss,
            val.loss,
            val.rmse,
            val.mae,
            metrics.elapsed_secs
        ),
        None => info!(
            "Epoch {}/{} | train loss {:.5} - train rmse {:.5} | took {:.3}s",
            metrics.epoch + 1,
            n_epochs,
            metrics.train_loss,
            metrics.train_mse.sqrt(),
            metrics.elapsed_secs
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::initializer::{init_rng, NormalInit};

    fn indexed(rows: &[(usize, usize, f64)]) -> Vec<IndexedRating> {
        rows.iter()
            .map(|&(user, item, rating)| IndexedRating { user, item, rating })
            .collect()
    }

    fn fresh_params(n_users: usize, n_items: usize, k: usize) -> ParameterStore {
        let method = NormalInit { mean: 0.0, std_dev: 0.1 };
        ParameterStore::initialize(n_users, n_items, k, &method, &mut init_rng(Some(3))).unwrap()
    }

    #[test]
    fn test_early_stopping_tracker() {
        let mut tracker = EarlyStopping::new(1);
        assert_eq!(tracker.observe(0, 1.0), EarlyStoppingDecision::Improved);
        assert_eq!(tracker.observe(1, 0.5), EarlyStoppingDecision::Improved);
        assert_eq!(tracker.observe(2, 0.5), EarlyStoppingDecision::Stop);
        assert_eq!(tracker.best_epoch(), Some(1));
        assert_eq!(tracker.best_loss(), Some(0.5));
    }

    #[test]
    fn test_early_stopping_patience() {
        let mut tracker = EarlyStopping::new(2);
        tracker.observe(0, 1.0);
        assert_eq!(tracker.observe(1, 1.5), EarlyStoppingDecision::Stalled);
        assert_eq!(tracker.observe(2, 0.9), EarlyStoppingDecision::Improved);
        assert_eq!(tracker.observe(3, 0.95), EarlyStoppingDecision::Stalled);
        assert_eq!(tracker.observe(4, 0.95), EarlyStoppingDecision::Stop);
        assert_eq!(tracker.best_epoch(), Some(2));
    }

    #[test]
    fn test_runs_every_epoch_without_early_stopping() {
        let config = SvdConfig::default().with_factors(2).with_epochs(7);
        let train = indexed(&[(0, 0, 4.0), (0, 1, 3.0), (1, 0, 2.0)]);
        let mut params = fresh_params(2, 2, 2);

        let report = Trainer::new(&config)
            .run(&mut params, &train, None, &mut |_: &EpochMetrics| {}, &StopHandle::new())
            .unwrap();

        assert_eq!(report.epochs_run, 7);
        assert_eq!(report.updates, 21);
        assert_eq!(report.stop_reason, StopReason::MaxEpochsReached);
        assert!(report.best_epoch.is_none());
    }

    #[test]
    fn test_empty_training_set() {
        let config = SvdConfig::default();
        let mut params = fresh_params(0, 0, 2);
        let result = Trainer::new(&config).run(
            &mut params,
            &[],
            None,
            &mut |_: &EpochMetrics| {},
            &StopHandle::new(),
        );
        assert!(matches!(result, Err(SvdError::EmptyTrainingSet)));
    }

    #[test]
    fn test_cancellation_at_epoch_boundary() {
        let config = SvdConfig::default().with_factors(1).with_epochs(50);
        let train = indexed(&[(0, 0, 4.0), (1, 1, 2.0)]);
        let mut params = fresh_params(2, 2, 1);
        let stop = StopHandle::new();
        let observer_stop = stop.clone();

        let mut observer = |metrics: &EpochMetrics| {
            if metrics.epoch == 2 {
                observer_stop.stop();
            }
        };
        let report = Trainer::new(&config)
            .run(&mut params, &train, None, &mut observer, &stop)
            .unwrap();

        assert_eq!(report.epochs_run, 3);
        assert_eq!(report.stop_reason, StopReason::Cancelled);
        assert!(params.score(0, 0).is_finite());
    }

    #[test]
    fn test_convergence_tolerance() {
        let config = SvdConfig::default()
            .with_factors(0)
            .with_epochs(10_000)
            .with_learning_rate(0.1)
            .with_regularization(0.0)
            .with_convergence_tolerance(1e-9);
        let train = indexed(&[(0, 0, 4.0)]);
        let mut params = fresh_params(1, 1, 0);

        let report = Trainer::new(&config)
            .run(&mut params, &train, None, &mut |_: &EpochMetrics| {}, &StopHandle::new())
            .unwrap();

        assert_eq!(report.stop_reason, StopReason::Converged);
        assert!(report.epochs_run < 10_000);
        assert!((params.score(0, 0) - 4.0).abs() < 1e-3);
    }

    #[test]
    fn test_rollback_when_epochs_run_out_while_stalled() {
        // with k = 0 and lr 0.5 the estimate halves its distance to 5.0 each
        // epoch: 7.5, 3.75, 5.625, 4.6875, 5.15625. Against 5.4 the best
        // validation epoch is 2 and the last two epochs are worse.
        let config = SvdConfig::default()
            .with_factors(0)
            .with_learning_rate(0.5)
            .with_regularization(0.0)
            .with_rating_range(0.0, 10.0)
            .with_early_stopping(true)
            .with_patience(3)
            .with_epochs(5);
        let train = indexed(&[(0, 0, 5.0)]);
        let validation = ValidationSet::new(indexed(&[(0, 0, 5.4)]), 0);
        let mut params = fresh_params(1, 1, 0);

        let report = Trainer::new(&config)
            .run(&mut params, &train, Some(&validation), &mut |_: &EpochMetrics| {}, &StopHandle::new())
            .unwrap();

        assert_eq!(report.stop_reason, StopReason::MaxEpochsReached);
        assert_eq!(report.epochs_run, 5);
        assert_eq!(report.best_epoch, Some(2));
        assert!((params.score(0, 0) - 5.625).abs() < 1e-12);
        assert!((params.global_bias() - 1.875).abs() < 1e-12);

        let best_config = config.clone().with_early_stopping(false).with_epochs(3);
        let mut best = fresh_params(1, 1, 0);
        Trainer::new(&best_config)
            .run(&mut best, &train, None, &mut |_: &EpochMetrics| {}, &StopHandle::new())
            .unwrap();
        assert_eq!(params, best);
    }

    #[test]
    fn test_validation_metrics_are_logged() {
        let config = SvdConfig::default().with_factors(2).with_epochs(3);
        let train = indexed(&[(0, 0, 4.0), (1, 1, 2.0)]);
        let validation = ValidationSet::new(indexed(&[(0, 1, 3.0)]), 2);
        let mut params = fresh_params(2, 2, 2);
        let mut seen = Vec::new();

        let report = Trainer::new(&config)
            .run(
                &mut params,
                &train,
                Some(&validation),
                &mut |metrics: &EpochMetrics| seen.push(metrics.epoch),
                &StopHandle::new(),
            )
            .unwrap();

        assert_eq!(seen, vec![0, 1, 2]);
        let val = report.history[0].validation.unwrap();
        assert_eq!(val.evaluated, 1);
        assert_eq!(val.skipped, 2);
        assert!(report.best_epoch.is_some());
    }
}
