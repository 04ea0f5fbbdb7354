pub mod indexer;
pub mod initializer;
pub mod optimizer;
pub(crate) mod parallel;
pub mod params;
pub mod trainer;

use crate::config::{FallbackPolicy, SvdConfig};
use crate::error::{IdKind, Result, SvdError};
use crate::models::*;
use crate::utils::metrics::EvaluationMetrics;
use crate::utils::validation::{validate_config, validate_ratings};
use crate::utils::{clamp_rating, mean, top_k_indices};
use chrono::{DateTime, Utc};
use indexer::IdIndex;
use initializer::{init_rng, NormalInit};
use params::ParameterStore;
use std::collections::HashSet;
use tracing::{info, warn};
use trainer::{EpochObserver, StopHandle, Trainer, ValidationSet};

pub trait RatingModel: Send + Sync {
    /// Clamped estimate for one pair. Never fails; unknown identifiers get
    /// the model's fallback value.
    fn predict_pair(&self, user_id: &ExternalId, item_id: &ExternalId) -> f64;

    fn predict(&self, table: &[Rating]) -> Vec<f64> {
        table
            .iter()
            .map(|row| self.predict_pair(&row.user_id, &row.item_id))
            .collect()
    }
}

/// Biased matrix factorization trained with per-record SGD.
///
/// ```
/// use funkrec::{FunkSvd, Rating, SvdConfig, RatingModel};
///
/// let train = vec![Rating::new(1, 10, 4.0), Rating::new(2, 10, 2.0)];
/// let mut model = FunkSvd::new(SvdConfig::default().with_factors(4).with_epochs(5)).unwrap();
/// model.fit(&train, None).unwrap();
/// let estimate = model.predict_pair(&1.into(), &10.into());
/// assert!((1.0..=5.0).contains(&estimate));
/// ```
#[derive(Debug, Clone)]
pub struct FunkSvd {
    config: SvdConfig,
    users: IdIndex,
    items: IdIndex,
    params: ParameterStore,
    trained_at: Option<DateTime<Utc>>,
}

impl FunkSvd {
    pub fn new(config: SvdConfig) -> Result<Self> {
        validate_config(&config)?;
        Ok(Self {
            users: IdIndex::new(IdKind::User),
            items: IdIndex::new(IdKind::Item),
            params: ParameterStore::empty(config.n_factors),
            config,
            trained_at: None,
        })
    }

    pub fn config(&self) -> &SvdConfig {
        &self.config
    }

    pub fn users(&self) -> &IdIndex {
        &self.users
    }

    pub fn items(&self) -> &IdIndex {
        &self.items
    }

    pub fn params(&self) -> &ParameterStore {
        &self.params
    }

    pub fn global_bias(&self) -> f64 {
        self.params.global_bias()
    }

    pub fn is_fitted(&self) -> bool {
        self.trained_at.is_some()
    }

    pub fn fit(&mut self, train: &[Rating], validation: Option<&[Rating]>) -> Result<TrainingReport> {
        self.fit_with(train, validation, &mut |_: &EpochMetrics| {}, &StopHandle::new())
    }

    /// Fit from scratch, replacing any previous vocabulary and parameters.
    pub fn fit_with(
        &mut self,
        train: &[Rating],
        validation: Option<&[Rating]>,
        observer: &mut dyn EpochObserver,
        stop: &StopHandle,
    ) -> Result<TrainingReport> {
        if train.is_empty() {
            return Err(SvdError::EmptyTrainingSet);
        }
        validate_ratings(train)?;
        if let Some(rows) = validation {
            validate_ratings(rows)?;
        }

        let mut users = IdIndex::new(IdKind::User);
        let mut items = IdIndex::new(IdKind::Item);
        let indexed: Vec<IndexedRating> = train
            .iter()
            .map(|row| IndexedRating {
                user: users.insert(&row.user_id),
                item: items.insert(&row.item_id),
                rating: row.rating,
            })
            .collect();

        let validation_set = validation.map(|rows| index_known(&users, &items, rows));
        if let Some(set) = &validation_set {
            if set.skipped() > 0 {
                warn!(
                    "Skipping {} of {} validation rows with identifiers unseen in training",
                    set.skipped(),
                    set.skipped() + set.len()
                );
            }
        }

        let method = NormalInit {
            mean: self.config.init_mean,
            std_dev: self.config.init_std_dev,
        };
        let mut params = ParameterStore::initialize(
            users.len(),
            items.len(),
            self.config.n_factors,
            &method,
            &mut init_rng(self.config.random_seed),
        )?;
        if self.config.init_global_bias_from_mean {
            if let Some(global_mean) = mean(train.iter().map(|row| row.rating)) {
                params.set_global_bias(global_mean);
            }
        }

        info!(
            "Fitting on {} ratings ({} users, {} items, {} factors, {} epochs)",
            indexed.len(),
            users.len(),
            items.len(),
            self.config.n_factors,
            self.config.n_epochs
        );

        let report = Trainer::new(&self.config).run(
            &mut params,
            &indexed,
            validation_set.as_ref(),
            observer,
            stop,
        )?;

        self.users = users;
        self.items = items;
        self.params = params;
        self.trained_at = Some(Utc::now());
        Ok(report)
    }

    fn clamp(&self, value: f64) -> f64 {
        clamp_rating(value, self.config.min_rating, self.config.max_rating)
    }

    fn fallback(&self, user: Option<usize>, item: Option<usize>) -> f64 {
        let global = self.params.global_bias();
        match self.config.fallback {
            FallbackPolicy::GlobalBias => global,
            FallbackPolicy::PartialBiases => {
                global
                    + user.map(|u| self.params.user_bias(u)).unwrap_or(0.0)
                    + item.map(|i| self.params.item_bias(i)).unwrap_or(0.0)
            }
        }
    }

    pub fn predict_detailed(&self, user_id: &ExternalId, item_id: &ExternalId) -> Prediction {
        let user = self.users.get(user_id);
        let item = self.items.get(item_id);
        let raw = match (user, item) {
            (Some(u), Some(i)) => self.params.score(u, i),
            _ => self.fallback(user, item),
        };

        Prediction {
            value: self.clamp(raw),
            known_user: user.is_some(),
            known_item: item.is_some(),
        }
    }

    /// Like `predict_pair`, but reports unknown identifiers instead of
    /// falling back.
    pub fn try_predict_pair(&self, user_id: &ExternalId, item_id: &ExternalId) -> Result<f64> {
        let user = self.users.lookup(user_id)?;
        let item = self.items.lookup(item_id)?;
        Ok(self.clamp(self.params.score(user, item)))
    }

    pub fn evaluate(&self, table: &[Rating]) -> EvaluationMetrics {
        index_known(&self.users, &self.items, table).evaluate(
            &self.params,
            self.config.min_rating,
            self.config.max_rating,
        )
    }

    /// Best `n` items for a known user, highest estimate first.
    pub fn recommend(
        &self,
        user_id: &ExternalId,
        n: usize,
        exclude: &HashSet<ExternalId>,
    ) -> Result<Vec<(ExternalId, f64)>> {
        let user = self.users.lookup(user_id)?;

        let candidates: Vec<usize> = (0..self.items.len())
            .filter(|&i| {
                self.items
                    .external(i)
                    .map(|id| !exclude.contains(id))
                    .unwrap_or(false)
            })
            .collect();
        let scores: Vec<f64> = candidates
            .iter()
            .map(|&i| self.params.score(user, i))
            .collect();

        Ok(top_k_indices(&scores, n)
            .into_iter()
            .filter_map(|rank| {
                let item = candidates[rank];
                self.items
                    .external(item)
                    .map(|id| (id.clone(), self.clamp(scores[rank])))
            })
            .collect())
    }

    pub fn snapshot(&self) -> Option<ModelSnapshot> {
        let trained_at = self.trained_at?;
        Some(ModelSnapshot {
            config: self.config.clone(),
            users: self.users.vocabulary().to_vec(),
            items: self.items.vocabulary().to_vec(),
            user_factors: self.params.user_factor_matrix().clone(),
            item_factors: self.params.item_factor_matrix().clone(),
            user_bias: self.params.user_bias_vector().clone(),
            item_bias: self.params.item_bias_vector().clone(),
            global_bias: self.params.global_bias(),
            trained_at,
        })
    }

    pub fn from_snapshot(snapshot: ModelSnapshot) -> Result<Self> {
        validate_config(&snapshot.config)?;
        let users = IdIndex::from_vocabulary(IdKind::User, snapshot.users)?;
        let items = IdIndex::from_vocabulary(IdKind::Item, snapshot.items)?;
        let params = ParameterStore::from_parts(
            snapshot.user_factors,
            snapshot.item_factors,
            snapshot.user_bias,
            snapshot.item_bias,
            snapshot.global_bias,
        )?;

        if params.n_users() != users.len() {
            return Err(SvdError::LengthMismatch {
                expected: users.len(),
                found: params.n_users(),
            });
        }
        if params.n_items() != items.len() {
            return Err(SvdError::LengthMismatch {
                expected: items.len(),
                found: params.n_items(),
            });
        }
        if params.n_factors() != snapshot.config.n_factors {
            return Err(SvdError::LengthMismatch {
                expected: snapshot.config.n_factors,
                found: params.n_factors(),
            });
        }

        Ok(Self {
            config: snapshot.config,
            users,
            items,
            params,
            trained_at: Some(snapshot.trained_at),
        })
    }
}

impl RatingModel for FunkSvd {
    fn predict_pair(&self, user_id: &ExternalId, item_id: &ExternalId) -> f64 {
        self.predict_detailed(user_id, item_id).value
    }
}

fn index_known(users: &IdIndex, items: &IdIndex, rows: &[Rating]) -> ValidationSet {
    let mut records = Vec::with_capacity(rows.len());
    let mut skipped = 0;
    for row in rows {
        match (users.get(&row.user_id), items.get(&row.item_id)) {
            (Some(user), Some(item)) => records.push(IndexedRating {
                user,
                item,
                rating: row.rating,
            }),
            _ => skipped += 1,
        }
    }
    ValidationSet::new(records, skipped)
}
