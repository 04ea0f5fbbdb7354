use crate::config::SvdConfig;
use crate::utils::metrics::EvaluationMetrics;
use chrono::{DateTime, Utc};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque user or item identifier as supplied by the data layer.
///
/// Text that is the canonical decimal form of an `i64` ("7", "-12") is held
/// as `Int`, so `ExternalId::from("7") == ExternalId::from(7)`. Any other
/// text ("007", "+7") stays a distinct `Str`. Serde reads JSON strings as
/// `Str` without this normalization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExternalId {
    Int(i64),
    Str(String),
}

impl ExternalId {
    pub fn parse(raw: &str) -> Self {
        Self::from(raw.trim())
    }

    fn canonical_int(text: &str) -> Option<i64> {
        text.parse::<i64>()
            .ok()
            .filter(|value| value.to_string() == text)
    }
}

impl fmt::Display for ExternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExternalId::Int(value) => write!(f, "{}", value),
            ExternalId::Str(value) => write!(f, "{}", value),
        }
    }
}

impl From<i64> for ExternalId {
    fn from(value: i64) -> Self {
        ExternalId::Int(value)
    }
}

impl From<i32> for ExternalId {
    fn from(value: i32) -> Self {
        ExternalId::Int(value as i64)
    }
}

impl From<u32> for ExternalId {
    fn from(value: u32) -> Self {
        ExternalId::Int(value as i64)
    }
}

impl From<&str> for ExternalId {
    fn from(value: &str) -> Self {
        match Self::canonical_int(value) {
            Some(number) => ExternalId::Int(number),
            None => ExternalId::Str(value.to_string()),
        }
    }
}

impl From<String> for ExternalId {
    fn from(value: String) -> Self {
        match Self::canonical_int(&value) {
            Some(number) => ExternalId::Int(number),
            None => ExternalId::Str(value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rating {
    pub user_id: ExternalId,
    pub item_id: ExternalId,
    pub rating: f64,
    pub timestamp: Option<DateTime<Utc>>,
}

impl Rating {
    pub fn new(user_id: impl Into<ExternalId>, item_id: impl Into<ExternalId>, rating: f64) -> Self {
        Self {
            user_id: user_id.into(),
            item_id: item_id.into(),
            rating,
            timestamp: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexedRating {
    pub user: usize,
    pub item: usize,
    pub rating: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub value: f64,
    pub known_user: bool,
    pub known_item: bool,
}

impl Prediction {
    pub fn is_fallback(&self) -> bool {
        !(self.known_user && self.known_item)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub train_mse: f64,
    pub train_loss: f64,
    pub validation: Option<EvaluationMetrics>,
    pub elapsed_secs: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    MaxEpochsReached,
    EarlyStopped,
    Converged,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    pub epochs_run: usize,
    pub updates: u64,
    pub stop_reason: StopReason,
    pub best_epoch: Option<usize>,
    pub best_validation_loss: Option<f64>,
    pub history: Vec<EpochMetrics>,
}

impl TrainingReport {
    pub fn final_metrics(&self) -> Option<&EpochMetrics> {
        self.history.last()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSnapshot {
    pub config: SvdConfig,
    pub users: Vec<ExternalId>,
    pub items: Vec<ExternalId>,
    pub user_factors: Array2<f64>,
    pub item_factors: Array2<f64>,
    pub user_bias: Array1<f64>,
    pub item_bias: Array1<f64>,
    pub global_bias: f64,
    pub trained_at: DateTime<Utc>,
}
