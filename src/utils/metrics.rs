//! Regression metrics over (true, predicted) rating pairs.
//!
//! Every function here returns `NaN` for empty input.

use crate::error::{Result, SvdError};
use serde::{Deserialize, Serialize};

/// Aggregate error of a model over one rating table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvaluationMetrics {
    pub loss: f64,
    pub rmse: f64,
    pub mae: f64,
    pub evaluated: usize,
    pub skipped: usize,
}

fn check_lengths(y_true: &[f64], y_pred: &[f64]) -> Result<()> {
    if y_true.len() != y_pred.len() {
        return Err(SvdError::LengthMismatch {
            expected: y_true.len(),
            found: y_pred.len(),
        });
    }
    Ok(())
}

pub fn mse(y_true: &[f64], y_pred: &[f64]) -> Result<f64> {
    check_lengths(y_true, y_pred)?;
    let mut acc = MetricsAccumulator::new();
    for (&t, &p) in y_true.iter().zip(y_pred) {
        acc.push(t, p);
    }
    Ok(acc.mse())
}

pub fn rmse(y_true: &[f64], y_pred: &[f64]) -> Result<f64> {
    Ok(mse(y_true, y_pred)?.sqrt())
}

pub fn mae(y_true: &[f64], y_pred: &[f64]) -> Result<f64> {
    check_lengths(y_true, y_pred)?;
    let mut acc = MetricsAccumulator::new();
    for (&t, &p) in y_true.iter().zip(y_pred) {
        acc.push(t, p);
    }
    Ok(acc.mae())
}

/// Squared error plus the L2 term: `mse + regularization * mean_penalty`.
pub fn regularized_loss(mse: f64, regularization: f64, mean_penalty: f64) -> f64 {
    mse + regularization * mean_penalty
}

pub fn evaluate(y_true: &[f64], y_pred: &[f64]) -> Result<EvaluationMetrics> {
    check_lengths(y_true, y_pred)?;
    let mut acc = MetricsAccumulator::new();
    for (&t, &p) in y_true.iter().zip(y_pred) {
        acc.push(t, p);
    }
    Ok(acc.finish(0))
}

#[derive(Debug, Clone, Default)]
pub struct MetricsAccumulator {
    sum_squared: f64,
    sum_absolute: f64,
    count: usize,
}

impl MetricsAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, truth: f64, prediction: f64) {
        self.push_error(truth - prediction);
    }

    pub fn push_error(&mut self, error: f64) {
        self.sum_squared += error * error;
        self.sum_absolute += error.abs();
        self.count += 1;
    }

    pub fn merge(&mut self, other: &MetricsAccumulator) {
        self.sum_squared += other.sum_squared;
        self.sum_absolute += other.sum_absolute;
        self.count += other.count;
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn mse(&self) -> f64 {
        if self.count == 0 {
            f64::NAN
        } else {
            self.sum_squared / self.count as f64
        }
    }

    pub fn mae(&self) -> f64 {
        if self.count == 0 {
            f64::NAN
        } else {
            self.sum_absolute / self.count as f64
        }
    }

    pub fn finish(&self, skipped: usize) -> EvaluationMetrics {
        let loss = self.mse();
        EvaluationMetrics {
            loss,
            rmse: loss.sqrt(),
            mae: self.mae(),
            evaluated: self.count,
            skipped,
        }
    }
}
