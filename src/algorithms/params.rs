//! Latent factors and biases of a factorization model.

use crate::algorithms::initializer::NormalInit;
use crate::error::{Result, SvdError};
use ndarray::{Array1, Array2, ArrayView1, ArrayViewMut1};
use rand::Rng;

/// Owns every trainable value: one factor row and one bias per user and per
/// item, plus the shared global bias.
///
/// Factor rows all have length `n_factors()`; a store with zero factors
/// predicts from biases alone.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterStore {
    pub(crate) user_factors: Array2<f64>,
    pub(crate) item_factors: Array2<f64>,
    pub(crate) user_bias: Array1<f64>,
    pub(crate) item_bias: Array1<f64>,
    pub(crate) global_bias: f64,
}

impl ParameterStore {
    pub fn empty(n_factors: usize) -> Self {
        Self {
            user_factors: Array2::zeros((0, n_factors)),
            item_factors: Array2::zeros((0, n_factors)),
            user_bias: Array1::zeros(0),
            item_bias: Array1::zeros(0),
            global_bias: 0.0,
        }
    }

    pub fn initialize<R: Rng + ?Sized>(
        n_users: usize,
        n_items: usize,
        n_factors: usize,
        method: &NormalInit,
        rng: &mut R,
    ) -> Result<Self> {
        let user_factors = method.initialize_matrix(n_users, n_factors, rng)?;
        let item_factors = method.initialize_matrix(n_items, n_factors, rng)?;

        Ok(Self {
            user_factors,
            item_factors,
            user_bias: Array1::zeros(n_users),
            item_bias: Array1::zeros(n_items),
            global_bias: 0.0,
        })
    }

    pub fn from_parts(
        user_factors: Array2<f64>,
        item_factors: Array2<f64>,
        user_bias: Array1<f64>,
        item_bias: Array1<f64>,
        global_bias: f64,
    ) -> Result<Self> {
        if user_factors.ncols() != item_factors.ncols() {
            return Err(SvdError::LengthMismatch {
                expected: user_factors.ncols(),
                found: item_factors.ncols(),
            });
        }
        if user_bias.len() != user_factors.nrows() {
            return Err(SvdError::LengthMismatch {
                expected: user_factors.nrows(),
                found: user_bias.len(),
            });
        }
        if item_bias.len() != item_factors.nrows() {
            return Err(SvdError::LengthMismatch {
                expected: item_factors.nrows(),
                found: item_bias.len(),
            });
        }

        Ok(Self {
            user_factors,
            item_factors,
            user_bias,
            item_bias,
            global_bias,
        })
    }

    pub fn n_users(&self) -> usize {
        self.user_factors.nrows()
    }

    pub fn n_items(&self) -> usize {
        self.item_factors.nrows()
    }

    pub fn n_factors(&self) -> usize {
        self.user_factors.ncols()
    }

    pub fn global_bias(&self) -> f64 {
        self.global_bias
    }

    pub fn set_global_bias(&mut self, value: f64) {
        self.global_bias = value;
    }

    pub fn user_factors(&self, user: usize) -> ArrayView1<'_, f64> {
        self.user_factors.row(user)
    }

    pub fn item_factors(&self, item: usize) -> ArrayView1<'_, f64> {
        self.item_factors.row(item)
    }

    pub fn user_factors_mut(&mut self, user: usize) -> ArrayViewMut1<'_, f64> {
        self.user_factors.row_mut(user)
    }

    pub fn item_factors_mut(&mut self, item: usize) -> ArrayViewMut1<'_, f64> {
        self.item_factors.row_mut(item)
    }

    pub fn user_bias(&self, user: usize) -> f64 {
        self.user_bias[user]
    }

    pub fn item_bias(&self, item: usize) -> f64 {
        self.item_bias[item]
    }

    pub fn user_bias_mut(&mut self, user: usize) -> &mut f64 {
        &mut self.user_bias[user]
    }

    pub fn item_bias_mut(&mut self, item: usize) -> &mut f64 {
        &mut self.item_bias[item]
    }

    pub fn user_factor_matrix(&self) -> &Array2<f64> {
        &self.user_factors
    }

    pub fn item_factor_matrix(&self) -> &Array2<f64> {
        &self.item_factors
    }

    pub fn user_bias_vector(&self) -> &Array1<f64> {
        &self.user_bias
    }

    pub fn item_bias_vector(&self) -> &Array1<f64> {
        &self.item_bias
    }

    pub fn score(&self, user: usize, item: usize) -> f64 {
        self.global_bias
            + self.user_bias[user]
            + self.item_bias[item]
            + self.user_factors.row(user).dot(&self.item_factors.row(item))
    }
}
