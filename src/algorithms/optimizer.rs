use crate::algorithms::params::ParameterStore;
use crate::models::IndexedRating;
use ndarray::{ArrayViewMut1, Zip};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepOutcome {
    pub error: f64,
    pub penalty: f64,
}

/// Plain per-record stochastic gradient descent on the regularized squared
/// error. No momentum, no mini-batches.
#[derive(Debug, Clone, Copy)]
pub struct Sgd {
    learning_rate: f64,
    regularization: f64,
}

impl Sgd {
    pub fn new(learning_rate: f64, regularization: f64) -> Self {
        Self {
            learning_rate,
            regularization,
        }
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    /// Update one user/item pair in place and return the pre-update error.
    ///
    /// Both factor rows are read before either is written, so the item row
    /// moves along the user row this record saw and vice versa. The global
    /// bias is only read; the caller owns its update.
    #[allow(clippy::too_many_arguments)]
    pub fn step(
        &self,
        mut user_row: ArrayViewMut1<'_, f64>,
        user_bias: &mut f64,
        mut item_row: ArrayViewMut1<'_, f64>,
        item_bias: &mut f64,
        global_bias: f64,
        rating: f64,
    ) -> StepOutcome {
        let lr = self.learning_rate;
        let reg = self.regularization;

        let prediction = global_bias + *user_bias + *item_bias + user_row.dot(&item_row);
        let error = rating - prediction;
        let penalty = user_row.dot(&user_row)
            + item_row.dot(&item_row)
            + user_bias.powi(2)
            + item_bias.powi(2);

        let bu = *user_bias;
        let bi = *item_bias;
        *user_bias += lr * (error - reg * bu);
        *item_bias += lr * (error - reg * bi);

        Zip::from(&mut user_row)
            .and(&mut item_row)
            .for_each(|p, q| {
                let p_old = *p;
                let q_old = *q;
                *p += lr * (error * q_old - reg * p_old);
                *q += lr * (error * p_old - reg * q_old);
            });

        StepOutcome { error, penalty }
    }

    pub(crate) fn update(&self, params: &mut ParameterStore, record: &IndexedRating) -> StepOutcome {
        let global_bias = params.global_bias;
        let outcome = self.step(
            params.user_factors.row_mut(record.user),
            &mut params.user_bias[record.user],
            params.item_factors.row_mut(record.item),
            &mut params.item_bias[record.item],
            global_bias,
            record.rating,
        );
        params.global_bias += self.learning_rate * outcome.error;
        outcome
    }
}
