use crate::error::{Result, SvdError};
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

pub const DEFAULT_INIT_SEED: u64 = 0x5EED_F00D;

/// Per-component normal distribution for factor matrices.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalInit {
    pub mean: f64,
    pub std_dev: f64,
}

impl NormalInit {
    pub fn initialize<R: Rng + ?Sized>(&self, size: usize, rng: &mut R) -> Result<Array1<f64>> {
        let values = self.sample(size, rng)?;
        Ok(Array1::from_vec(values))
    }

    pub fn initialize_matrix<R: Rng + ?Sized>(
        &self,
        rows: usize,
        cols: usize,
        rng: &mut R,
    ) -> Result<Array2<f64>> {
        let values = self.sample(rows * cols, rng)?;
        Array2::from_shape_vec((rows, cols), values)
            .map_err(|e| SvdError::InvalidConfiguration(e.to_string()))
    }

    fn sample<R: Rng + ?Sized>(&self, size: usize, rng: &mut R) -> Result<Vec<f64>> {
        let normal = Normal::new(self.mean, self.std_dev)
            .map_err(|e| SvdError::InvalidConfiguration(format!("normal init: {}", e)))?;
        Ok((0..size).map(|_| normal.sample(&mut *rng)).collect())
    }
}

pub fn init_rng(seed: Option<u64>) -> StdRng {
    StdRng::seed_from_u64(seed.unwrap_or(DEFAULT_INIT_SEED))
}
