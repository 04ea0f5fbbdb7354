use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub training: SvdConfig,
    pub data: DataConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    #[default]
    GlobalBias,
    PartialBiases,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SvdConfig {
    pub learning_rate: f64,
    pub regularization: f64,
    pub n_factors: usize,
    pub n_epochs: usize,
    pub min_rating: f64,
    pub max_rating: f64,
    pub early_stopping: bool,
    pub patience: usize,
    pub shuffle: bool,
    pub random_seed: Option<u64>,
    pub init_mean: f64,
    pub init_std_dev: f64,
    pub init_global_bias_from_mean: bool,
    pub convergence_tolerance: Option<f64>,
    pub parallel: bool,
    pub n_threads: usize,
    pub fallback: FallbackPolicy,
}

impl Default for SvdConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.005,
            regularization: 0.02,
            n_factors: 100,
            n_epochs: 20,
            min_rating: 1.0,
            max_rating: 5.0,
            early_stopping: false,
            patience: 1,
            shuffle: false,
            random_seed: None,
            init_mean: 0.0,
            init_std_dev: 0.1,
            init_global_bias_from_mean: true,
            convergence_tolerance: None,
            parallel: false,
            n_threads: 0,
            fallback: FallbackPolicy::GlobalBias,
        }
    }
}

impl SvdConfig {
    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    pub fn with_regularization(mut self, regularization: f64) -> Self {
        self.regularization = regularization;
        self
    }

    pub fn with_factors(mut self, n_factors: usize) -> Self {
        self.n_factors = n_factors;
        self
    }

    pub fn with_epochs(mut self, n_epochs: usize) -> Self {
        self.n_epochs = n_epochs;
        self
    }

    pub fn with_rating_range(mut self, min_rating: f64, max_rating: f64) -> Self {
        self.min_rating = min_rating;
        self.max_rating = max_rating;
        self
    }

    pub fn with_early_stopping(mut self, early_stopping: bool) -> Self {
        self.early_stopping = early_stopping;
        self
    }

    pub fn with_patience(mut self, patience: usize) -> Self {
        self.patience = patience;
        self
    }

    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.random_seed = Some(seed);
        self
    }

    pub fn with_init(mut self, mean: f64, std_dev: f64) -> Self {
        self.init_mean = mean;
        self.init_std_dev = std_dev;
        self
    }

    pub fn with_global_bias_from_mean(mut self, enabled: bool) -> Self {
        self.init_global_bias_from_mean = enabled;
        self
    }

    pub fn with_convergence_tolerance(mut self, tolerance: f64) -> Self {
        self.convergence_tolerance = Some(tolerance);
        self
    }

    pub fn with_parallel(mut self, n_threads: usize) -> Self {
        self.parallel = true;
        self.n_threads = n_threads;
        self
    }

    pub fn with_fallback(mut self, fallback: FallbackPolicy) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn worker_threads(&self) -> usize {
        if self.n_threads == 0 {
            num_cpus::get()
        } else {
            self.n_threads
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub data_dir: Option<PathBuf>,
    pub train_path: Option<PathBuf>,
    pub validation_path: Option<PathBuf>,
    pub test_path: Option<PathBuf>,
    pub sort_by_timestamp: bool,
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(
                config::Environment::with_prefix("FUNKREC")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}
