pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod algorithms;
pub mod dataset;
pub mod utils;

pub use algorithms::trainer::{EpochObserver, StopHandle};
pub use algorithms::{FunkSvd, RatingModel};
pub use config::{Config, DataConfig, FallbackPolicy, SvdConfig};
pub use error::{IdKind, Result, SvdError};
pub use models::*;
pub use utils::metrics::EvaluationMetrics;

/// Install the global `fmt` subscriber, filtered by `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}
