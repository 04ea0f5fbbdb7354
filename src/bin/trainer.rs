use anyhow::{Context, Result};
use clap::Parser;
use funkrec::dataset::{data_dir_path, load_ratings_csv, resolve_in, write_predictions_csv};
use funkrec::services::training::TrainingService;
use funkrec::{init_tracing, Config, EpochMetrics};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Train a Funk-SVD rating model from CSV files", long_about = None)]
struct Args {
    #[arg(short, long, default_value = "config/default.toml")]
    config: String,

    /// Training ratings, overrides `data.train_path`
    #[arg(long)]
    train: Option<PathBuf>,

    #[arg(long)]
    validation: Option<PathBuf>,

    #[arg(long)]
    test: Option<PathBuf>,

    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Append one JSON object per epoch to this file
    #[arg(long)]
    metrics_out: Option<PathBuf>,

    /// Write test-set predictions as CSV
    #[arg(long)]
    predictions_out: Option<PathBuf>,
}

fn load_table(data_dir: &Path, path: &Path, sort_by_timestamp: bool) -> Result<Vec<funkrec::Rating>> {
    let path = resolve_in(data_dir, path);
    load_ratings_csv(&path, sort_by_timestamp)
        .with_context(|| format!("failed to load ratings from {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    std::env::set_var("RUST_LOG", &args.log_level);
    init_tracing();

    info!("Starting funkrec trainer");

    let mut config = if Path::new(&args.config).exists() {
        Config::from_file(&args.config).context("failed to load configuration")?
    } else {
        info!("Config file not found, using default configuration");
        Config::default()
    };
    if args.train.is_some() {
        config.data.train_path = args.train;
    }
    if args.validation.is_some() {
        config.data.validation_path = args.validation;
    }
    if args.test.is_some() {
        config.data.test_path = args.test;
    }

    info!("Training configuration loaded: {:?}", config.training);

    let data_dir = data_dir_path(config.data.data_dir.as_deref())?;
    let sort = config.data.sort_by_timestamp;
    let train_path = config
        .data
        .train_path
        .clone()
        .context("no training file given (use --train or data.train_path)")?;
    let train = load_table(&data_dir, &train_path, sort)?;
    let validation = match &config.data.validation_path {
        Some(path) => Some(load_table(&data_dir, path, sort)?),
        None => None,
    };
    let test = match &config.data.test_path {
        Some(path) => Some(load_table(&data_dir, path, sort)?),
        None => None,
    };

    let service = TrainingService::new(config.training.clone())?;

    let stopper = service.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current epoch");
            stopper.cancel().await;
        }
    });

    let (tx, mut rx) = mpsc::unbounded_channel::<EpochMetrics>();
    let metrics_out = args.metrics_out.clone();
    let writer = tokio::spawn(async move {
        let mut file = match &metrics_out {
            Some(path) => match tokio::fs::File::create(path).await {
                Ok(file) => Some(file),
                Err(e) => {
                    error!("Failed to create metrics file {}: {}", path.display(), e);
                    None
                }
            },
            None => None,
        };

        while let Some(metrics) = rx.recv().await {
            if let Some(out) = file.as_mut() {
                match serde_json::to_string(&metrics) {
                    Ok(mut line) => {
                        line.push('\n');
                        if let Err(e) = out.write_all(line.as_bytes()).await {
                            error!("Failed to write epoch metrics: {}", e);
                        }
                    }
                    Err(e) => error!("Failed to encode epoch metrics: {}", e),
                }
            }
        }

        if let Some(mut out) = file {
            if let Err(e) = out.flush().await {
                error!("Failed to flush metrics file: {}", e);
            }
        }
    });

    let report = service.train(train, validation, Some(tx)).await?;
    writer.await.context("metrics writer task failed")?;

    info!(
        "Training stopped: {:?} after {} epochs ({} updates)",
        report.stop_reason, report.epochs_run, report.updates
    );
    if let Some(best) = report.best_epoch {
        info!(
            "Best validation epoch {} with loss {:.5}",
            best,
            report.best_validation_loss.unwrap_or(f64::NAN)
        );
    }

    if let Some(test) = test {
        let metrics = service.evaluate(&test).await;
        info!(
            "Test RMSE {:.4}, MAE {:.4} over {} rows ({} skipped)",
            metrics.rmse, metrics.mae, metrics.evaluated, metrics.skipped
        );

        if let Some(path) = &args.predictions_out {
            let predictions = service.predict_batch(&test).await;
            write_predictions_csv(path, &test, &predictions)
                .with_context(|| format!("failed to write predictions to {}", path.display()))?;
            info!("Wrote {} predictions to {}", predictions.len(), path.display());
        }
    } else if args.predictions_out.is_some() {
        warn!("--predictions-out given without a test set, nothing written");
    }

    Ok(())
}
