use funkrec::services::training::TrainingService;
use funkrec::*;
use std::collections::HashSet;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    println!("🚀 funkrec basic usage");

    // 1. A tiny explicit-feedback table
    let users = ["ana", "ben", "cho", "dev"];
    let items = ["matrix", "alien", "amelie", "up", "heat"];
    let scores = [
        [5.0, 4.0, 1.0, 2.0, 5.0],
        [4.0, 5.0, 2.0, 1.0, 4.0],
        [1.0, 2.0, 5.0, 4.0, 1.0],
        [2.0, 1.0, 4.0, 5.0, 2.0],
    ];

    let mut train = Vec::new();
    let mut validation = Vec::new();
    for (u, user) in users.iter().enumerate() {
        for (i, item) in items.iter().enumerate() {
            let rating = Rating::new(*user, *item, scores[u][i]);
            if (u + i) % 5 == 0 {
                validation.push(rating);
            } else {
                train.push(rating);
            }
        }
    }
    println!("📦 {} training rows, {} validation rows", train.len(), validation.len());

    // 2. Configure the model
    let config = SvdConfig::default()
        .with_factors(3)
        .with_learning_rate(0.02)
        .with_epochs(200)
        .with_early_stopping(true)
        .with_patience(5)
        .with_seed(7);

    // 3. Train in the background while watching progress
    let service = TrainingService::new(config)?;
    let (tx, mut rx) = mpsc::unbounded_channel::<EpochMetrics>();
    let progress = tokio::spawn(async move {
        while let Some(metrics) = rx.recv().await {
            if metrics.epoch % 25 == 0 {
                println!(
                    "   epoch {:>3}: train loss {:.4}, validation rmse {:.4}",
                    metrics.epoch,
                    metrics.train_loss,
                    metrics.validation.map(|v| v.rmse).unwrap_or(f64::NAN)
                );
            }
        }
    });

    let report = service.train(train.clone(), Some(validation.clone()), Some(tx)).await?;
    progress.await?;
    println!(
        "✅ stopped after {} epochs ({:?}), best epoch {:?}",
        report.epochs_run, report.stop_reason, report.best_epoch
    );

    // 4. Predict held-out and unknown pairs
    for row in &validation {
        let estimate = service.predict(&row.user_id, &row.item_id).await;
        println!("🎯 {} x {}: actual {:.1}, predicted {:.2}", row.user_id, row.item_id, row.rating, estimate);
    }
    let unknown = service.predict(&"newcomer".into(), &"matrix".into()).await;
    println!("❓ unknown user falls back to {:.2}", unknown);

    // 5. Evaluate and recommend
    let metrics = service.evaluate(&validation).await;
    println!("📊 validation RMSE {:.4}, MAE {:.4}", metrics.rmse, metrics.mae);

    let seen: HashSet<ExternalId> = train
        .iter()
        .filter(|row| row.user_id == ExternalId::from("ana"))
        .map(|row| row.item_id.clone())
        .collect();
    let picks = service.recommend(&"ana".into(), 3, &seen).await?;
    println!("⭐ recommendations for ana: {:?}", picks);

    println!("📈 stats: {:?}", service.get_training_stats().await);
    Ok(())
}
