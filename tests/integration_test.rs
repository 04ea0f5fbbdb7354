use funkrec::dataset::{load_ratings_csv, write_predictions_csv};
use funkrec::services::training::TrainingService;
use funkrec::utils::clamp_rating;
use funkrec::*;
use std::io::Write;
use tokio::sync::mpsc;

fn checkerboard() -> Vec<Rating> {
    vec![
        Rating::new(0, 0, 5.0),
        Rating::new(0, 1, 1.0),
        Rating::new(1, 0, 1.0),
        Rating::new(1, 1, 5.0),
    ]
}

/// Ratings generated from a rank-1 user/item structure.
fn rank_one_table() -> Vec<Rating> {
    let user_scale = [0.2, 0.5, 0.8, 1.0, 0.4, 0.9];
    let item_scale = [1.0, 0.3, 0.7, 0.5, 0.9];
    let mut rows = Vec::new();
    for (u, a) in user_scale.iter().enumerate() {
        for (i, b) in item_scale.iter().enumerate() {
            rows.push(Rating::new(u as i64, i as i64, 1.0 + 4.0 * a * b));
        }
    }
    rows
}

#[test]
fn test_runs_exactly_n_epochs() {
    let config = SvdConfig::default().with_factors(3).with_epochs(7);
    let mut model = FunkSvd::new(config).unwrap();
    let train = vec![
        Rating::new(1, 1, 4.0),
        Rating::new(1, 2, 2.0),
        Rating::new(2, 2, 3.0),
    ];

    let report = model.fit(&train, None).unwrap();

    assert_eq!(report.epochs_run, 7);
    assert_eq!(report.updates, 21);
    assert_eq!(report.history.len(), 7);
    assert_eq!(report.stop_reason, StopReason::MaxEpochsReached);
}

#[test]
fn test_fit_is_deterministic_without_shuffle() {
    let config = SvdConfig::default().with_factors(4).with_epochs(25);
    let mut first = FunkSvd::new(config.clone()).unwrap();
    let mut second = FunkSvd::new(config).unwrap();

    first.fit(&rank_one_table(), None).unwrap();
    second.fit(&rank_one_table(), None).unwrap();

    assert_eq!(first.params(), second.params());
}

#[test]
fn test_seeded_shuffle_is_reproducible() {
    let config = SvdConfig::default()
        .with_factors(4)
        .with_epochs(10)
        .with_shuffle(true)
        .with_seed(11);
    let mut first = FunkSvd::new(config.clone()).unwrap();
    let mut second = FunkSvd::new(config).unwrap();

    first.fit(&rank_one_table(), None).unwrap();
    second.fit(&rank_one_table(), None).unwrap();

    assert_eq!(first.params(), second.params());
}

#[test]
fn test_predictions_stay_in_rating_range() {
    let config = SvdConfig::default()
        .with_factors(2)
        .with_epochs(50)
        .with_learning_rate(0.05)
        .with_rating_range(1.0, 3.0);
    let mut model = FunkSvd::new(config).unwrap();
    let train = vec![
        Rating::new("a", "x", 5.0),
        Rating::new("a", "y", 5.0),
        Rating::new("b", "x", 5.0),
    ];
    model.fit(&train, None).unwrap();

    // Training never clamps, so the raw estimate sits near 5.
    assert_eq!(model.predict_pair(&"a".into(), &"x".into()), 3.0);
    for value in model.predict(&rank_one_table()) {
        assert!((1.0..=3.0).contains(&value));
    }
}

#[test]
fn test_unknown_identifiers_fall_back() {
    let mut model = FunkSvd::new(SvdConfig::default().with_factors(2).with_epochs(10)).unwrap();
    model.fit(&rank_one_table(), None).unwrap();
    let fallback = clamp_rating(model.global_bias(), 1.0, 5.0);

    let table = vec![
        Rating::new(100, 0, 3.0),
        Rating::new(0, 100, 3.0),
        Rating::new("ghost", "phantom", 3.0),
    ];
    assert_eq!(model.predict(&table), vec![fallback; 3]);
}

#[test]
fn test_rmse_dominates_mae() {
    let mut model = FunkSvd::new(SvdConfig::default().with_factors(2).with_epochs(3)).unwrap();
    model.fit(&rank_one_table(), None).unwrap();

    let metrics = model.evaluate(&rank_one_table());
    assert!(metrics.mae >= 0.0);
    assert!(metrics.rmse >= metrics.mae);
    assert_eq!(metrics.evaluated, 30);
    assert_eq!(metrics.skipped, 0);
}

#[test]
fn test_training_loss_decreases_on_rank_one_data() {
    let config = SvdConfig::default()
        .with_factors(1)
        .with_epochs(30)
        .with_learning_rate(0.01)
        .with_regularization(0.0);
    let mut model = FunkSvd::new(config).unwrap();

    let report = model.fit(&rank_one_table(), None).unwrap();
    let mse: Vec<f64> = report.history.iter().map(|m| m.train_mse).collect();

    let early = mse[..3].iter().sum::<f64>() / 3.0;
    let late = mse[27..].iter().sum::<f64>() / 3.0;
    assert!(late < early, "early {} late {}", early, late);
}

#[test]
fn test_early_stopping_restores_best_epoch() {
    // With no factors and a single record each epoch overshoots by half the
    // previous error: end-of-epoch estimates are 7.5, 3.75, 5.625, 4.6875.
    // Against a target of 5.4 validation improves through epoch 2 and
    // worsens at epoch 3.
    let config = SvdConfig::default()
        .with_factors(0)
        .with_epochs(20)
        .with_learning_rate(0.5)
        .with_regularization(0.0)
        .with_rating_range(0.0, 10.0)
        .with_global_bias_from_mean(false)
        .with_early_stopping(true);
    let mut model = FunkSvd::new(config).unwrap();

    let report = model
        .fit(&[Rating::new(0, 0, 5.0)], Some(&[Rating::new(0, 0, 5.4)][..]))
        .unwrap();

    assert_eq!(report.stop_reason, StopReason::EarlyStopped);
    assert_eq!(report.epochs_run, 4);
    assert_eq!(report.best_epoch, Some(2));

    let best_loss = report.best_validation_loss.unwrap();
    assert!((best_loss - 0.225 * 0.225).abs() < 1e-12);

    let retained = model.predict_pair(&0.into(), &0.into());
    assert!((retained - 5.625).abs() < 1e-12);
    assert!((model.global_bias() - 1.875).abs() < 1e-12);
}

#[test]
fn test_end_to_end_checkerboard() {
    let config = SvdConfig::default()
        .with_factors(2)
        .with_learning_rate(0.01)
        .with_regularization(0.0)
        .with_epochs(500)
        .with_rating_range(1.0, 5.0);
    let mut model = FunkSvd::new(config).unwrap();
    let train = checkerboard();

    model.fit(&train, None).unwrap();

    for row in &train {
        let estimate = model.predict_pair(&row.user_id, &row.item_id);
        assert!(
            (estimate - row.rating).abs() <= 0.3,
            "({}, {}) expected {} got {}",
            row.user_id,
            row.item_id,
            row.rating,
            estimate
        );
    }

    let unseen = model.predict_pair(&2.into(), &0.into());
    assert_eq!(unseen, clamp_rating(model.global_bias(), 1.0, 5.0));
}

#[test]
fn test_validation_rows_with_unknown_ids_are_skipped() {
    let config = SvdConfig::default().with_factors(2).with_epochs(3);
    let mut model = FunkSvd::new(config).unwrap();
    let validation = vec![Rating::new(0, 0, 5.0), Rating::new(9, 0, 5.0)];

    let report = model.fit(&checkerboard(), Some(validation.as_slice())).unwrap();
    let metrics = report.final_metrics().and_then(|m| m.validation).unwrap();

    assert_eq!(metrics.evaluated, 1);
    assert_eq!(metrics.skipped, 1);
}

#[test]
fn test_parallel_training_learns() {
    let config = SvdConfig::default()
        .with_factors(2)
        .with_epochs(40)
        .with_learning_rate(0.02)
        .with_parallel(2);
    let mut model = FunkSvd::new(config.clone()).unwrap();
    let report = model.fit(&rank_one_table(), None).unwrap();

    assert_eq!(report.epochs_run, 40);
    assert_eq!(report.updates, 40 * 30);
    let first = report.history[0].train_mse;
    let last = report.history[39].train_mse;
    assert!(last < first);

    let mut again = FunkSvd::new(config).unwrap();
    again.fit(&rank_one_table(), None).unwrap();
    assert_eq!(model.params(), again.params());
}

#[test]
fn test_csv_round_trip_through_model() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "u_id,i_id,rating,timestamp").unwrap();
    for (u, i, r, t) in [(1, 10, 4.0, 30), (1, 11, 2.0, 10), (2, 10, 5.0, 20), (3, 11, 1.0, 40)] {
        writeln!(file, "{},{},{},{}", u, i, r, t).unwrap();
    }

    let train = load_ratings_csv(file.path(), true).unwrap();
    assert_eq!(train[0].item_id, ExternalId::Int(11));

    let mut model = FunkSvd::new(SvdConfig::default().with_factors(2).with_epochs(5)).unwrap();
    model.fit(&train, None).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("predictions.csv");
    let predictions = model.predict(&train);
    write_predictions_csv(&out, &train, &predictions).unwrap();

    let written = std::fs::read_to_string(&out).unwrap();
    assert_eq!(written.lines().count(), train.len() + 1);
}

#[test]
fn test_observer_sees_every_epoch() {
    let mut model = FunkSvd::new(SvdConfig::default().with_factors(2).with_epochs(6)).unwrap();
    let mut seen = Vec::new();
    let mut observer = |metrics: &EpochMetrics| seen.push(metrics.epoch);

    model
        .fit_with(&checkerboard(), None, &mut observer, &StopHandle::new())
        .unwrap();

    assert_eq!(seen, vec![0, 1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn test_service_cancellation() {
    let config = SvdConfig::default().with_factors(2).with_epochs(200_000);
    let service = TrainingService::new(config).unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel::<EpochMetrics>();

    let canceller = service.clone();
    let watcher = tokio::spawn(async move {
        let mut count = 0usize;
        while let Some(metrics) = rx.recv().await {
            count += 1;
            if metrics.epoch == 1 {
                canceller.cancel().await;
            }
        }
        count
    });

    let report = service.train(checkerboard(), None, Some(tx)).await.unwrap();
    let streamed = watcher.await.unwrap();

    assert_eq!(report.stop_reason, StopReason::Cancelled);
    assert!(report.epochs_run >= 2);
    assert!(report.epochs_run < 200_000);
    assert_eq!(streamed, report.epochs_run);

    let value = service.predict(&0.into(), &0.into()).await;
    assert!((1.0..=5.0).contains(&value));
}
