use std::fmt::Write as _;
use std::path::Path;

use chrono::{Duration, NaiveDate};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tempfile::tempdir;

use hmm_regime_trader::data::{load_bars, load_stream, write_stream};
use hmm_regime_trader::features::FeatureKind;
use hmm_regime_trader::{
    build_features, simulate, AppConfig, Column, MetricsCalculator, Regime, RegimeDetector, RegimeError, RegimeModel,
    SimulatorSettings,
};

const BLOCK: usize = 30;

/// Close prices drifting up, down and sideways in fixed blocks.
/// Returns the csv text and the drift block of every bar.
fn synthetic_csv(cycles: usize, seed: u64) -> (String, Vec<usize>) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let drifts: [f64; 3] = [0.01, -0.01, 0.0];
    let start = NaiveDate::from_ymd_opt(2023, 1, 2).unwrap();

    let mut csv = String::from("Date,Open,High,Low,Close,Volume\n");
    let mut blocks = vec![2];
    let mut price = 100.0f64;
    writeln!(csv, "{},{:.4},{:.4},{:.4},{:.4},1000", start, price, price, price, price).unwrap();

    let mut day = 1;
    for _ in 0..cycles {
        for (block, drift) in drifts.iter().enumerate() {
            for _ in 0..BLOCK {
                let next = price * (drift + rng.gen_range(-0.004..0.004)).exp();
                writeln!(
                    csv,
                    "{},{:.4},{:.4},{:.4},{:.4},1000",
                    start + Duration::days(day),
                    price,
                    price.max(next) * 1.001,
                    price.min(next) * 0.999,
                    next
                )
                .unwrap();
                blocks.push(block);
                price = next;
                day += 1;
            }
        }
    }
    (csv, blocks)
}

fn write_csv(dir: &Path, contents: &str) -> std::path::PathBuf {
    let path = dir.join("bars.csv");
    std::fs::write(&path, contents).unwrap();
    path
}

#[test]
fn backtest_pipeline_labels_trends_and_trades_them() {
    let dir = tempdir().unwrap();
    let (csv, blocks) = synthetic_csv(4, 7);
    let bars = load_bars(&write_csv(dir.path(), &csv)).unwrap();
    assert_eq!(bars.len(), blocks.len());

    // labels are checked on returns alone
    let mut config = AppConfig::default();
    config.features.columns = vec![FeatureKind::LogReturn];
    let features = build_features(&bars, &config.features).unwrap();
    let fitted = RegimeModel::new(config.model.clone()).unwrap().fit(&features).unwrap();

    let report = fitted.report();
    assert!(report.log_likelihood.is_finite());
    assert_eq!(report.n_observations, features.clean().n_rows());

    let stream = fitted.annotate(&bars, &features).unwrap();
    assert_eq!(stream.len(), bars.len());
    // the first bar has no prior close to take a return from
    assert_eq!(stream.bars()[0].regime, None);
    assert!(stream.bars()[1..].iter().all(|b| b.regime.is_some()));

    // most bars inside the up and down drift blocks carry the matching label
    let mut hits = [0usize; 2];
    let mut totals = [0usize; 2];
    for bar in stream.bars() {
        let expected = match blocks[bar.index] {
            0 => (0, Regime::Uptrend),
            1 => (1, Regime::Downtrend),
            _ => continue,
        };
        if let Some(regime) = bar.regime {
            totals[expected.0] += 1;
            if regime == expected.1 {
                hits[expected.0] += 1;
            }
        }
    }
    for k in 0..2 {
        assert!(hits[k] as f64 >= 0.7 * totals[k] as f64, "{} of {}", hits[k], totals[k]);
    }

    let annotated = dir.path().join("annotated.csv");
    write_stream(&stream, &annotated).unwrap();
    let reloaded = load_stream(&annotated).unwrap();
    assert!(reloaded.has_column(Column::StateProbability));

    let settings = SimulatorSettings::default();
    let result = simulate(settings.clone(), &reloaded).unwrap();
    assert_eq!(result.skipped_rows, vec![0]);
    assert_eq!(result.equity_curve.len(), bars.len() - 1);
    assert!(!result.trades.is_empty());

    let realized: rust_decimal::Decimal = result.trades.iter().map(|t| t.pnl).sum();
    assert_eq!(result.final_equity, settings.initial_capital + realized);

    let summary = MetricsCalculator::calculate(&result, settings.periods_per_year);
    assert_eq!(summary.total_trades, result.trades.len() as u64);
    assert_eq!(summary.skipped_bars, 1);
    assert!(summary.max_drawdown_pct >= rust_decimal::Decimal::ZERO);
}

#[test]
fn gated_simulation_never_holds_against_the_model() {
    let dir = tempdir().unwrap();
    let (csv, _) = synthetic_csv(3, 21);
    let bars = load_bars(&write_csv(dir.path(), &csv)).unwrap();

    let config = AppConfig::default();
    let features = build_features(&bars, &config.features).unwrap();
    let fitted = RegimeModel::new(config.model.clone()).unwrap().fit(&features).unwrap();
    let stream = fitted.annotate(&bars, &features).unwrap();

    let gated = SimulatorSettings {
        confidence_threshold: Some(0.9),
        close_at_end: false,
        ..SimulatorSettings::default()
    };
    let result = simulate(gated, &stream).unwrap();

    for point in &result.equity_curve {
        if point.side.is_none() {
            continue;
        }
        let bar = &stream.bars()[point.index];
        assert_eq!(bar.most_likely_state, bar.regime);
        assert!(bar.state_probability.unwrap() >= 0.9);
    }
}

#[test]
fn detector_requires_fit_and_matching_features() {
    let dir = tempdir().unwrap();
    let (csv, _) = synthetic_csv(2, 3);
    let bars = load_bars(&write_csv(dir.path(), &csv)).unwrap();

    let config = AppConfig::default();
    let features = build_features(&bars, &config.features).unwrap();

    let mut detector = RegimeDetector::new(config.model.clone()).unwrap();
    assert!(matches!(detector.decode_states(&features), Err(RegimeError::NotFitted)));

    detector.fit(&features).unwrap();
    assert!(detector.is_fitted());
    assert_eq!(detector.decode_states(&features).unwrap().len(), features.clean().n_rows());

    let mut narrow = config.features.clone();
    narrow.columns.truncate(1);
    let other = build_features(&bars, &narrow).unwrap();
    assert!(matches!(
        detector.decode_states(&other),
        Err(RegimeError::FeatureMismatch { .. })
    ));
}
