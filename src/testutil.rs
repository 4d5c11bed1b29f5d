//! Deterministic synthetic data shared by unit tests

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rust_decimal::Decimal;

use crate::features::FeatureMatrix;
use crate::types::{Bar, BarStream, Column, Regime, RegimeBar};

/// Box-Muller draw from N(0, 1)
pub fn gaussian_noise<R: Rng>(rng: &mut R) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

/// Repeating up / down / flat blocks of daily returns.
///
/// Returns the series and the block each bar came from
/// (0 = up, 1 = down, 2 = flat).
pub fn three_regime_returns(cycles: usize, block: usize, seed: u64) -> (Vec<f64>, Vec<usize>) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let drifts = [0.01, -0.01, 0.0];
    let mut returns = Vec::new();
    let mut truth = Vec::new();
    for _ in 0..cycles {
        for (regime, drift) in drifts.iter().enumerate() {
            for _ in 0..block {
                returns.push(drift + 0.002 * gaussian_noise(&mut rng));
                truth.push(regime);
            }
        }
    }
    (returns, truth)
}

pub fn single_column(name: &str, values: &[f64]) -> FeatureMatrix {
    let rows: Vec<Vec<f64>> = values.iter().map(|&v| vec![v]).collect();
    FeatureMatrix::from_rows(vec![name.to_string()], &rows).unwrap()
}

/// Price bars compounding the given log returns from 100
pub fn bars_from_returns(returns: &[f64]) -> Vec<Bar> {
    let mut price = 100.0f64;
    let mut bars = Vec::with_capacity(returns.len() + 1);
    let to_dec = |p: f64| Decimal::try_from(p).unwrap().round_dp(4);
    bars.push(Bar::new(to_dec(price), to_dec(price), to_dec(price), to_dec(price)));
    for r in returns {
        let next = price * r.exp();
        let high = price.max(next) * 1.001;
        let low = price.min(next) * 0.999;
        bars.push(Bar::new(to_dec(price), to_dec(high), to_dec(low), to_dec(next)));
        price = next;
    }
    bars
}

/// Annotated stream with Close/Regime and, when `gated`, confidence columns
pub fn regime_stream(closes: &[Decimal], regimes: &[Regime], confidence: Option<&[f64]>) -> BarStream {
    let mut columns = vec![Column::Close, Column::Regime];
    if confidence.is_some() {
        columns.push(Column::MostLikelyState);
        columns.push(Column::StateProbability);
    }
    let bars = closes
        .iter()
        .zip(regimes)
        .enumerate()
        .map(|(i, (&close, &regime))| RegimeBar {
            index: i,
            close: Some(close),
            regime: Some(regime),
            most_likely_state: confidence.map(|_| regime),
            state_probability: confidence.map(|c| c[i]),
            ..Default::default()
        })
        .collect();
    BarStream::new(columns, bars)
}

pub fn prices(values: &[i64]) -> Vec<Decimal> {
    values.iter().map(|&v| Decimal::from(v)).collect()
}
