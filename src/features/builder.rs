use ndarray::Array2;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

use super::FeatureMatrix;
use crate::config::FeatureSettings;
use crate::error::{RegimeError, Result};
use crate::indicators::{rolling_stddev, RSI};
use crate::types::Bar;

/// Observation columns derivable from OHLC bars
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKind {
    /// ln(close_t / close_t-1)
    LogReturn,
    /// Rolling sample std of log returns
    Volatility,
    /// (high - low) / close
    Range,
    Rsi,
}

impl FeatureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureKind::LogReturn => "log_return",
            FeatureKind::Volatility => "volatility",
            FeatureKind::Range => "range",
            FeatureKind::Rsi => "rsi",
        }
    }
}

/// Derive the configured feature columns, one row per bar.
///
/// Warm-up rows hold NaN and are expected to be removed with
/// [`FeatureMatrix::clean`].
pub fn build_features(bars: &[Bar], settings: &FeatureSettings) -> Result<FeatureMatrix> {
    if settings.columns.is_empty() {
        return Err(RegimeError::InvalidParameter("no feature columns selected".to_string()));
    }

    let closes: Vec<f64> = bars
        .iter()
        .map(|b| b.close.to_f64().unwrap_or(f64::NAN))
        .collect();
    let returns = log_returns(&closes);

    let mut columns = Vec::with_capacity(settings.columns.len());
    let mut series: Vec<Vec<f64>> = Vec::with_capacity(settings.columns.len());

    for kind in &settings.columns {
        let values = match kind {
            FeatureKind::LogReturn => returns.clone(),
            FeatureKind::Volatility => rolling_stddev(&returns, settings.volatility_window),
            FeatureKind::Range => bars
                .iter()
                .map(|b| {
                    let close = b.close.to_f64().unwrap_or(f64::NAN);
                    let range = b.range().to_f64().unwrap_or(f64::NAN);
                    if close > 0.0 {
                        range / close
                    } else {
                        f64::NAN
                    }
                })
                .collect(),
            FeatureKind::Rsi => {
                let mut rsi = RSI::new(settings.rsi_period);
                closes
                    .iter()
                    .map(|&c| rsi.update(c).unwrap_or(f64::NAN))
                    .collect()
            }
        };
        columns.push(kind.as_str().to_string());
        series.push(values);
    }

    let values = Array2::from_shape_fn((bars.len(), series.len()), |(i, j)| series[j][i]);
    FeatureMatrix::new(columns, (0..bars.len()).collect(), values)
}

pub fn log_returns(closes: &[f64]) -> Vec<f64> {
    (0..closes.len())
        .map(|t| {
            if t == 0 || closes[t - 1] <= 0.0 || closes[t] <= 0.0 {
                f64::NAN
            } else {
                (closes[t] / closes[t - 1]).ln()
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn bars_from_closes(closes: &[i64]) -> Vec<Bar> {
        closes
            .iter()
            .map(|&c| {
                let c = Decimal::from(c);
                Bar::new(c, c + Decimal::ONE, c - Decimal::ONE, c)
            })
            .collect()
    }

    #[test]
    fn test_default_features_warm_up_then_clean() {
        let bars = bars_from_closes(&[100, 101, 102, 101, 103, 104, 103, 105]);
        let features = build_features(&bars, &FeatureSettings::default()).unwrap();

        assert_eq!(features.columns(), &["log_return".to_string(), "volatility".to_string()]);
        assert_eq!(features.n_rows(), bars.len());

        // first return needs one prior bar, the 5-bar volatility five returns
        let clean = features.clean();
        assert_eq!(clean.rows().first(), Some(&5));
        assert_eq!(clean.n_rows(), 3);

        let expected = (101.0f64 / 100.0).ln();
        assert!((features.values()[[1, 0]] - expected).abs() < 1e-12);
    }

    #[test]
    fn test_range_and_rsi_columns() {
        let settings = FeatureSettings {
            columns: vec![FeatureKind::Range, FeatureKind::Rsi],
            volatility_window: 5,
            rsi_period: 2,
        };
        let bars = bars_from_closes(&[10, 11, 12, 13]);
        let features = build_features(&bars, &settings).unwrap();

        assert!((features.values()[[0, 0]] - 0.2).abs() < 1e-12);
        assert!(features.values()[[1, 1]].is_nan());
        assert_eq!(features.values()[[2, 1]], 100.0);
    }
}
