pub mod rsi;

pub use rsi::*;

/// Simple moving average of the trailing `period` values
pub fn sma(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    let sum: f64 = values.iter().rev().take(period).sum();
    Some(sum / period as f64)
}

/// Sample standard deviation (n - 1) of the trailing `period` values
pub fn stddev(values: &[f64], period: usize) -> Option<f64> {
    if period < 2 || values.len() < period {
        return None;
    }
    let mean = sma(values, period)?;
    let variance = values
        .iter()
        .rev()
        .take(period)
        .map(|v| (v - mean).powi(2))
        .sum::<f64>()
        / (period - 1) as f64;

    Some(variance.sqrt())
}

/// Rolling sample standard deviation aligned with `values`.
///
/// Position `t` is NaN until `window` finite values ending at `t` exist.
pub fn rolling_stddev(values: &[f64], window: usize) -> Vec<f64> {
    (0..values.len())
        .map(|t| {
            if t + 1 < window {
                return f64::NAN;
            }
            let slice = &values[t + 1 - window..=t];
            if slice.iter().any(|v| !v.is_finite()) {
                return f64::NAN;
            }
            stddev(slice, window).unwrap_or(f64::NAN)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sma() {
        assert_eq!(sma(&[1.0, 2.0, 3.0, 4.0], 2), Some(3.5));
        assert_eq!(sma(&[1.0], 2), None);
    }

    #[test]
    fn test_rolling_stddev_warmup() {
        let values = [f64::NAN, 1.0, 2.0, 3.0, 4.0];
        let out = rolling_stddev(&values, 3);

        assert!(out[0].is_nan() && out[1].is_nan() && out[2].is_nan());
        assert!((out[3] - 1.0).abs() < 1e-12);
        assert!((out[4] - 1.0).abs() < 1e-12);
    }
}
