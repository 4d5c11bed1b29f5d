use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::features::FeatureKind;
use crate::ml::hmm::{CovarianceKind, LabelStrategy};

/// Top-level configuration, loaded from TOML and `REGIME__*` env vars
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub model: ModelSettings,
    pub simulator: SimulatorSettings,
    pub features: FeatureSettings,
}

impl AppConfig {
    /// Layer an optional config file under environment overrides.
    ///
    /// `REGIME__MODEL__STATE_COUNT=4` overrides `model.state_count`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::from(path).required(false))
            .add_source(
                Environment::with_prefix("REGIME")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        settings.try_deserialize()
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        // Model validation
        if let Err(e) = self.model.validate() {
            errors.push(e);
        }

        // Simulator validation
        let sim = &self.simulator;
        if sim.initial_capital <= Decimal::ZERO {
            errors.push("initial_capital must be > 0".to_string());
        }
        // zero stop or zero risk is allowed and sizes every entry at one unit
        if sim.stop_fraction < Decimal::ZERO || sim.stop_fraction >= Decimal::ONE {
            errors.push("stop_fraction must be in [0, 1)".to_string());
        }
        if sim.risk_percent < Decimal::ZERO || sim.risk_percent > Decimal::ONE {
            errors.push("risk_percent must be in [0, 1]".to_string());
        }
        if let Some(threshold) = sim.confidence_threshold {
            if !(0.0..=1.0).contains(&threshold) {
                errors.push("confidence_threshold must be between 0 and 1".to_string());
            }
        }
        if sim.fee_rate < Decimal::ZERO || sim.fee_rate >= Decimal::ONE {
            errors.push("fee_rate must be in [0, 1)".to_string());
        }
        if sim.periods_per_year == 0 {
            errors.push("periods_per_year must be > 0".to_string());
        }

        // Feature validation
        if self.features.columns.is_empty() {
            errors.push("features.columns must not be empty".to_string());
        }
        if self.features.columns.contains(&FeatureKind::Volatility) && self.features.volatility_window < 2 {
            errors.push("volatility_window must be >= 2".to_string());
        }
        if self.features.columns.contains(&FeatureKind::Rsi) && self.features.rsi_period == 0 {
            errors.push("rsi_period must be > 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Hidden Markov model fitting parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    pub state_count: usize,
    pub covariance: CovarianceKind,
    pub max_iterations: usize,
    pub tolerance: f64,
    /// Added to covariance diagonals after every M-step
    pub min_covariance: f64,
    pub seed: u64,
    /// Z-score features before fitting and decoding
    pub standardize: bool,
    pub label_strategy: LabelStrategy,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            state_count: 3,
            covariance: CovarianceKind::Full,
            max_iterations: 1000,
            tolerance: 1e-4,
            min_covariance: 1e-3,
            seed: 42,
            standardize: true,
            label_strategy: LabelStrategy::FirstFeatureMean,
        }
    }
}

impl ModelSettings {
    pub fn validate(&self) -> Result<(), String> {
        if self.state_count == 0 {
            return Err("state_count must be > 0".to_string());
        }
        if self.max_iterations == 0 {
            return Err("max_iterations must be > 0".to_string());
        }
        if !self.tolerance.is_finite() || self.tolerance <= 0.0 {
            return Err("tolerance must be a positive number".to_string());
        }
        if !self.min_covariance.is_finite() || self.min_covariance < 0.0 {
            return Err("min_covariance must be >= 0".to_string());
        }
        Ok(())
    }
}

/// Position simulator parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorSettings {
    pub initial_capital: Decimal,
    /// Trailing and initial stop distance as a fraction of price
    pub stop_fraction: Decimal,
    /// Fraction of initial capital risked per entry
    pub risk_percent: Decimal,
    /// Enables the confidence gate when set
    pub confidence_threshold: Option<f64>,
    pub fee_rate: Decimal,
    pub close_at_end: bool,
    pub periods_per_year: u32,
}

impl Default for SimulatorSettings {
    fn default() -> Self {
        Self {
            initial_capital: dec!(10000),
            stop_fraction: dec!(0.05),
            risk_percent: dec!(0.05),
            confidence_threshold: None,
            fee_rate: Decimal::ZERO,
            close_at_end: true,
            periods_per_year: 252,
        }
    }
}

/// Which feature columns to derive from bars
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureSettings {
    pub columns: Vec<FeatureKind>,
    pub volatility_window: usize,
    pub rsi_period: usize,
}

impl Default for FeatureSettings {
    fn default() -> Self {
        Self {
            columns: vec![FeatureKind::LogReturn, FeatureKind::Volatility],
            volatility_window: 5,
            rsi_period: 14,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validation_collects_every_error() {
        let mut config = AppConfig::default();
        config.model.state_count = 0;
        config.simulator.stop_fraction = Decimal::ONE;
        config.simulator.confidence_threshold = Some(1.5);

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors.iter().any(|e| e.contains("state_count")));
    }

    #[test]
    fn test_zero_stop_and_risk_reach_the_simulator() {
        let mut config = AppConfig::default();
        config.simulator.stop_fraction = Decimal::ZERO;
        config.simulator.risk_percent = Decimal::ZERO;
        assert!(config.validate().is_ok());

        let simulator = crate::engine::PositionSimulator::new(config.simulator.clone()).unwrap();
        assert_eq!(simulator.entry_size(dec!(50), dec!(10000)), Decimal::ONE);
    }

    #[test]
    fn test_load_partial_toml_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("regime.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[model]\nstate_count = 4\nseed = 7\n\n[simulator]\nconfidence_threshold = 0.7").unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.model.state_count, 4);
        assert_eq!(config.model.seed, 7);
        assert_eq!(config.model.max_iterations, 1000);
        assert_eq!(config.simulator.confidence_threshold, Some(0.7));
        assert_eq!(config.simulator.stop_fraction, dec!(0.05));
    }

    #[test]
    fn test_toml_round_trip_of_defaults() {
        let config = AppConfig::default();
        let rendered = config.to_toml().unwrap();
        let parsed: AppConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, config);
    }
}
