//! Market regime detection with a Gaussian hidden Markov model, and a
//! position simulator that trades the detected regimes.

pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod features;
pub mod indicators;
pub mod ml;
pub mod types;

#[cfg(test)]
mod testutil;

pub use config::{AppConfig, FeatureSettings, ModelSettings, SimulatorSettings};
pub use engine::{simulate, MetricsCalculator, PerformanceSummary, PositionSimulator, SimulationResult};
pub use error::{RegimeError, Result};
pub use features::{build_features, FeatureMatrix};
pub use ml::hmm::{CovarianceKind, LabelStrategy};
pub use ml::{FittedRegimeModel, RegimeDetector, RegimeModel};
pub use types::{Bar, BarStream, Column, Regime, RegimeBar, Side};
