pub mod gaussian;
pub mod gaussian_hmm;
pub mod labels;
pub mod model;
pub mod params;
pub mod regime_detector;

pub use gaussian::{CovarianceKind, GaussianEmission};
pub use gaussian_hmm::{log_sum_exp, FitReport, GaussianHMM};
pub use labels::{LabelMapping, LabelStrategy};
pub use model::{FittedRegimeModel, RegimeModel, StatePosteriors, StateSequence, TransitionTable};
pub use params::FittedParameters;
pub use regime_detector::RegimeDetector;
