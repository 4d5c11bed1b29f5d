pub mod hmm;

pub use hmm::{FittedRegimeModel, RegimeDetector, RegimeModel};
