use thiserror::Error;

/// Errors raised by the regime engine and the position simulator
#[derive(Debug, Error)]
pub enum RegimeError {
    #[error("insufficient data: need at least {required} clean rows, got {available}")]
    InsufficientData { required: usize, available: usize },

    #[error("model has not been fitted")]
    NotFitted,

    #[error("feature mismatch: model was fitted on {expected:?}, got {found:?}")]
    FeatureMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("bar stream is missing required columns: {}", .missing.join(", "))]
    Schema { missing: Vec<String> },

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RegimeError>;
