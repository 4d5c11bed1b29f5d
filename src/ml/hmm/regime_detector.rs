use std::sync::Arc;
use tracing::info;

use super::labels::LabelMapping;
use super::model::{FittedRegimeModel, RegimeModel, StatePosteriors, StateSequence, TransitionTable};
use crate::config::ModelSettings;
use crate::error::{RegimeError, Result};
use crate::features::FeatureMatrix;
use crate::types::{Bar, BarStream};

/// Owns a model configuration and, once fitted, the current parameters.
///
/// `fit` needs `&mut self`, so queries can never observe a fit in
/// progress. A failed fit leaves the previous parameters in place.
pub struct RegimeDetector {
    model: RegimeModel,
    fitted: Option<Arc<FittedRegimeModel>>,
}

impl RegimeDetector {
    pub fn new(settings: ModelSettings) -> Result<Self> {
        Ok(Self {
            model: RegimeModel::new(settings)?,
            fitted: None,
        })
    }

    pub fn fit(&mut self, features: &FeatureMatrix) -> Result<Arc<FittedRegimeModel>> {
        let fitted = Arc::new(self.model.fit(features)?);
        if self.fitted.is_some() {
            info!("Replacing previously fitted regime model");
        }
        self.fitted = Some(Arc::clone(&fitted));
        Ok(fitted)
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    /// Shared handle to the current parameters
    pub fn fitted(&self) -> Result<Arc<FittedRegimeModel>> {
        self.fitted.clone().ok_or(RegimeError::NotFitted)
    }

    fn current(&self) -> Result<&FittedRegimeModel> {
        self.fitted.as_deref().ok_or(RegimeError::NotFitted)
    }

    pub fn decode_states(&self, features: &FeatureMatrix) -> Result<StateSequence> {
        self.current()?.decode_states(features)
    }

    pub fn state_probabilities(&self, features: &FeatureMatrix) -> Result<StatePosteriors> {
        self.current()?.state_probabilities(features)
    }

    pub fn label_mapping(&self) -> Result<&LabelMapping> {
        Ok(self.current()?.mapping())
    }

    pub fn transition_table(&self) -> Result<TransitionTable> {
        Ok(self.current()?.transition_table())
    }

    pub fn annotate(&self, bars: &[Bar], features: &FeatureMatrix) -> Result<BarStream> {
        self.current()?.annotate(bars, features)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{single_column, three_regime_returns};

    fn detector() -> RegimeDetector {
        RegimeDetector::new(ModelSettings {
            max_iterations: 100,
            ..ModelSettings::default()
        })
        .unwrap()
    }

    #[test]
    fn test_queries_before_fit_are_rejected() {
        let detector = detector();
        let features = single_column("log_return", &[0.1, 0.2]);

        assert!(!detector.is_fitted());
        assert!(matches!(detector.decode_states(&features), Err(RegimeError::NotFitted)));
        assert!(matches!(detector.state_probabilities(&features), Err(RegimeError::NotFitted)));
        assert!(matches!(detector.label_mapping(), Err(RegimeError::NotFitted)));
        assert!(matches!(detector.transition_table(), Err(RegimeError::NotFitted)));
        assert!(matches!(detector.annotate(&[], &features), Err(RegimeError::NotFitted)));
    }

    #[test]
    fn test_failed_refit_keeps_previous_model() {
        let mut detector = detector();
        let (returns, _) = three_regime_returns(3, 20, 5);
        let features = single_column("log_return", &returns);

        let first = detector.fit(&features).unwrap();
        let too_short = single_column("log_return", &[0.01]);
        assert!(matches!(
            detector.fit(&too_short),
            Err(RegimeError::InsufficientData { .. })
        ));

        let current = detector.fitted().unwrap();
        assert!(Arc::ptr_eq(&first, &current));
        assert!(detector.decode_states(&features).is_ok());
    }
}
