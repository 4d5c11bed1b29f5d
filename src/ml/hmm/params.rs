use ndarray::{Array1, Array2, ArrayView2};

use super::gaussian::CovarianceKind;
use super::gaussian_hmm::GaussianHMM;
use crate::error::{RegimeError, Result};
use crate::features::{FeatureMatrix, Scaler};

/// Immutable result of a successful fit.
///
/// Holds the exact feature columns the model was trained on, the scaler
/// applied to them and the HMM parameters. Queries never mutate it.
#[derive(Debug, Clone, PartialEq)]
pub struct FittedParameters {
    columns: Vec<String>,
    scaler: Scaler,
    covariance: CovarianceKind,
    hmm: GaussianHMM,
}

impl FittedParameters {
    pub(crate) fn new(columns: Vec<String>, scaler: Scaler, covariance: CovarianceKind, hmm: GaussianHMM) -> Self {
        Self {
            columns,
            scaler,
            covariance,
            hmm,
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn n_states(&self) -> usize {
        self.hmm.n_states()
    }

    pub fn n_features(&self) -> usize {
        self.columns.len()
    }

    pub fn covariance_kind(&self) -> CovarianceKind {
        self.covariance
    }

    pub fn transition_matrix(&self) -> &Array2<f64> {
        &self.hmm.transition
    }

    pub fn initial_distribution(&self) -> &Array1<f64> {
        &self.hmm.start_prob
    }

    /// State means in raw feature units (K x D)
    pub fn means(&self) -> Array2<f64> {
        let mut means = Array2::zeros((self.n_states(), self.n_features()));
        for (state, emission) in self.hmm.emissions.iter().enumerate() {
            for (j, &m) in emission.mean().iter().enumerate() {
                means[[state, j]] = self.scaler.inverse(j, m);
            }
        }
        means
    }

    /// Per-state standard deviation of each feature in raw units (K x D)
    pub fn std_devs(&self) -> Array2<f64> {
        let std = self.scaler.std();
        let mut out = Array2::zeros((self.n_states(), self.n_features()));
        for (state, emission) in self.hmm.emissions.iter().enumerate() {
            let covariance = emission.covariance();
            for j in 0..self.n_features() {
                out[[state, j]] = covariance[[j, j]].max(0.0).sqrt() * std[j];
            }
        }
        out
    }

    pub fn scaler(&self) -> &Scaler {
        &self.scaler
    }

    pub(crate) fn hmm(&self) -> &GaussianHMM {
        &self.hmm
    }

    pub fn n_parameters(&self) -> usize {
        self.hmm.n_parameters(self.covariance)
    }

    /// Check column identity, drop non-finite rows and scale.
    ///
    /// Returns the bar indices of the surviving rows with the scaled matrix.
    pub(crate) fn prepare(&self, features: &FeatureMatrix) -> Result<(Vec<usize>, Array2<f64>)> {
        if features.columns() != self.columns.as_slice() {
            return Err(RegimeError::FeatureMismatch {
                expected: self.columns.clone(),
                found: features.columns().to_vec(),
            });
        }
        let clean = features.clean();
        Ok((clean.rows().to_vec(), self.scale(clean.values())))
    }

    fn scale(&self, values: ArrayView2<'_, f64>) -> Array2<f64> {
        self.scaler.transform(values)
    }
}
