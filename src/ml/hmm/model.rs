use ndarray::Array2;
use std::fmt;
use tracing::{debug, info, warn};

use super::gaussian_hmm::{EmOptions, FitReport, GaussianHMM};
use super::labels::{conditional_means, LabelMapping, LabelStrategy};
use super::params::FittedParameters;
use crate::config::ModelSettings;
use crate::error::{RegimeError, Result};
use crate::features::{FeatureMatrix, Scaler};
use crate::types::{Bar, BarStream, Column, Regime, RegimeBar};

/// Unfitted model: validated settings, ready to estimate parameters
#[derive(Debug, Clone)]
pub struct RegimeModel {
    settings: ModelSettings,
}

impl RegimeModel {
    pub fn new(settings: ModelSettings) -> Result<Self> {
        settings.validate().map_err(RegimeError::InvalidParameter)?;
        Ok(Self { settings })
    }

    pub fn settings(&self) -> &ModelSettings {
        &self.settings
    }

    /// Smallest number of clean rows `fit` accepts for `n_features` columns
    pub fn min_rows(&self, n_features: usize) -> usize {
        (self.settings.state_count * n_features).max(2)
    }

    /// Estimate HMM parameters and the label mapping from `features`.
    ///
    /// Non-finite rows are dropped first. Failing to converge within
    /// `max_iterations` is not an error; the best parameters found are kept.
    pub fn fit(&self, features: &FeatureMatrix) -> Result<FittedRegimeModel> {
        let clean = features.clean();
        let required = self.min_rows(clean.n_features());
        if clean.n_features() == 0 || clean.n_rows() < required {
            return Err(RegimeError::InsufficientData {
                required,
                available: clean.n_rows(),
            });
        }

        let label_column = match &self.settings.label_strategy {
            LabelStrategy::FirstFeatureMean => 0,
            LabelStrategy::ConditionalReturn { feature } => clean.column_index(feature).ok_or_else(|| {
                RegimeError::InvalidParameter(format!("label feature '{}' is not a fitted column", feature))
            })?,
        };

        if clean.n_rows() < features.n_rows() {
            debug!("Dropped {} non-finite feature rows before fitting", features.n_rows() - clean.n_rows());
        }

        let scaler = if self.settings.standardize {
            Scaler::fit(clean.values())
        } else {
            Scaler::identity(clean.n_features())
        };
        let observations = scaler.transform(clean.values());

        info!(
            "Fitting {}-state HMM on {} rows x {} features",
            self.settings.state_count,
            clean.n_rows(),
            clean.n_features()
        );

        let options = EmOptions {
            n_states: self.settings.state_count,
            covariance: self.settings.covariance,
            max_iterations: self.settings.max_iterations,
            tolerance: self.settings.tolerance,
            min_covariance: self.settings.min_covariance,
            seed: self.settings.seed,
        };
        let (hmm, report) = GaussianHMM::fit(observations.view(), &options);

        info!(
            "HMM fit: log-likelihood {:.4} after {} iterations (converged: {})",
            report.log_likelihood, report.iterations, report.converged
        );

        let params = FittedParameters::new(clean.columns().to_vec(), scaler, self.settings.covariance, hmm);

        let means = params.means();
        let fallback: Vec<f64> = means.column(label_column).to_vec();
        let scores = match &self.settings.label_strategy {
            LabelStrategy::FirstFeatureMean => fallback,
            LabelStrategy::ConditionalReturn { .. } => {
                let (states, _) = params.hmm().viterbi(observations.view());
                let raw: Vec<f64> = clean.values().column(label_column).to_vec();
                conditional_means(&raw, &states, &fallback)
            }
        };
        let mapping = LabelMapping::from_scores(&scores);

        // Warn on degenerate models where a state never wins a bar
        let (states, _) = params.hmm().viterbi(observations.view());
        for state in 0..params.n_states() {
            let count = states.iter().filter(|&&s| s == state).count();
            if count == 0 {
                warn!("State {} ({}) is never decoded on the training data", state, mapping.label(state));
            }
        }

        Ok(FittedRegimeModel {
            params,
            mapping,
            report,
        })
    }
}

/// Viterbi path over the clean rows of a feature matrix
#[derive(Debug, Clone, PartialEq)]
pub struct StateSequence {
    /// Bar index of each decoded row
    pub rows: Vec<usize>,
    pub states: Vec<usize>,
    pub log_probability: f64,
}

impl StateSequence {
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

/// Forward-backward posteriors, one distribution per clean row
#[derive(Debug, Clone, PartialEq)]
pub struct StatePosteriors {
    pub rows: Vec<usize>,
    /// rows x states
    pub probabilities: Array2<f64>,
}

impl StatePosteriors {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// argmax of row `t`; ties resolve to the lower state
    pub fn most_likely(&self, t: usize) -> usize {
        let row = self.probabilities.row(t);
        let mut best = 0;
        for (state, &p) in row.iter().enumerate() {
            if p > row[best] {
                best = state;
            }
        }
        best
    }

    pub fn confidence(&self, t: usize) -> f64 {
        self.probabilities
            .row(t)
            .iter()
            .cloned()
            .fold(0.0, f64::max)
    }
}

/// Transition matrix labelled with regime names on both axes
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionTable {
    pub labels: Vec<Regime>,
    pub matrix: Array2<f64>,
}

impl TransitionTable {
    pub fn probability(&self, from: Regime, to: Regime) -> Option<f64> {
        let i = self.labels.iter().position(|&l| l == from)?;
        let j = self.labels.iter().position(|&l| l == to)?;
        Some(self.matrix[[i, j]])
    }
}

impl fmt::Display for TransitionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>10}", "")?;
        for label in &self.labels {
            write!(f, " {:>10}", label.to_string())?;
        }
        writeln!(f)?;
        for (i, label) in self.labels.iter().enumerate() {
            write!(f, "{:>10}", label.to_string())?;
            for j in 0..self.labels.len() {
                write!(f, " {:>10.4}", self.matrix[[i, j]])?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// A fitted model: immutable parameters, the label mapping derived from
/// them and the fit diagnostics. Every query is a pure function of these.
#[derive(Debug, Clone)]
pub struct FittedRegimeModel {
    params: FittedParameters,
    mapping: LabelMapping,
    report: FitReport,
}

impl FittedRegimeModel {
    pub fn params(&self) -> &FittedParameters {
        &self.params
    }

    pub fn mapping(&self) -> &LabelMapping {
        &self.mapping
    }

    pub fn report(&self) -> &FitReport {
        &self.report
    }

    pub fn label(&self, state: usize) -> Regime {
        self.mapping.label(state)
    }

    pub fn decode_states(&self, features: &FeatureMatrix) -> Result<StateSequence> {
        let (rows, observations) = self.params.prepare(features)?;
        let (states, log_probability) = self.params.hmm().viterbi(observations.view());
        Ok(StateSequence {
            rows,
            states,
            log_probability,
        })
    }

    pub fn state_probabilities(&self, features: &FeatureMatrix) -> Result<StatePosteriors> {
        let (rows, observations) = self.params.prepare(features)?;
        let (probabilities, _) = self.params.hmm().posteriors(observations.view());
        Ok(StatePosteriors { rows, probabilities })
    }

    /// Decoded regime label per clean row
    pub fn decode_regimes(&self, features: &FeatureMatrix) -> Result<Vec<(usize, Regime)>> {
        let path = self.decode_states(features)?;
        Ok(path
            .rows
            .iter()
            .zip(&path.states)
            .map(|(&row, &state)| (row, self.label(state)))
            .collect())
    }

    /// Total log-likelihood of the clean rows of `features`
    pub fn score(&self, features: &FeatureMatrix) -> Result<f64> {
        let (_, observations) = self.params.prepare(features)?;
        Ok(self.params.hmm().score(observations.view()))
    }

    pub fn aic(&self, features: &FeatureMatrix) -> Result<f64> {
        let log_likelihood = self.score(features)?;
        Ok(2.0 * self.params.n_parameters() as f64 - 2.0 * log_likelihood)
    }

    pub fn bic(&self, features: &FeatureMatrix) -> Result<f64> {
        let n = features.clean().n_rows().max(1) as f64;
        let log_likelihood = self.score(features)?;
        Ok(self.params.n_parameters() as f64 * n.ln() - 2.0 * log_likelihood)
    }

    pub fn transition_table(&self) -> TransitionTable {
        TransitionTable {
            labels: self.mapping.labels().to_vec(),
            matrix: self.params.transition_matrix().clone(),
        }
    }

    /// Attach Regime, MostLikelyState and StateProbability to `bars`.
    ///
    /// `features` rows index into `bars`; bars without a clean feature row
    /// are left without regime fields.
    pub fn annotate(&self, bars: &[Bar], features: &FeatureMatrix) -> Result<BarStream> {
        if let Some(&row) = features.rows().iter().find(|&&r| r >= bars.len()) {
            return Err(RegimeError::InvalidParameter(format!(
                "feature row {} refers past the last of {} bars",
                row,
                bars.len()
            )));
        }

        let path = self.decode_states(features)?;
        let posteriors = self.state_probabilities(features)?;

        let mut annotated: Vec<RegimeBar> = bars
            .iter()
            .enumerate()
            .map(|(i, bar)| RegimeBar::from_bar(i, bar))
            .collect();

        for (t, &row) in path.rows.iter().enumerate() {
            let bar = &mut annotated[row];
            bar.regime = Some(self.label(path.states[t]));
            bar.most_likely_state = Some(self.label(posteriors.most_likely(t)));
            bar.state_probability = Some(posteriors.confidence(t));
        }

        let unlabeled = bars.len().saturating_sub(path.len());
        if unlabeled > 0 {
            debug!("{} bars have no regime (warm-up or non-finite features)", unlabeled);
        }

        Ok(BarStream::new(Column::ALL, annotated))
    }

    /// Fraction of decoded rows per label, in state order
    pub fn occupancy(&self, features: &FeatureMatrix) -> Result<Vec<(Regime, f64)>> {
        let path = self.decode_states(features)?;
        let n = path.len().max(1) as f64;
        let mut counts = vec![0usize; self.params.n_states()];
        for &s in &path.states {
            counts[s] += 1;
        }
        Ok(counts
            .into_iter()
            .enumerate()
            .map(|(s, c)| (self.label(s), c as f64 / n))
            .collect())
    }
}
