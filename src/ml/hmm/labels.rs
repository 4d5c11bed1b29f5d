use serde::{Deserialize, Serialize};

use crate::types::Regime;

/// How hidden states are ranked before labels are assigned
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LabelStrategy {
    /// Rank by the fitted mean of the first feature column
    #[default]
    FirstFeatureMean,
    /// Rank by the mean of `feature` over the bars Viterbi assigns to each state
    ConditionalReturn { feature: String },
}

/// Fixed bijection from state index to regime label
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabelMapping {
    labels: Vec<Regime>,
}

impl LabelMapping {
    /// Assign labels from one score per state.
    ///
    /// Highest score is Uptrend, lowest of the rest is Downtrend, the state
    /// ranked just above Downtrend is Sideway and any others keep a generic
    /// `State(i)` label. Equal scores resolve to the lower state index.
    pub fn from_scores(scores: &[f64]) -> Self {
        let k = scores.len();
        let mut labels: Vec<Regime> = (0..k).map(Regime::State).collect();

        match k {
            0 => {}
            1 => labels[0] = Regime::Sideway,
            _ => {
                // stable sorts keep index order among equal scores
                let mut by_desc: Vec<usize> = (0..k).collect();
                by_desc.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
                let up = by_desc[0];

                let mut rest: Vec<usize> = (0..k).filter(|&s| s != up).collect();
                rest.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

                labels[up] = Regime::Uptrend;
                labels[rest[0]] = Regime::Downtrend;
                if let Some(&sideway) = rest.get(1) {
                    labels[sideway] = Regime::Sideway;
                }
            }
        }

        Self { labels }
    }

    pub fn label(&self, state: usize) -> Regime {
        self.labels.get(state).copied().unwrap_or(Regime::State(state))
    }

    pub fn labels(&self) -> &[Regime] {
        &self.labels
    }

    pub fn state_for(&self, regime: Regime) -> Option<usize> {
        self.labels.iter().position(|&l| l == regime)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Mean of `values` per assigned state; states with no rows fall back to
/// `fallback[state]`
pub fn conditional_means(values: &[f64], states: &[usize], fallback: &[f64]) -> Vec<f64> {
    let k = fallback.len();
    let mut sums = vec![0.0; k];
    let mut counts = vec![0usize; k];
    for (&v, &s) in values.iter().zip(states) {
        if s < k {
            sums[s] += v;
            counts[s] += 1;
        }
    }
    (0..k)
        .map(|s| {
            if counts[s] > 0 {
                sums[s] / counts[s] as f64
            } else {
                fallback[s]
            }
        })
        .collect()
}
