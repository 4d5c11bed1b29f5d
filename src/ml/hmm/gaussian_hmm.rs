use ndarray::{Array1, Array2, ArrayView2, Axis};
use rand::distributions::{Distribution, WeightedIndex};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, warn};

use super::gaussian::{CovarianceKind, GaussianEmission};

const KMEANS_RESTARTS: usize = 4;
const KMEANS_ITERATIONS: usize = 10;
/// Occupancy below which a state keeps its previous emission
const MIN_STATE_WEIGHT: f64 = 1e-10;

/// Gaussian HMM parameters: start distribution, transition matrix and one
/// emission density per hidden state
#[derive(Debug, Clone, PartialEq)]
pub struct GaussianHMM {
    pub start_prob: Array1<f64>,
    pub transition: Array2<f64>,
    pub emissions: Vec<GaussianEmission>,
}

/// Outcome of a Baum-Welch run
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct FitReport {
    pub log_likelihood: f64,
    pub iterations: usize,
    pub converged: bool,
    pub n_observations: usize,
}

/// Settings the EM loop needs, independent of the config layer
#[derive(Debug, Clone, Copy)]
pub struct EmOptions {
    pub n_states: usize,
    pub covariance: CovarianceKind,
    pub max_iterations: usize,
    pub tolerance: f64,
    pub min_covariance: f64,
    pub seed: u64,
}

/// Sufficient statistics of one E-step
struct Expectation {
    log_likelihood: f64,
    gamma: Array2<f64>,
    xi_sum: Array2<f64>,
}

impl GaussianHMM {
    pub fn n_states(&self) -> usize {
        self.start_prob.len()
    }

    pub fn n_features(&self) -> usize {
        self.emissions.first().map(|e| e.dim()).unwrap_or(0)
    }

    /// Free parameter count, used for AIC/BIC
    pub fn n_parameters(&self, kind: CovarianceKind) -> usize {
        let k = self.n_states();
        let d = self.n_features();
        let covariance = match kind {
            CovarianceKind::Full => d * (d + 1) / 2,
            CovarianceKind::Diagonal => d,
        };
        (k - 1) + k * (k - 1) + k * d + k * covariance
    }

    /// T x K matrix of log emission densities
    fn log_emissions(&self, observations: ArrayView2<'_, f64>) -> Array2<f64> {
        let n_obs = observations.nrows();
        let mut log_b = Array2::zeros((n_obs, self.n_states()));
        for (t, obs) in observations.axis_iter(Axis(0)).enumerate() {
            for (state, emission) in self.emissions.iter().enumerate() {
                log_b[[t, state]] = emission.log_pdf(obs);
            }
        }
        log_b
    }

    fn log_transition(&self) -> Array2<f64> {
        self.transition.mapv(f64::ln)
    }

    /// Forward pass in log space; returns (log alpha, total log-likelihood)
    fn forward(&self, log_b: &Array2<f64>) -> (Array2<f64>, f64) {
        let n_obs = log_b.nrows();
        let n_states = self.n_states();
        let log_a = self.log_transition();
        let mut log_alpha = Array2::from_elem((n_obs, n_states), f64::NEG_INFINITY);
        if n_obs == 0 {
            return (log_alpha, 0.0);
        }

        for state in 0..n_states {
            log_alpha[[0, state]] = self.start_prob[state].ln() + log_b[[0, state]];
        }

        let mut terms = vec![0.0; n_states];
        for t in 1..n_obs {
            for j in 0..n_states {
                for i in 0..n_states {
                    terms[i] = log_alpha[[t - 1, i]] + log_a[[i, j]];
                }
                log_alpha[[t, j]] = log_sum_exp(&terms) + log_b[[t, j]];
            }
        }

        let log_prob = log_sum_exp(&log_alpha.row(n_obs - 1).to_vec());
        (log_alpha, log_prob)
    }

    /// Backward pass in log space
    fn backward(&self, log_b: &Array2<f64>) -> Array2<f64> {
        let n_obs = log_b.nrows();
        let n_states = self.n_states();
        let log_a = self.log_transition();
        let mut log_beta = Array2::from_elem((n_obs, n_states), f64::NEG_INFINITY);
        if n_obs == 0 {
            return log_beta;
        }

        log_beta.row_mut(n_obs - 1).fill(0.0);

        let mut terms = vec![0.0; n_states];
        for t in (0..n_obs - 1).rev() {
            for i in 0..n_states {
                for j in 0..n_states {
                    terms[j] = log_a[[i, j]] + log_b[[t + 1, j]] + log_beta[[t + 1, j]];
                }
                log_beta[[t, i]] = log_sum_exp(&terms);
            }
        }

        log_beta
    }

    fn gamma(log_alpha: &Array2<f64>, log_beta: &Array2<f64>) -> Array2<f64> {
        let (n_obs, n_states) = log_alpha.dim();
        let mut gamma = Array2::zeros((n_obs, n_states));
        let mut terms = vec![0.0; n_states];
        for t in 0..n_obs {
            for s in 0..n_states {
                terms[s] = log_alpha[[t, s]] + log_beta[[t, s]];
            }
            let log_denom = log_sum_exp(&terms);
            for s in 0..n_states {
                gamma[[t, s]] = (terms[s] - log_denom).exp();
            }
        }
        gamma
    }

    /// Total log-likelihood of the sequence
    pub fn score(&self, observations: ArrayView2<'_, f64>) -> f64 {
        let log_b = self.log_emissions(observations);
        self.forward(&log_b).1
    }

    /// Forward-backward posterior P(state_t | whole sequence), T x K
    pub fn posteriors(&self, observations: ArrayView2<'_, f64>) -> (Array2<f64>, f64) {
        let log_b = self.log_emissions(observations);
        let (log_alpha, log_prob) = self.forward(&log_b);
        let log_beta = self.backward(&log_b);
        (Self::gamma(&log_alpha, &log_beta), log_prob)
    }

    /// Most likely state path (Viterbi) and its log-probability
    pub fn viterbi(&self, observations: ArrayView2<'_, f64>) -> (Vec<usize>, f64) {
        let n_obs = observations.nrows();
        if n_obs == 0 {
            return (Vec::new(), 0.0);
        }
        let n_states = self.n_states();
        let log_b = self.log_emissions(observations);
        let log_a = self.log_transition();

        let mut log_delta = Array2::from_elem((n_obs, n_states), f64::NEG_INFINITY);
        let mut psi = Array2::<usize>::zeros((n_obs, n_states));

        for state in 0..n_states {
            log_delta[[0, state]] = self.start_prob[state].ln() + log_b[[0, state]];
        }

        for t in 1..n_obs {
            for j in 0..n_states {
                let mut max_val = f64::NEG_INFINITY;
                let mut max_state = 0;
                for i in 0..n_states {
                    let val = log_delta[[t - 1, i]] + log_a[[i, j]];
                    if val > max_val {
                        max_val = val;
                        max_state = i;
                    }
                }
                log_delta[[t, j]] = max_val + log_b[[t, j]];
                psi[[t, j]] = max_state;
            }
        }

        // Backtracking; ties resolve to the lower state index
        let mut states = vec![0; n_obs];
        let mut best = f64::NEG_INFINITY;
        for state in 0..n_states {
            if log_delta[[n_obs - 1, state]] > best {
                best = log_delta[[n_obs - 1, state]];
                states[n_obs - 1] = state;
            }
        }
        for t in (0..n_obs - 1).rev() {
            states[t] = psi[[t + 1, states[t + 1]]];
        }

        (states, best)
    }

    fn expectation(&self, observations: ArrayView2<'_, f64>) -> Expectation {
        let n_obs = observations.nrows();
        let n_states = self.n_states();
        let log_b = self.log_emissions(observations);
        let log_a = self.log_transition();
        let (log_alpha, log_likelihood) = self.forward(&log_b);
        let log_beta = self.backward(&log_b);
        let gamma = Self::gamma(&log_alpha, &log_beta);

        let mut xi_sum = Array2::zeros((n_states, n_states));
        for t in 0..n_obs.saturating_sub(1) {
            for i in 0..n_states {
                for j in 0..n_states {
                    let log_xi = log_alpha[[t, i]]
                        + log_a[[i, j]]
                        + log_b[[t + 1, j]]
                        + log_beta[[t + 1, j]]
                        - log_likelihood;
                    xi_sum[[i, j]] += log_xi.exp();
                }
            }
        }

        Expectation {
            log_likelihood,
            gamma,
            xi_sum,
        }
    }

    fn maximization(
        &self,
        observations: ArrayView2<'_, f64>,
        stats: &Expectation,
        options: &EmOptions,
    ) -> GaussianHMM {
        let n_states = self.n_states();
        let n_features = self.n_features();

        let mut start_prob = stats.gamma.row(0).to_owned();
        normalize(start_prob.view_mut(), self.start_prob.view());

        let mut transition = stats.xi_sum.clone();
        for i in 0..n_states {
            normalize(transition.row_mut(i), self.transition.row(i));
        }

        let mut emissions = Vec::with_capacity(n_states);
        for state in 0..n_states {
            let weights = stats.gamma.column(state);
            let weight_sum = weights.sum();
            if weight_sum < MIN_STATE_WEIGHT {
                debug!("HMM state {} has no occupancy, keeping previous emission", state);
                emissions.push(self.emissions[state].clone());
                continue;
            }

            let mean = weights.dot(&observations) / weight_sum;
            let mut scatter = Array2::zeros((n_features, n_features));
            for (t, obs) in observations.axis_iter(Axis(0)).enumerate() {
                let diff = &obs - &mean;
                for i in 0..n_features {
                    for j in 0..n_features {
                        scatter[[i, j]] += weights[t] * diff[i] * diff[j];
                    }
                }
            }
            scatter /= weight_sum;

            emissions.push(GaussianEmission::from_moments(
                mean,
                &scatter,
                options.covariance,
                options.min_covariance,
            ));
        }

        GaussianHMM {
            start_prob,
            transition,
            emissions,
        }
    }

    /// Seeded k-means++ starting points, one per restart
    pub fn init_with_kmeans(observations: ArrayView2<'_, f64>, options: &EmOptions) -> Vec<Self> {
        let mut rng = ChaCha8Rng::seed_from_u64(options.seed);
        (0..KMEANS_RESTARTS)
            .map(|_| {
                let (centers, labels, inertia) = kmeans(observations, options.n_states, &mut rng);
                debug!("k-means restart inertia {:.4}", inertia);
                Self::from_clusters(observations, &centers, &labels, options)
            })
            .collect()
    }

    /// Emissions from cluster centers and within-cluster scatter, uniform
    /// start and a sticky transition matrix
    fn from_clusters(
        observations: ArrayView2<'_, f64>,
        centers: &Array2<f64>,
        labels: &[usize],
        options: &EmOptions,
    ) -> Self {
        let n_states = options.n_states;
        let n_features = observations.ncols();

        let global_mean = observations
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(n_features));
        let global_scatter = scatter_around(observations, &global_mean, |_| true);

        let emissions = (0..n_states)
            .map(|state| {
                let center = centers.row(state).to_owned();
                let count = labels.iter().filter(|&&l| l == state).count();
                let scatter = if count >= 2 {
                    scatter_around(observations, &center, |t| labels[t] == state)
                } else {
                    global_scatter.clone()
                };
                GaussianEmission::from_moments(center, &scatter, options.covariance, options.min_covariance)
            })
            .collect();

        let start_prob = Array1::from_elem(n_states, 1.0 / n_states as f64);
        let transition = if n_states == 1 {
            Array2::ones((1, 1))
        } else {
            let off = 0.5 / (n_states - 1) as f64;
            let mut t = Array2::from_elem((n_states, n_states), off);
            t.diag_mut().fill(0.5);
            t
        };

        GaussianHMM {
            start_prob,
            transition,
            emissions,
        }
    }

    /// Baum-Welch EM from every k-means restart.
    ///
    /// Keeps the run with the highest log-likelihood; equal scores keep the
    /// earlier restart.
    pub fn fit(observations: ArrayView2<'_, f64>, options: &EmOptions) -> (GaussianHMM, FitReport) {
        let mut best: Option<(GaussianHMM, FitReport)> = None;
        for (restart, initial) in Self::init_with_kmeans(observations, options).into_iter().enumerate() {
            let (model, report) = initial.run_em(observations, options);
            debug!(
                "EM restart {}: log-likelihood {:.4} after {} iterations",
                restart, report.log_likelihood, report.iterations
            );
            let better = best
                .as_ref()
                .map_or(true, |(_, b)| report.log_likelihood > b.log_likelihood);
            if better {
                best = Some((model, report));
            }
        }

        match best {
            Some(fit) => fit,
            None => {
                let initial = Self::from_clusters(
                    observations,
                    &Array2::zeros((options.n_states, observations.ncols())),
                    &vec![0; observations.nrows()],
                    options,
                );
                initial.run_em(observations, options)
            }
        }
    }

    /// One EM run from `self`.
    ///
    /// Stops when the log-likelihood gain drops below `tolerance` or after
    /// `max_iterations`, returning the best-scoring parameters seen.
    pub fn run_em(self, observations: ArrayView2<'_, f64>, options: &EmOptions) -> (GaussianHMM, FitReport) {
        let mut model = self;
        let mut best = (model.clone(), f64::NEG_INFINITY);
        let mut prev_log_prob = f64::NEG_INFINITY;
        let mut converged = false;
        let mut iterations = 0;

        for iteration in 0..options.max_iterations {
            let stats = model.expectation(observations);
            let log_prob = stats.log_likelihood;
            iterations = iteration + 1;

            if !log_prob.is_finite() {
                warn!("HMM log-likelihood became non-finite at iteration {}", iterations);
                break;
            }
            if log_prob > best.1 {
                best = (model.clone(), log_prob);
            }
            if log_prob - prev_log_prob < options.tolerance {
                converged = true;
                break;
            }
            prev_log_prob = log_prob;

            model = model.maximization(observations, &stats, options);
        }

        if !converged {
            let final_log_prob = model.score(observations);
            if final_log_prob.is_finite() && final_log_prob > best.1 {
                best = (model, final_log_prob);
            }
            info!(
                "HMM did not converge within {} iterations (log-likelihood {:.4})",
                options.max_iterations, best.1
            );
        }

        let (model, log_likelihood) = best;
        (
            model,
            FitReport {
                log_likelihood,
                iterations,
                converged,
                n_observations: observations.nrows(),
            },
        )
    }
}

/// Normalize `row` to sum to 1, falling back to `previous` when it is empty
fn normalize(mut row: ndarray::ArrayViewMut1<'_, f64>, previous: ndarray::ArrayView1<'_, f64>) {
    let sum = row.sum();
    if sum > 0.0 && sum.is_finite() {
        row.mapv_inplace(|v| v / sum);
    } else {
        row.assign(&previous);
    }
}

fn scatter_around(
    observations: ArrayView2<'_, f64>,
    center: &Array1<f64>,
    include: impl Fn(usize) -> bool,
) -> Array2<f64> {
    let d = observations.ncols();
    let mut scatter = Array2::zeros((d, d));
    let mut count = 0usize;
    for (t, obs) in observations.axis_iter(Axis(0)).enumerate() {
        if !include(t) {
            continue;
        }
        let diff = &obs - center;
        for i in 0..d {
            for j in 0..d {
                scatter[[i, j]] += diff[i] * diff[j];
            }
        }
        count += 1;
    }
    if count > 0 {
        scatter /= count as f64;
    }
    scatter
}

fn squared_distance(a: ndarray::ArrayView1<'_, f64>, b: ndarray::ArrayView1<'_, f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum()
}

/// One k-means++ seeded Lloyd run; returns (centers, labels, inertia)
fn kmeans(observations: ArrayView2<'_, f64>, k: usize, rng: &mut ChaCha8Rng) -> (Array2<f64>, Vec<usize>, f64) {
    let n_obs = observations.nrows();
    let n_features = observations.ncols();
    let mut centers = Array2::zeros((k, n_features));
    if n_obs == 0 {
        return (centers, Vec::new(), 0.0);
    }

    // k-means++ seeding
    let first = rng.gen_range(0..n_obs);
    centers.row_mut(0).assign(&observations.row(first));
    let mut nearest: Vec<f64> = observations
        .axis_iter(Axis(0))
        .map(|obs| squared_distance(obs, centers.row(0)))
        .collect();
    for c in 1..k {
        let pick = match WeightedIndex::new(&nearest) {
            Ok(dist) => dist.sample(rng),
            // every point already sits on a center
            Err(_) => rng.gen_range(0..n_obs),
        };
        centers.row_mut(c).assign(&observations.row(pick));
        for (t, obs) in observations.axis_iter(Axis(0)).enumerate() {
            nearest[t] = nearest[t].min(squared_distance(obs, centers.row(c)));
        }
    }

    let mut labels = vec![0usize; n_obs];
    for _ in 0..KMEANS_ITERATIONS {
        let mut changed = false;
        for (t, obs) in observations.axis_iter(Axis(0)).enumerate() {
            let mut best_state = 0;
            let mut min_dist = f64::INFINITY;
            for state in 0..k {
                let dist = squared_distance(obs, centers.row(state));
                if dist < min_dist {
                    min_dist = dist;
                    best_state = state;
                }
            }
            if labels[t] != best_state {
                labels[t] = best_state;
                changed = true;
            }
        }

        let mut sums = Array2::<f64>::zeros((k, n_features));
        let mut counts = vec![0usize; k];
        for (t, &label) in labels.iter().enumerate() {
            let mut row = sums.row_mut(label);
            row += &observations.row(t);
            counts[label] += 1;
        }
        for state in 0..k {
            // empty clusters keep their center
            if counts[state] > 0 {
                let mean = &sums.row(state) / counts[state] as f64;
                centers.row_mut(state).assign(&mean);
            }
        }

        if !changed {
            break;
        }
    }

    let inertia = labels
        .iter()
        .enumerate()
        .map(|(t, &l)| squared_distance(observations.row(t), centers.row(l)))
        .sum();

    (centers, labels, inertia)
}

/// Log-sum-exp trick for numerical stability
pub fn log_sum_exp(log_values: &[f64]) -> f64 {
    if log_values.is_empty() {
        return f64::NEG_INFINITY;
    }

    let max_val = log_values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if max_val == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }

    let sum_exp: f64 = log_values.iter().map(|&v| (v - max_val).exp()).sum();
    max_val + sum_exp.ln()
}
