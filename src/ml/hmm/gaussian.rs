use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Shape of the per-state covariance matrices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CovarianceKind {
    Diagonal,
    #[default]
    Full,
}

/// Multivariate normal emission density of one hidden state
#[derive(Debug, Clone, PartialEq)]
pub struct GaussianEmission {
    mean: Array1<f64>,
    covariance: Array2<f64>,
    /// Lower Cholesky factor of `covariance`
    chol: Array2<f64>,
    /// -0.5 * (d ln 2pi + ln |covariance|)
    log_norm: f64,
}

impl GaussianEmission {
    /// Build from a mean and raw scatter matrix.
    ///
    /// The scatter is projected onto `kind`, `min_covariance` is added to the
    /// diagonal, and extra jitter is added until the matrix factorizes.
    pub fn from_moments(
        mean: Array1<f64>,
        scatter: &Array2<f64>,
        kind: CovarianceKind,
        min_covariance: f64,
    ) -> Self {
        let d = mean.len();
        let mut covariance = match kind {
            CovarianceKind::Full => scatter.clone(),
            CovarianceKind::Diagonal => Array2::from_diag(&scatter.diag()),
        };
        for i in 0..d {
            covariance[[i, i]] += min_covariance;
        }

        let mut jitter = min_covariance.max(1e-9);
        let chol = loop {
            if let Some(l) = cholesky(&covariance) {
                break l;
            }
            for i in 0..d {
                covariance[[i, i]] += jitter;
            }
            jitter *= 10.0;
            if jitter > 1e6 {
                // give up on correlations and keep the variances
                covariance = Array2::from_diag(&covariance.diag().mapv(|v| v.abs().max(1e-6)));
                break Array2::from_diag(&covariance.diag().mapv(f64::sqrt));
            }
        };

        let log_det = 2.0 * chol.diag().iter().map(|v| v.ln()).sum::<f64>();
        let log_norm = -0.5 * (d as f64 * (2.0 * PI).ln() + log_det);

        Self {
            mean,
            covariance,
            chol,
            log_norm,
        }
    }

    pub fn log_pdf(&self, x: ArrayView1<'_, f64>) -> f64 {
        let d = self.mean.len();
        // Solve L z = (x - mean); the Mahalanobis term is |z|^2
        let mut z = vec![0.0; d];
        let mut mahalanobis = 0.0;
        for i in 0..d {
            let mut acc = x[i] - self.mean[i];
            for k in 0..i {
                acc -= self.chol[[i, k]] * z[k];
            }
            z[i] = acc / self.chol[[i, i]];
            mahalanobis += z[i] * z[i];
        }
        self.log_norm - 0.5 * mahalanobis
    }

    pub fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    pub fn covariance(&self) -> &Array2<f64> {
        &self.covariance
    }

    pub fn dim(&self) -> usize {
        self.mean.len()
    }
}

/// Lower-triangular L with L Lᵀ = a, or None if `a` is not positive definite
pub fn cholesky(a: &Array2<f64>) -> Option<Array2<f64>> {
    let n = a.nrows();
    if a.ncols() != n {
        return None;
    }
    let mut l = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[[i, j]];
            for k in 0..j {
                sum -= l[[i, k]] * l[[j, k]];
            }
            if i == j {
                if sum <= 0.0 || !sum.is_finite() {
                    return None;
                }
                l[[i, j]] = sum.sqrt();
            } else {
                l[[i, j]] = sum / l[[j, j]];
            }
        }
    }
    Some(l)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_cholesky_reconstructs_matrix() {
        let a = array![[4.0, 2.0], [2.0, 3.0]];
        let l = cholesky(&a).unwrap();
        let rebuilt = l.dot(&l.t());
        for (x, y) in rebuilt.iter().zip(a.iter()) {
            assert!((x - y).abs() < 1e-12);
        }
        assert!(cholesky(&array![[1.0, 2.0], [2.0, 1.0]]).is_none());
    }

    #[test]
    fn test_standard_normal_log_pdf() {
        let emission = GaussianEmission::from_moments(
            array![0.0],
            &array![[1.0]],
            CovarianceKind::Full,
            0.0,
        );
        let at_mean = emission.log_pdf(array![0.0].view());
        assert!((at_mean + 0.5 * (2.0 * PI).ln()).abs() < 1e-12);

        let one_sd = emission.log_pdf(array![1.0].view());
        assert!((at_mean - one_sd - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_full_matches_diagonal_when_uncorrelated() {
        let scatter = array![[2.0, 0.0], [0.0, 0.5]];
        let full = GaussianEmission::from_moments(array![1.0, -1.0], &scatter, CovarianceKind::Full, 1e-3);
        let diag = GaussianEmission::from_moments(array![1.0, -1.0], &scatter, CovarianceKind::Diagonal, 1e-3);

        let x = array![0.3, 0.7];
        assert!((full.log_pdf(x.view()) - diag.log_pdf(x.view())).abs() < 1e-12);
    }

    #[test]
    fn test_singular_scatter_is_regularized() {
        let scatter = array![[1.0, 1.0], [1.0, 1.0]];
        let emission = GaussianEmission::from_moments(array![0.0, 0.0], &scatter, CovarianceKind::Full, 0.0);
        assert!(emission.log_pdf(array![0.5, -0.5].view()).is_finite());
    }

    #[test]
    fn test_diagonal_drops_correlation() {
        let scatter = array![[1.0, 0.8], [0.8, 1.0]];
        let emission = GaussianEmission::from_moments(array![0.0, 0.0], &scatter, CovarianceKind::Diagonal, 0.0);
        assert_eq!(emission.covariance()[[0, 1]], 0.0);
    }
}
