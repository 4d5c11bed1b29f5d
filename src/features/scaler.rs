use ndarray::{Array1, Array2, ArrayView2, Axis};

/// Per-column z-score transform fitted on training rows
#[derive(Debug, Clone, PartialEq)]
pub struct Scaler {
    mean: Array1<f64>,
    std: Array1<f64>,
}

impl Scaler {
    /// Population mean/std per column; a zero std is replaced by 1
    pub fn fit(values: ArrayView2<'_, f64>) -> Self {
        let n_features = values.ncols();
        if values.nrows() == 0 {
            return Self::identity(n_features);
        }

        let mean = values
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(n_features));
        let std = values
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s > 0.0 && s.is_finite() { s } else { 1.0 });

        Self { mean, std }
    }

    pub fn identity(n_features: usize) -> Self {
        Self {
            mean: Array1::zeros(n_features),
            std: Array1::ones(n_features),
        }
    }

    pub fn transform(&self, values: ArrayView2<'_, f64>) -> Array2<f64> {
        (&values - &self.mean) / &self.std
    }

    /// Map a value of column `j` back to raw units
    pub fn inverse(&self, j: usize, value: f64) -> f64 {
        value * self.std[j] + self.mean[j]
    }

    pub fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    pub fn std(&self) -> &Array1<f64> {
        &self.std
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_standardizes_columns() {
        let values = array![[1.0, 5.0], [3.0, 5.0]];
        let scaler = Scaler::fit(values.view());

        assert_eq!(scaler.mean(), &array![2.0, 5.0]);
        // constant column keeps unit scale
        assert_eq!(scaler.std(), &array![1.0, 1.0]);

        let scaled = scaler.transform(values.view());
        assert_eq!(scaled, array![[-1.0, 0.0], [1.0, 0.0]]);
        assert_eq!(scaler.inverse(0, 1.0), 3.0);
    }
}
