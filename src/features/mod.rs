//! Observation matrices fed to the regime model

pub mod builder;
pub mod scaler;

pub use builder::*;
pub use scaler::*;

use ndarray::{s, Array2, ArrayView1, ArrayView2, Axis};

use crate::error::{RegimeError, Result};

/// Time-ordered feature rows, one per bar.
///
/// `rows[i]` is the index of the bar row `i` was derived from, so a matrix
/// keeps its alignment with the bar stream after rows are dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    columns: Vec<String>,
    rows: Vec<usize>,
    values: Array2<f64>,
}

impl FeatureMatrix {
    pub fn new(columns: Vec<String>, rows: Vec<usize>, values: Array2<f64>) -> Result<Self> {
        if values.ncols() != columns.len() {
            return Err(RegimeError::InvalidParameter(format!(
                "{} columns named but matrix has {}",
                columns.len(),
                values.ncols()
            )));
        }
        if values.nrows() != rows.len() {
            return Err(RegimeError::InvalidParameter(format!(
                "{} row indices for {} rows",
                rows.len(),
                values.nrows()
            )));
        }
        Ok(Self { columns, rows, values })
    }

    /// Build from row vectors, indexing rows 0..n
    pub fn from_rows(columns: Vec<String>, data: &[Vec<f64>]) -> Result<Self> {
        let n_features = columns.len();
        if let Some(bad) = data.iter().position(|r| r.len() != n_features) {
            return Err(RegimeError::InvalidParameter(format!(
                "row {} has {} values, expected {}",
                bad,
                data[bad].len(),
                n_features
            )));
        }
        let values = Array2::from_shape_fn((data.len(), n_features), |(i, j)| data[i][j]);
        Self::new(columns, (0..data.len()).collect(), values)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[usize] {
        &self.rows
    }

    pub fn values(&self) -> ArrayView2<'_, f64> {
        self.values.view()
    }

    pub fn n_rows(&self) -> usize {
        self.values.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.values.ncols()
    }

    pub fn is_empty(&self) -> bool {
        self.values.nrows() == 0
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn column(&self, name: &str) -> Option<ArrayView1<'_, f64>> {
        self.column_index(name).map(|j| self.values.column(j))
    }

    /// Drop every row holding a NaN or infinite value
    pub fn clean(&self) -> FeatureMatrix {
        let keep: Vec<usize> = self
            .values
            .axis_iter(Axis(0))
            .enumerate()
            .filter(|(_, row)| row.iter().all(|v| v.is_finite()))
            .map(|(i, _)| i)
            .collect();

        let values = Array2::from_shape_fn((keep.len(), self.n_features()), |(i, j)| {
            self.values[[keep[i], j]]
        });

        FeatureMatrix {
            columns: self.columns.clone(),
            rows: keep.iter().map(|&i| self.rows[i]).collect(),
            values,
        }
    }

    /// Split into the first `n` rows and the remainder
    pub fn split_at(&self, n: usize) -> (FeatureMatrix, FeatureMatrix) {
        let n = n.min(self.n_rows());
        let head = FeatureMatrix {
            columns: self.columns.clone(),
            rows: self.rows[..n].to_vec(),
            values: self.values.slice(s![..n, ..]).to_owned(),
        };
        let tail = FeatureMatrix {
            columns: self.columns.clone(),
            rows: self.rows[n..].to_vec(),
            values: self.values.slice(s![n.., ..]).to_owned(),
        };
        (head, tail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(cols: &[&str]) -> Vec<String> {
        cols.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn test_clean_drops_non_finite_rows_and_keeps_bar_indices() {
        let matrix = FeatureMatrix::from_rows(
            names(&["a", "b"]),
            &[
                vec![f64::NAN, 1.0],
                vec![0.5, 1.0],
                vec![0.1, f64::INFINITY],
                vec![0.2, 0.3],
            ],
        )
        .unwrap();

        let clean = matrix.clean();
        assert_eq!(clean.n_rows(), 2);
        assert_eq!(clean.rows(), &[1, 3]);
        assert_eq!(clean.values()[[1, 1]], 0.3);
    }

    #[test]
    fn test_rejects_ragged_rows() {
        let result = FeatureMatrix::from_rows(names(&["a", "b"]), &[vec![1.0, 2.0], vec![1.0]]);
        assert!(matches!(result, Err(RegimeError::InvalidParameter(_))));
    }

    #[test]
    fn test_column_lookup() {
        let matrix = FeatureMatrix::from_rows(names(&["ret", "vol"]), &[vec![1.0, 2.0]]).unwrap();
        assert_eq!(matrix.column_index("vol"), Some(1));
        assert_eq!(matrix.column("ret").unwrap()[0], 1.0);
        assert!(matrix.column("rsi").is_none());
    }

    #[test]
    fn test_split_at_preserves_bar_indices() {
        let matrix = FeatureMatrix::from_rows(
            names(&["x"]),
            &[vec![1.0], vec![2.0], vec![3.0]],
        )
        .unwrap();

        let (train, test) = matrix.split_at(2);
        assert_eq!(train.rows(), &[0, 1]);
        assert_eq!(test.rows(), &[2]);
        assert_eq!(test.values()[[0, 0]], 3.0);
    }
}
