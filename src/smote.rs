// SMOTE: synthetic minority oversampling by interpolating towards nearest minority neighbours.

use linfa_nn::distance::L2Dist;
use linfa_nn::{CommonNearestNeighbour, NearestNeighbour};
use ndarray::{concatenate, Array1, Array2, Axis};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, warn};

use crate::error::{FraudError, Result};
use crate::model::check_features;
use crate::preprocess::class_counts;

#[derive(Debug, Clone, PartialEq)]
pub struct Smote {
    k_neighbors: usize,
    seed: u64,
}

impl Default for Smote {
    fn default() -> Self {
        Self {
            k_neighbors: 5,
            seed: 42,
        }
    }
}

impl Smote {
    pub fn new(k_neighbors: usize) -> Self {
        Self {
            k_neighbors,
            ..Self::default()
        }
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    // Appends synthetic minority rows until both classes have the majority's count.
    // The original rows come first, unchanged and in order.
    pub fn fit_resample(&self, x: &Array2<f64>, y: &Array1<usize>) -> Result<(Array2<f64>, Array1<usize>)> {
        check_features(x.view())?;
        if x.nrows() != y.len() {
            return Err(FraudError::computation(format!(
                "{} rows but {} labels",
                x.nrows(),
                y.len()
            )));
        }
        if self.k_neighbors == 0 {
            return Err(FraudError::computation("k_neighbors must be positive"));
        }

        let (negatives, positives) = class_counts(y);
        let (minority_label, n_minority, n_majority) = if positives <= negatives {
            (1, positives, negatives)
        } else {
            (0, negatives, positives)
        };
        let n_new = n_majority - n_minority;
        if n_new == 0 {
            return Ok((x.clone(), y.clone()));
        }
        if n_minority < 2 {
            return Err(FraudError::computation(format!(
                "oversampling needs at least 2 minority rows, found {n_minority}"
            )));
        }

        let k = self.k_neighbors.min(n_minority - 1);
        if k < self.k_neighbors {
            warn!(requested = self.k_neighbors, used = k, "fewer minority rows than neighbours requested");
        }

        let minority_rows: Vec<usize> = (0..y.len()).filter(|&i| y[i] == minority_label).collect();
        let minority = x.select(Axis(0), &minority_rows);

        let index = CommonNearestNeighbour::KdTree
            .from_batch(&minority, L2Dist)
            .map_err(|e| FraudError::computation(format!("building neighbour index: {e}")))?;
        let mut neighbours: Vec<Vec<usize>> = Vec::with_capacity(n_minority);
        for (i, row) in minority.rows().into_iter().enumerate() {
            let found = index
                .k_nearest(row, k + 1)
                .map_err(|e| FraudError::computation(format!("neighbour query: {e}")))?;
            neighbours.push(
                found
                    .into_iter()
                    .map(|(_, j)| j)
                    .filter(|&j| j != i)
                    .take(k)
                    .collect(),
            );
        }
        debug!(k, minority = n_minority, synthetic = n_new, "smote neighbours computed");

        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let n_features = x.ncols();
        let mut synthetic = Vec::with_capacity(n_new * n_features);
        for _ in 0..n_new {
            let i = rng.gen_range(0..n_minority);
            let j = neighbours[i][rng.gen_range(0..neighbours[i].len())];
            let gap: f64 = rng.gen();
            let base = minority.row(i);
            let towards = minority.row(j);
            synthetic.extend(base.iter().zip(towards.iter()).map(|(&a, &b)| a + gap * (b - a)));
        }
        let synthetic = Array2::from_shape_vec((n_new, n_features), synthetic)
            .map_err(|e| FraudError::computation(e.to_string()))?;

        let x_res = concatenate(Axis(0), &[x.view(), synthetic.view()])
            .map_err(|e| FraudError::computation(e.to_string()))?;
        let y_res = concatenate(Axis(0), &[y.view(), Array1::from_elem(n_new, minority_label).view()])
            .map_err(|e| FraudError::computation(e.to_string()))?;
        Ok((x_res, y_res))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_balances_classes() {
        let x = array![
            [0.0, 0.0],
            [0.1, 0.2],
            [0.2, 0.1],
            [0.3, 0.3],
            [0.4, 0.1],
            [0.5, 0.5],
            [5.0, 5.0],
            [5.2, 5.1],
            [5.1, 5.3]
        ];
        let y = array![0, 0, 0, 0, 0, 0, 1, 1, 1];
        let (x_res, y_res) = Smote::new(5).fit_resample(&x, &y).unwrap();
        assert_eq!(class_counts(&y_res), (6, 6));
        assert_eq!(x_res.nrows(), 12);

        // originals untouched, synthetic rows inside the minority's bounding box
        assert_eq!(x_res.slice(ndarray::s![..9, ..]), x);
        for row in x_res.slice(ndarray::s![9.., ..]).rows() {
            assert!(row[0] >= 5.0 - 1e-9 && row[0] <= 5.2 + 1e-9);
            assert!(row[1] >= 5.0 - 1e-9 && row[1] <= 5.3 + 1e-9);
        }
    }

    #[test]
    fn test_single_minority_row_fails() {
        let x = array![[0.0], [1.0], [2.0]];
        let y = array![0, 0, 1];
        assert!(Smote::default().fit_resample(&x, &y).is_err());
    }

    #[test]
    fn test_already_balanced_is_identity() {
        let x = array![[0.0], [1.0]];
        let y = array![0, 1];
        let (x_res, y_res) = Smote::default().fit_resample(&x, &y).unwrap();
        assert_eq!(x_res, x);
        assert_eq!(y_res, y);
    }
}
