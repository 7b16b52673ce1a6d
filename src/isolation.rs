// Isolation Forest anomaly detection
//
// Anomalies are isolated by fewer random splits, so their average path length over
// the forest is short. Labels are never used for fitting; only the contamination
// fraction calibrates the outlier threshold.

use linfa::traits::{Fit, PredictInplace};
use linfa::DatasetBase;
use ndarray::{Array1, Array2, ArrayBase, ArrayView1, ArrayView2, Data, Ix2};
use rand::seq::{index, SliceRandom};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

use crate::error::{FraudError, Result};
use crate::model::{check_features, ScoreModel};

const DEFAULT_MAX_SAMPLES: usize = 256;
const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

// Outlier code returned by [`IsolationForest::predict_outliers`].
pub const OUTLIER: i8 = -1;
// Inlier code returned by [`IsolationForest::predict_outliers`].
pub const INLIER: i8 = 1;

// Maps outlier/inlier codes onto fraud labels: `-1 -> 1`, `1 -> 0`.
pub fn map_outlier_labels(codes: ArrayView1<i8>) -> Array1<usize> {
    codes.mapv(|c| if c == OUTLIER { 1 } else { 0 })
}

// Average path length of an unsuccessful BST search over n points
fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

// Linear-interpolated percentile of sorted values, q in [0, 100]
fn percentile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let pos = (q / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

#[derive(Debug, Clone)]
enum IsolationNode {
    Internal {
        feature: usize,
        threshold: f64,
        left: Box<IsolationNode>,
        right: Box<IsolationNode>,
    },
    Leaf {
        size: usize,
    },
}

impl IsolationNode {
    fn build(
        x: ArrayView2<f64>,
        rows: &mut [usize],
        depth: usize,
        max_depth: usize,
        rng: &mut ChaCha8Rng,
    ) -> Self {
        let n = rows.len();
        if depth >= max_depth || n <= 1 {
            return IsolationNode::Leaf { size: n };
        }

        // first feature (in random order) that is not constant on these rows
        let mut features: Vec<usize> = (0..x.ncols()).collect();
        features.shuffle(rng);
        let mut chosen = None;
        for feature in features {
            let (min, max) = rows.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &r| {
                let v = x[[r, feature]];
                (lo.min(v), hi.max(v))
            });
            if max > min {
                chosen = Some((feature, min, max));
                break;
            }
        }
        let (feature, min, max) = match chosen {
            Some(c) => c,
            None => return IsolationNode::Leaf { size: n },
        };

        let threshold = rng.gen_range(min..max);
        let mut split = 0;
        for i in 0..n {
            if x[[rows[i], feature]] < threshold {
                rows.swap(split, i);
                split += 1;
            }
        }
        let (left_rows, right_rows) = rows.split_at_mut(split);
        let left = Self::build(x, left_rows, depth + 1, max_depth, rng);
        let right = Self::build(x, right_rows, depth + 1, max_depth, rng);
        IsolationNode::Internal {
            feature,
            threshold,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    fn path_length(&self, row: ArrayView1<f64>) -> f64 {
        let mut node = self;
        let mut depth = 0.0;
        loop {
            match node {
                IsolationNode::Leaf { size } => return depth + average_path_length(*size),
                IsolationNode::Internal {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    depth += 1.0;
                    node = if row[*feature] < *threshold { &**left } else { &**right };
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IsolationForestParams {
    n_estimators: usize,
    max_samples: usize,
    contamination: f64,
    seed: u64,
}

impl Default for IsolationForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_samples: DEFAULT_MAX_SAMPLES,
            contamination: 0.1,
            seed: 42,
        }
    }
}

impl IsolationForestParams {
    #[cfg(test)]
    pub fn n_estimators(mut self, n: usize) -> Self {
        self.n_estimators = n;
        self
    }

    // Sub-sample drawn for each tree; capped at the training row count.
    #[cfg(test)]
    pub fn max_samples(mut self, n: usize) -> Self {
        self.max_samples = n;
        self
    }

    // Expected share of anomalies, in (0, 0.5].
    pub fn contamination(mut self, contamination: f64) -> Self {
        self.contamination = contamination;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn fit_features(&self, x: ArrayView2<f64>) -> Result<IsolationForest> {
        if self.n_estimators == 0 || self.max_samples == 0 {
            return Err(FraudError::computation(
                "n_estimators and max_samples must be positive",
            ));
        }
        if !(self.contamination > 0.0 && self.contamination <= 0.5) {
            return Err(FraudError::computation(format!(
                "contamination must be in (0, 0.5], got {}",
                self.contamination
            )));
        }
        check_features(x)?;

        let n_samples = x.nrows();
        let psi = self.max_samples.min(n_samples);
        let max_depth = (psi as f64).log2().ceil().max(1.0) as usize;

        let trees: Vec<IsolationNode> = (0..self.n_estimators)
            .into_par_iter()
            .map(|i| {
                let mut rng = ChaCha8Rng::seed_from_u64(self.seed.wrapping_add(i as u64));
                let mut rows = index::sample(&mut rng, n_samples, psi).into_vec();
                IsolationNode::build(x, &mut rows, 0, max_depth, &mut rng)
            })
            .collect();

        let mut forest = IsolationForest {
            params: self.clone(),
            trees,
            sample_size: psi,
            offset: 0.0,
        };
        let mut scores = forest.score_samples(x).to_vec();
        scores.sort_unstable_by(f64::total_cmp);
        forest.offset = percentile(&scores, 100.0 * self.contamination);
        Ok(forest)
    }
}

#[derive(Debug, Clone)]
pub struct IsolationForest {
    params: IsolationForestParams,
    trees: Vec<IsolationNode>,
    sample_size: usize,
    offset: f64,
}

impl IsolationForest {
    pub fn params() -> IsolationForestParams {
        IsolationForestParams::default()
    }

    pub fn hyperparameters(&self) -> &IsolationForestParams {
        &self.params
    }

    // Score threshold separating outliers from inliers.
    pub fn offset(&self) -> f64 {
        self.offset
    }

    // Opposite of the anomaly score `2^(-E[h(x)] / c(psi))`: in [-1, 0], lower is more anomalous.
    pub fn score_samples(&self, x: ArrayView2<f64>) -> Array1<f64> {
        let c = average_path_length(self.sample_size).max(f64::MIN_POSITIVE);
        let n_trees = self.trees.len() as f64;
        let scores: Vec<f64> = (0..x.nrows())
            .into_par_iter()
            .map(|i| {
                let row = x.row(i);
                let mean_path = self.trees.iter().map(|t| t.path_length(row)).sum::<f64>() / n_trees;
                -(2f64.powf(-mean_path / c))
            })
            .collect();
        Array1::from(scores)
    }

    // Negative for outliers, positive for inliers.
    pub fn decision_function(&self, x: ArrayView2<f64>) -> Array1<f64> {
        self.score_samples(x) - self.offset
    }

    // `-1` for outliers, `1` for inliers.
    pub fn predict_outliers(&self, x: ArrayView2<f64>) -> Array1<i8> {
        self.decision_function(x)
            .mapv(|d| if d < 0.0 { OUTLIER } else { INLIER })
    }
}

// Targets are ignored; only the feature matrix is used.
impl Fit<Array2<f64>, Array1<usize>, FraudError> for IsolationForestParams {
    type Object = IsolationForest;

    fn fit(&self, dataset: &DatasetBase<Array2<f64>, Array1<usize>>) -> Result<IsolationForest> {
        self.fit_features(dataset.records.view())
    }
}

impl<D: Data<Elem = f64>> PredictInplace<ArrayBase<D, Ix2>, Array1<usize>> for IsolationForest {
    fn predict_inplace(&self, x: &ArrayBase<D, Ix2>, y: &mut Array1<usize>) {
        assert_eq!(x.nrows(), y.len(), "one target slot per row");
        let codes = self.predict_outliers(x.view());
        y.assign(&map_outlier_labels(codes.view()));
    }

    fn default_target(&self, x: &ArrayBase<D, Ix2>) -> Array1<usize> {
        Array1::zeros(x.nrows())
    }
}

impl ScoreModel for IsolationForest {
    // flipped so that larger means more anomalous, i.e. more likely fraud
    fn confidence_scores(&self, x: ArrayView2<f64>) -> Option<Array1<f64>> {
        Some(-self.decision_function(x))
    }
}
