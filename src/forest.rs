// Random forest: bootstrap-aggregated CART trees grown in parallel.

use std::fmt;

use linfa::traits::{Fit, PredictInplace};
use linfa::DatasetBase;
use ndarray::{Array1, Array2, ArrayBase, ArrayView2, Data, Ix2};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use tracing::debug;

use crate::error::{FraudError, Result};
use crate::model::{check_binary_targets, normalize, ScoreModel};
use crate::tree::{DecisionTree, DecisionTreeParams};

// How many features each split may look at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MaxFeatures {
    Sqrt,
    All,
    Count(usize),
}

impl MaxFeatures {
    fn resolve(self, n_features: usize) -> usize {
        match self {
            MaxFeatures::Sqrt => ((n_features as f64).sqrt().floor() as usize).max(1),
            MaxFeatures::All => n_features,
            MaxFeatures::Count(n) => n.clamp(1, n_features),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RandomForestParams {
    n_estimators: usize,
    max_depth: Option<usize>,
    min_samples_split: usize,
    min_samples_leaf: usize,
    max_features: MaxFeatures,
    bootstrap: bool,
    seed: u64,
}

impl Default for RandomForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: MaxFeatures::Sqrt,
            bootstrap: true,
            seed: 42,
        }
    }
}

impl RandomForestParams {
    pub fn n_estimators(mut self, n: usize) -> Self {
        self.n_estimators = n;
        self
    }

    pub fn max_depth(mut self, max_depth: Option<usize>) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn min_samples_split(mut self, n: usize) -> Self {
        self.min_samples_split = n;
        self
    }

    pub fn min_samples_leaf(mut self, n: usize) -> Self {
        self.min_samples_leaf = n;
        self
    }

    #[cfg(test)]
    pub fn max_features(mut self, max_features: MaxFeatures) -> Self {
        self.max_features = max_features;
        self
    }

    #[cfg(test)]
    pub fn bootstrap(mut self, bootstrap: bool) -> Self {
        self.bootstrap = bootstrap;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    fn tree_params(&self, n_features: usize, index: usize) -> DecisionTreeParams {
        DecisionTree::params()
            .max_depth(self.max_depth)
            .min_samples_split(self.min_samples_split)
            .min_samples_leaf(self.min_samples_leaf)
            .max_features(Some(self.max_features.resolve(n_features)))
            .seed(self.seed.wrapping_add(index as u64))
    }
}

impl fmt::Display for RandomForestParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "n_estimators={}, max_depth={}, min_samples_split={}, min_samples_leaf={}",
            self.n_estimators,
            self.max_depth.map_or("None".to_string(), |d| d.to_string()),
            self.min_samples_split,
            self.min_samples_leaf
        )
    }
}

#[derive(Debug, Clone)]
pub struct RandomForest {
    params: RandomForestParams,
    trees: Vec<DecisionTree>,
    importances: Array1<f64>,
}

impl RandomForest {
    pub fn params() -> RandomForestParams {
        RandomForestParams::default()
    }

    pub fn hyperparameters(&self) -> &RandomForestParams {
        &self.params
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    // Mean of the trees' leaf fraud fractions.
    pub fn predict_probabilities(&self, x: ArrayView2<f64>) -> Array1<f64> {
        let n_trees = self.trees.len() as f64;
        let probs: Vec<f64> = (0..x.nrows())
            .into_par_iter()
            .map(|i| {
                let row = x.row(i);
                self.trees.iter().map(|t| t.fraud_probability(row)).sum::<f64>() / n_trees
            })
            .collect();
        Array1::from(probs)
    }
}

impl Fit<Array2<f64>, Array1<usize>, FraudError> for RandomForestParams {
    type Object = RandomForest;

    fn fit(&self, dataset: &DatasetBase<Array2<f64>, Array1<usize>>) -> Result<RandomForest> {
        if self.n_estimators == 0 {
            return Err(FraudError::computation("n_estimators must be positive"));
        }
        let x = dataset.records.view();
        let y = dataset.targets.view();
        check_binary_targets(x, y)?;
        let (n_samples, n_features) = x.dim();
        self.tree_params(n_features, 0).check()?;

        let trees: Vec<DecisionTree> = (0..self.n_estimators)
            .into_par_iter()
            .map(|i| {
                let params = self.tree_params(n_features, i);
                let rows: Vec<usize> = if self.bootstrap {
                    let mut rng = ChaCha8Rng::seed_from_u64(self.seed.wrapping_add(i as u64));
                    (0..n_samples).map(|_| rng.gen_range(0..n_samples)).collect()
                } else {
                    (0..n_samples).collect()
                };
                params.fit_rows(x, y, rows)
            })
            .collect();

        let mut importances = Array1::<f64>::zeros(n_features);
        for tree in &trees {
            importances += tree.importances();
        }
        debug!(
            trees = trees.len(),
            mean_depth = trees.iter().map(DecisionTree::depth).sum::<usize>() as f64 / trees.len() as f64,
            mean_leaves = trees.iter().map(DecisionTree::n_leaves).sum::<usize>() as f64 / trees.len() as f64,
            "random forest grown"
        );

        Ok(RandomForest {
            params: self.clone(),
            trees,
            importances: normalize(importances),
        })
    }
}

impl<D: Data<Elem = f64>> PredictInplace<ArrayBase<D, Ix2>, Array1<usize>> for RandomForest {
    fn predict_inplace(&self, x: &ArrayBase<D, Ix2>, y: &mut Array1<usize>) {
        assert_eq!(x.nrows(), y.len(), "one target slot per row");
        let probs = self.predict_probabilities(x.view());
        for (target, p) in y.iter_mut().zip(probs.iter()) {
            *target = usize::from(*p > 0.5);
        }
    }

    fn default_target(&self, x: &ArrayBase<D, Ix2>) -> Array1<usize> {
        Array1::zeros(x.nrows())
    }
}

impl ScoreModel for RandomForest {
    fn probabilities(&self, x: ArrayView2<f64>) -> Option<Array1<f64>> {
        Some(self.predict_probabilities(x))
    }

    fn feature_importances(&self) -> Option<&Array1<f64>> {
        Some(&self.importances)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use linfa::traits::Predict;
    use linfa::Dataset;

    fn two_blobs() -> (Array2<f64>, Array1<usize>) {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let n = 120;
        let y = Array1::from_iter((0..n).map(|i| usize::from(i % 6 == 0)));
        let x = Array2::from_shape_fn((n, 4), |(i, _)| {
            let noise: f64 = rng.gen_range(-1.0..1.0);
            if y[i] == 1 { noise + 3.0 } else { noise }
        });
        (x, y)
    }

    #[test]
    fn test_separates_blobs() {
        let (x, y) = two_blobs();
        let forest = RandomForest::params()
            .n_estimators(25)
            .fit(&Dataset::new(x.clone(), y.clone()))
            .unwrap();
        assert_eq!(forest.n_trees(), 25);
        let predicted: Array1<usize> = forest.predict(&x);
        let correct = predicted.iter().zip(y.iter()).filter(|(p, t)| p == t).count();
        assert!(correct >= 115, "got {correct} of 120 right");
        let importances = forest.feature_importances().unwrap();
        assert_abs_diff_eq!(importances.sum(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_same_seed_same_forest() {
        let (x, y) = two_blobs();
        let params = RandomForest::params()
            .n_estimators(5)
            .max_features(MaxFeatures::Count(2))
            .seed(9);
        let a = params.fit(&Dataset::new(x.clone(), y.clone())).unwrap();
        let b = params.fit(&Dataset::new(x.clone(), y)).unwrap();
        assert_eq!(a.predict_probabilities(x.view()), b.predict_probabilities(x.view()));
        assert_eq!(a.hyperparameters(), &params);
    }

    #[test]
    fn test_unbagged_trees_fit_training_rows_exactly() {
        let (x, y) = two_blobs();
        let forest = RandomForest::params()
            .n_estimators(4)
            .max_features(MaxFeatures::All)
            .bootstrap(false)
            .fit(&Dataset::new(x.clone(), y))
            .unwrap();
        // unlimited depth on the full train set ends in pure leaves
        let probs = forest.predict_probabilities(x.view());
        assert!(probs.iter().all(|&p| p == 0.0 || p == 1.0));
    }

    #[test]
    fn test_zero_trees_rejected() {
        let (x, y) = two_blobs();
        let err = RandomForest::params()
            .n_estimators(0)
            .fit(&Dataset::new(x, y))
            .unwrap_err();
        assert!(err.is_computation());
    }
}
