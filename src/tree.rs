// CART classification tree with Gini impurity, the building block of the random forest.

use std::fmt;

use linfa::traits::{Fit, PredictInplace};
use linfa::DatasetBase;
use ndarray::{Array1, Array2, ArrayBase, ArrayView1, ArrayView2, Data, Ix2};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::error::{FraudError, Result};
use crate::model::{check_binary_targets, normalize, ScoreModel};

#[derive(Debug, Clone, PartialEq)]
pub struct DecisionTreeParams {
    max_depth: Option<usize>,
    min_samples_split: usize,
    min_samples_leaf: usize,
    max_features: Option<usize>,
    seed: u64,
}

impl Default for DecisionTreeParams {
    fn default() -> Self {
        Self {
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: None,
            seed: 0,
        }
    }
}

impl DecisionTreeParams {
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

    // Features drawn per split; `None` considers all of them.
    pub fn max_features(mut self, n: Option<usize>) -> Self {
        self.max_features = n;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn check(&self) -> Result<()> {
        if self.min_samples_split < 2 {
            return Err(FraudError::computation("min_samples_split must be at least 2"));
        }
        if self.min_samples_leaf < 1 {
            return Err(FraudError::computation("min_samples_leaf must be at least 1"));
        }
        if self.max_depth == Some(0) {
            return Err(FraudError::computation("max_depth must be positive"));
        }
        if self.max_features == Some(0) {
            return Err(FraudError::computation("max_features must be positive"));
        }
        Ok(())
    }

    // Grows a tree on the given rows (duplicates allowed, as in a bootstrap sample).
    // Inputs must already be validated.
    pub(crate) fn fit_rows<'a>(
        &self,
        x: ArrayView2<'a, f64>,
        y: ArrayView1<'a, usize>,
        mut rows: Vec<usize>,
    ) -> DecisionTree {
        let n_features = x.ncols();
        let mut builder = Builder {
            x,
            y,
            params: self,
            max_features: self.max_features.unwrap_or(n_features).min(n_features),
            importances: Array1::zeros(n_features),
            rng: ChaCha8Rng::seed_from_u64(self.seed),
        };
        let root = builder.grow(&mut rows, 0);
        DecisionTree {
            root,
            importances: normalize(builder.importances),
            n_features,
        }
    }
}

impl fmt::Display for DecisionTreeParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "max_depth={}, min_samples_split={}, min_samples_leaf={}",
            self.max_depth.map_or("None".to_string(), |d| d.to_string()),
            self.min_samples_split,
            self.min_samples_leaf
        )
    }
}

#[derive(Debug, Clone)]
enum Node {
    Leaf {
        fraud_probability: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    child_impurity: f64,
}

struct Builder<'a, 'p> {
    x: ArrayView2<'a, f64>,
    y: ArrayView1<'a, usize>,
    params: &'p DecisionTreeParams,
    max_features: usize,
    importances: Array1<f64>,
    rng: ChaCha8Rng,
}

// Gini impurity of a node holding `positives` fraud rows out of `n`
fn gini(positives: usize, n: usize) -> f64 {
    if n == 0 {
        return 0.0;
    }
    let p = positives as f64 / n as f64;
    2.0 * p * (1.0 - p)
}

impl Builder<'_, '_> {
    fn grow(&mut self, rows: &mut [usize], depth: usize) -> Node {
        let n = rows.len();
        let positives = rows.iter().filter(|&&r| self.y[r] == 1).count();
        let leaf = Node::Leaf {
            fraud_probability: if n == 0 { 0.0 } else { positives as f64 / n as f64 },
        };

        let depth_reached = self.params.max_depth.map_or(false, |d| depth >= d);
        if depth_reached
            || n < self.params.min_samples_split
            || n < 2 * self.params.min_samples_leaf
            || positives == 0
            || positives == n
        {
            return leaf;
        }

        let parent = n as f64 * gini(positives, n);
        let best = match self.best_split(rows, positives) {
            Some(best) if best.child_impurity < parent - 1e-12 => best,
            _ => return leaf,
        };
        self.importances[best.feature] += parent - best.child_impurity;

        let mut split = 0;
        for i in 0..n {
            if self.x[[rows[i], best.feature]] <= best.threshold {
                rows.swap(split, i);
                split += 1;
            }
        }
        let (left_rows, right_rows) = rows.split_at_mut(split);
        let left = self.grow(left_rows, depth + 1);
        let right = self.grow(right_rows, depth + 1);

        Node::Split {
            feature: best.feature,
            threshold: best.threshold,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    // Scans features in random order. Stops after `max_features` of them once a valid
    // split exists, and keeps going past that limit while none has been found.
    fn best_split(&mut self, rows: &[usize], positives: usize) -> Option<BestSplit> {
        let n = rows.len();
        let min_leaf = self.params.min_samples_leaf;
        let mut features: Vec<usize> = (0..self.x.ncols()).collect();
        features.shuffle(&mut self.rng);

        let mut best: Option<BestSplit> = None;
        let mut pairs: Vec<(f64, usize)> = Vec::with_capacity(n);
        for (visited, &feature) in features.iter().enumerate() {
            if visited >= self.max_features && best.is_some() {
                break;
            }

            pairs.clear();
            pairs.extend(rows.iter().map(|&r| (self.x[[r, feature]], self.y[r])));
            pairs.sort_unstable_by(|a, b| a.0.total_cmp(&b.0));

            let mut left_pos = 0;
            for i in 0..n - 1 {
                left_pos += pairs[i].1;
                if pairs[i].0 == pairs[i + 1].0 {
                    continue;
                }
                let n_left = i + 1;
                let n_right = n - n_left;
                if n_left < min_leaf || n_right < min_leaf {
                    continue;
                }
                let impurity = n_left as f64 * gini(left_pos, n_left)
                    + n_right as f64 * gini(positives - left_pos, n_right);
                if best.as_ref().map_or(true, |b| impurity < b.child_impurity) {
                    let (lo, hi) = (pairs[i].0, pairs[i + 1].0);
                    let mut threshold = lo / 2.0 + hi / 2.0;
                    if threshold >= hi {
                        threshold = lo;
                    }
                    best = Some(BestSplit {
                        feature,
                        threshold,
                        child_impurity: impurity,
                    });
                }
            }
        }
        best
    }
}

#[derive(Debug, Clone)]
pub struct DecisionTree {
    root: Node,
    importances: Array1<f64>,
    n_features: usize,
}

impl DecisionTree {
    pub fn params() -> DecisionTreeParams {
        DecisionTreeParams::default()
    }

    #[cfg(test)]
    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn fraud_probability(&self, row: ArrayView1<f64>) -> f64 {
        let mut node = &self.root;
        loop {
            match node {
                Node::Leaf { fraud_probability } => return *fraud_probability,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if row[*feature] <= *threshold { &**left } else { &**right };
                }
            }
        }
    }

    pub fn depth(&self) -> usize {
        fn walk(node: &Node) -> usize {
            match node {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(left).max(walk(right)),
            }
        }
        walk(&self.root)
    }

    pub fn n_leaves(&self) -> usize {
        fn walk(node: &Node) -> usize {
            match node {
                Node::Leaf { .. } => 1,
                Node::Split { left, right, .. } => walk(left) + walk(right),
            }
        }
        walk(&self.root)
    }

    // Impurity-decrease importances, normalized.
    pub fn importances(&self) -> &Array1<f64> {
        &self.importances
    }
}

impl Fit<Array2<f64>, Array1<usize>, FraudError> for DecisionTreeParams {
    type Object = DecisionTree;

    fn fit(&self, dataset: &DatasetBase<Array2<f64>, Array1<usize>>) -> Result<DecisionTree> {
        self.check()?;
        check_binary_targets(dataset.records.view(), dataset.targets.view())?;
        let rows = (0..dataset.records.nrows()).collect();
        Ok(self.fit_rows(dataset.records.view(), dataset.targets.view(), rows))
    }
}

impl<D: Data<Elem = f64>> PredictInplace<ArrayBase<D, Ix2>, Array1<usize>> for DecisionTree {
    fn predict_inplace(&self, x: &ArrayBase<D, Ix2>, y: &mut Array1<usize>) {
        assert_eq!(x.nrows(), y.len(), "one target slot per row");
        assert_eq!(x.ncols(), self.n_features, "feature count differs from training");
        for (row, target) in x.rows().into_iter().zip(y.iter_mut()) {
            *target = usize::from(self.fraud_probability(row) > 0.5);
        }
    }

    fn default_target(&self, x: &ArrayBase<D, Ix2>) -> Array1<usize> {
        Array1::zeros(x.nrows())
    }
}

impl ScoreModel for DecisionTree {
    fn probabilities(&self, x: ArrayView2<f64>) -> Option<Array1<f64>> {
        Some(x.rows().into_iter().map(|row| self.fraud_probability(row)).collect())
    }

    fn feature_importances(&self) -> Option<&Array1<f64>> {
        Some(&self.importances)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use linfa::Dataset;
    use ndarray::array;

    #[test]
    fn test_single_threshold_split() {
        let x = array![[1.0], [2.0], [3.0], [10.0], [11.0], [12.0]];
        let y = array![0, 0, 0, 1, 1, 1];
        let tree = DecisionTree::params().fit(&Dataset::new(x, y)).unwrap();
        assert_eq!(tree.depth(), 1);
        assert_eq!(tree.n_leaves(), 2);
        assert_eq!(tree.fraud_probability(array![2.5].view()), 0.0);
        assert_eq!(tree.fraud_probability(array![6.6].view()), 1.0);
    }

    #[test]
    fn test_min_samples_leaf_limits_growth() {
        let x = array![[1.0], [2.0], [3.0], [4.0]];
        let y = array![0, 1, 0, 1];
        let tree = DecisionTree::params()
            .min_samples_leaf(2)
            .fit(&Dataset::new(x, y))
            .unwrap();
        assert!(tree.n_leaves() <= 2);
    }

    #[test]
    fn test_fit_rows_accepts_repeated_rows() {
        let x = array![[1.0], [2.0], [10.0], [11.0]];
        let y = array![0, 0, 1, 1];
        let params = DecisionTree::params().seed(3);
        let tree = params.fit_rows(x.view(), y.view(), vec![0, 0, 1, 3, 3, 2]);
        assert_eq!(tree.n_features(), 1);
        assert_eq!(tree.fraud_probability(array![1.5].view()), 0.0);
        assert_eq!(tree.fraud_probability(array![10.5].view()), 1.0);
    }

    #[test]
    fn test_single_class_rejected() {
        let x = array![[1.0], [2.0]];
        let y = array![0, 0];
        assert!(DecisionTree::params().fit(&Dataset::new(x, y)).is_err());
    }
}
