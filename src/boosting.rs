// Gradient-boosted trees in the XGBoost style: second-order split gain, L2-regularized
// leaf weights, `gamma` pruning, and row/column subsampling per round.

use std::fmt;

use linfa::traits::{Fit, PredictInplace};
use linfa::DatasetBase;
use ndarray::{Array1, Array2, ArrayBase, ArrayView1, ArrayView2, Data, Ix2};
use rand::seq::{index, SliceRandom};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use tracing::debug;

use crate::error::{FraudError, Result};
use crate::model::{check_binary_targets, normalize, sigmoid, ScoreModel};

const LOG_EVERY: usize = 25;

// Training loss. Only binary log-loss is implemented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Objective {
    BinaryLogistic,
}

impl fmt::Display for Objective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Objective::BinaryLogistic => write!(f, "binary:logistic"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct XgbParams {
    n_estimators: usize,
    max_depth: usize,
    learning_rate: f64,
    subsample: f64,
    colsample_bytree: f64,
    reg_lambda: f64,
    gamma: f64,
    min_child_weight: f64,
    objective: Objective,
    seed: u64,
}

impl Default for XgbParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: 6,
            learning_rate: 0.3,
            subsample: 1.0,
            colsample_bytree: 1.0,
            reg_lambda: 1.0,
            gamma: 0.0,
            min_child_weight: 1.0,
            objective: Objective::BinaryLogistic,
            seed: 0,
        }
    }
}

impl XgbParams {
    pub fn n_estimators(mut self, n: usize) -> Self {
        self.n_estimators = n;
        self
    }

    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn learning_rate(mut self, eta: f64) -> Self {
        self.learning_rate = eta;
        self
    }

    pub fn subsample(mut self, ratio: f64) -> Self {
        self.subsample = ratio;
        self
    }

    pub fn colsample_bytree(mut self, ratio: f64) -> Self {
        self.colsample_bytree = ratio;
        self
    }

    #[cfg(test)]
    pub fn reg_lambda(mut self, lambda: f64) -> Self {
        self.reg_lambda = lambda;
        self
    }

    #[cfg(test)]
    pub fn gamma(mut self, gamma: f64) -> Self {
        self.gamma = gamma;
        self
    }

    #[cfg(test)]
    pub fn min_child_weight(mut self, weight: f64) -> Self {
        self.min_child_weight = weight;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn objective(&self) -> Objective {
        self.objective
    }

    fn check(&self) -> Result<()> {
        let ratio_ok = |r: f64| r > 0.0 && r <= 1.0;
        if self.n_estimators == 0 {
            return Err(FraudError::computation("n_estimators must be positive"));
        }
        if self.max_depth == 0 {
            return Err(FraudError::computation("max_depth must be positive"));
        }
        if !(self.learning_rate > 0.0) {
            return Err(FraudError::computation(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if !ratio_ok(self.subsample) || !ratio_ok(self.colsample_bytree) {
            return Err(FraudError::computation(format!(
                "subsample ratios must be in (0, 1], got subsample={} colsample_bytree={}",
                self.subsample, self.colsample_bytree
            )));
        }
        if self.reg_lambda < 0.0 || self.gamma < 0.0 || self.min_child_weight < 0.0 {
            return Err(FraudError::computation(
                "reg_lambda, gamma and min_child_weight must be non-negative",
            ));
        }
        Ok(())
    }
}

impl fmt::Display for XgbParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "n_estimators={}, max_depth={}, learning_rate={}, subsample={}, colsample_bytree={}",
            self.n_estimators, self.max_depth, self.learning_rate, self.subsample, self.colsample_bytree
        )
    }
}

#[derive(Debug, Clone)]
enum Node {
    Leaf {
        weight: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

impl Node {
    fn weight(&self, row: ArrayView1<f64>) -> f64 {
        let mut node = self;
        loop {
            match node {
                Node::Leaf { weight } => return *weight,
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
}

struct Candidate {
    feature: usize,
    threshold: f64,
    gain: f64,
}

// One boosting round's regression tree over gradients and hessians
struct RoundBuilder<'a, 'b> {
    x: ArrayView2<'a, f64>,
    grad: &'b [f64],
    hess: &'b [f64],
    features: &'b [usize],
    params: &'b XgbParams,
    gain_total: &'b mut [f64],
    split_count: &'b mut [usize],
}

impl RoundBuilder<'_, '_> {
    fn leaf_weight(&self, g: f64, h: f64) -> f64 {
        -g / (h + self.params.reg_lambda) * self.params.learning_rate
    }

    fn score(&self, g: f64, h: f64) -> f64 {
        g * g / (h + self.params.reg_lambda)
    }

    fn grow(&mut self, rows: &mut [usize], depth: usize) -> Node {
        let g: f64 = rows.iter().map(|&r| self.grad[r]).sum();
        let h: f64 = rows.iter().map(|&r| self.hess[r]).sum();
        let leaf = Node::Leaf {
            weight: self.leaf_weight(g, h),
        };
        if depth >= self.params.max_depth || rows.len() < 2 {
            return leaf;
        }

        let best = match self.best_split(rows, g, h) {
            Some(best) => best,
            None => return leaf,
        };
        self.gain_total[best.feature] += best.gain;
        self.split_count[best.feature] += 1;

        let mut split = 0;
        for i in 0..rows.len() {
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

    fn best_split(&self, rows: &[usize], g: f64, h: f64) -> Option<Candidate> {
        let parent = self.score(g, h);
        let mcw = self.params.min_child_weight;
        let mut best: Option<Candidate> = None;
        let mut sorted: Vec<(f64, usize)> = Vec::with_capacity(rows.len());

        for &feature in self.features {
            sorted.clear();
            sorted.extend(rows.iter().map(|&r| (self.x[[r, feature]], r)));
            sorted.sort_unstable_by(|a, b| a.0.total_cmp(&b.0));

            let (mut gl, mut hl) = (0.0, 0.0);
            for i in 0..sorted.len() - 1 {
                let r = sorted[i].1;
                gl += self.grad[r];
                hl += self.hess[r];
                if sorted[i].0 == sorted[i + 1].0 {
                    continue;
                }
                let (gr, hr) = (g - gl, h - hl);
                if hl < mcw || hr < mcw {
                    continue;
                }
                let gain = 0.5 * (self.score(gl, hl) + self.score(gr, hr) - parent) - self.params.gamma;
                if gain > 0.0 && best.as_ref().map_or(true, |b| gain > b.gain) {
                    let (lo, hi) = (sorted[i].0, sorted[i + 1].0);
                    let mut threshold = lo / 2.0 + hi / 2.0;
                    if threshold >= hi {
                        threshold = lo;
                    }
                    best = Some(Candidate {
                        feature,
                        threshold,
                        gain,
                    });
                }
            }
        }
        best
    }
}

fn log_loss(y: ArrayView1<usize>, margin: &[f64]) -> f64 {
    let eps = 1e-15;
    let total: f64 = y
        .iter()
        .zip(margin)
        .map(|(&t, &m)| {
            let p = sigmoid(m).clamp(eps, 1.0 - eps);
            if t == 1 {
                -p.ln()
            } else {
                -(1.0 - p).ln()
            }
        })
        .sum();
    total / y.len() as f64
}

#[derive(Debug, Clone)]
pub struct XgbClassifier {
    params: XgbParams,
    trees: Vec<Node>,
    base_margin: f64,
    importances: Array1<f64>,
    train_loss: Vec<f64>,
}

impl XgbClassifier {
    pub fn params() -> XgbParams {
        XgbParams::default()
    }

    pub fn hyperparameters(&self) -> &XgbParams {
        &self.params
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    // Training log-loss after each boosting round.
    pub fn train_loss(&self) -> &[f64] {
        &self.train_loss
    }

    pub fn margins(&self, x: ArrayView2<f64>) -> Array1<f64> {
        let margins: Vec<f64> = (0..x.nrows())
            .into_par_iter()
            .map(|i| {
                let row = x.row(i);
                self.base_margin + self.trees.iter().map(|t| t.weight(row)).sum::<f64>()
            })
            .collect();
        Array1::from(margins)
    }

    pub fn predict_probabilities(&self, x: ArrayView2<f64>) -> Array1<f64> {
        self.margins(x).mapv(sigmoid)
    }
}

impl Fit<Array2<f64>, Array1<usize>, FraudError> for XgbParams {
    type Object = XgbClassifier;

    fn fit(&self, dataset: &DatasetBase<Array2<f64>, Array1<usize>>) -> Result<XgbClassifier> {
        self.check()?;
        let x = dataset.records.view();
        let y = dataset.targets.view();
        check_binary_targets(x, y)?;
        let (n_samples, n_features) = x.dim();

        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        // base_score 0.5 corresponds to a zero starting margin
        let base_margin = 0.0;
        let mut margin = vec![base_margin; n_samples];
        let mut grad = vec![0.0; n_samples];
        let mut hess = vec![0.0; n_samples];
        let mut gain_total = vec![0.0; n_features];
        let mut split_count = vec![0usize; n_features];
        let mut trees = Vec::with_capacity(self.n_estimators);
        let mut train_loss = Vec::with_capacity(self.n_estimators);

        let n_rows = ((self.subsample * n_samples as f64).round() as usize).clamp(1, n_samples);
        let n_cols = ((self.colsample_bytree * n_features as f64).round() as usize).clamp(1, n_features);

        for round in 0..self.n_estimators {
            for i in 0..n_samples {
                let p = sigmoid(margin[i]);
                grad[i] = p - y[i] as f64;
                hess[i] = (p * (1.0 - p)).max(1e-16);
            }

            let mut rows: Vec<usize> = if n_rows < n_samples {
                index::sample(&mut rng, n_samples, n_rows).into_vec()
            } else {
                (0..n_samples).collect()
            };
            let mut features: Vec<usize> = (0..n_features).collect();
            if n_cols < n_features {
                features.shuffle(&mut rng);
                features.truncate(n_cols);
                features.sort_unstable();
            }

            let tree = {
                let mut builder = RoundBuilder {
                    x,
                    grad: &grad,
                    hess: &hess,
                    features: &features,
                    params: self,
                    gain_total: &mut gain_total,
                    split_count: &mut split_count,
                };
                builder.grow(&mut rows, 0)
            };

            for (i, m) in margin.iter_mut().enumerate() {
                *m += tree.weight(x.row(i));
            }
            trees.push(tree);

            let loss = log_loss(y, &margin);
            train_loss.push(loss);
            if round % LOG_EVERY == 0 || round + 1 == self.n_estimators {
                debug!(round, logloss = loss, "boosting round");
            }
        }

        let average_gain: Array1<f64> = gain_total
            .iter()
            .zip(&split_count)
            .map(|(&g, &c)| if c > 0 { g / c as f64 } else { 0.0 })
            .collect();

        Ok(XgbClassifier {
            params: self.clone(),
            trees,
            base_margin,
            importances: normalize(average_gain),
            train_loss,
        })
    }
}

impl<D: Data<Elem = f64>> PredictInplace<ArrayBase<D, Ix2>, Array1<usize>> for XgbClassifier {
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

impl ScoreModel for XgbClassifier {
    fn probabilities(&self, x: ArrayView2<f64>) -> Option<Array1<f64>> {
        Some(self.predict_probabilities(x))
    }

    fn feature_importances(&self) -> Option<&Array1<f64>> {
        Some(&self.importances)
    }
}
