// Stratified train/test split and feature standardization.

use std::collections::BTreeMap;

use linfa::Dataset;
use ndarray::{Array1, Array2, Axis};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info};

use crate::config::PipelineConfig;
use crate::csv_reader::Transactions;
use crate::error::{FraudError, Result};

// Returns `(negatives, positives)`.
pub fn class_counts(labels: &Array1<usize>) -> (usize, usize) {
    let positives = labels.iter().filter(|&&l| l == 1).count();
    (labels.len() - positives, positives)
}

// Share of rows labelled fraud.
pub fn fraud_ratio(labels: &Array1<usize>) -> f64 {
    if labels.is_empty() {
        return 0.0;
    }
    let (_, positives) = class_counts(labels);
    positives as f64 / labels.len() as f64
}

// Number of test rows each class contributes.
//
// Classes receive `n_c * n_test / n` rows rounded down; leftover rows go to the
// classes with the largest fractional part. Any class with at least two rows
// keeps one row on each side of the split.
fn allocate_test_rows(class_sizes: &[usize], n_test: usize) -> Vec<usize> {
    let n: usize = class_sizes.iter().sum();
    let exact: Vec<f64> = class_sizes
        .iter()
        .map(|&c| c as f64 * n_test as f64 / n as f64)
        .collect();
    let mut alloc: Vec<usize> = exact.iter().map(|e| e.floor() as usize).collect();

    let mut leftover = n_test - alloc.iter().sum::<usize>();
    let mut order: Vec<usize> = (0..class_sizes.len()).collect();
    order.sort_by(|&a, &b| {
        let fa = exact[a] - exact[a].floor();
        let fb = exact[b] - exact[b].floor();
        fb.total_cmp(&fa).then(class_sizes[b].cmp(&class_sizes[a]))
    });
    for &c in order.iter().cycle() {
        if leftover == 0 {
            break;
        }
        if alloc[c] < class_sizes[c] {
            alloc[c] += 1;
            leftover -= 1;
        }
    }

    let largest = (0..class_sizes.len())
        .max_by_key(|&c| class_sizes[c])
        .unwrap_or(0);
    for c in 0..class_sizes.len() {
        if c == largest || class_sizes[c] < 2 {
            continue;
        }
        if alloc[c] == 0 && alloc[largest] > 1 {
            alloc[c] += 1;
            alloc[largest] -= 1;
        } else if alloc[c] == class_sizes[c] && alloc[largest] + 1 < class_sizes[largest] {
            alloc[c] -= 1;
            alloc[largest] += 1;
        }
    }
    alloc
}

// Row indices (train, test) for a split that keeps each class's share on both sides.
pub fn stratified_indices(
    labels: &Array1<usize>,
    test_fraction: f64,
    seed: u64,
) -> Result<(Vec<usize>, Vec<usize>)> {
    let n = labels.len();
    let n_test = (test_fraction * n as f64).ceil() as usize;
    if n_test == 0 || n_test >= n {
        return Err(FraudError::InvalidConfig(format!(
            "test fraction {test_fraction} leaves an empty partition for {n} rows"
        )));
    }

    let mut by_class: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (i, &label) in labels.iter().enumerate() {
        by_class.entry(label).or_default().push(i);
    }
    let sizes: Vec<usize> = by_class.values().map(Vec::len).collect();
    let alloc = allocate_test_rows(&sizes, n_test);

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut train = Vec::with_capacity(n - n_test);
    let mut test = Vec::with_capacity(n_test);
    for (rows, take) in by_class.into_values().zip(alloc) {
        let mut rows = rows;
        rows.shuffle(&mut rng);
        test.extend_from_slice(&rows[..take]);
        train.extend_from_slice(&rows[take..]);
    }
    train.shuffle(&mut rng);
    test.shuffle(&mut rng);
    Ok((train, test))
}

fn subset(dataset: &Transactions, rows: &[usize]) -> Transactions {
    Dataset::new(
        dataset.records.select(Axis(0), rows),
        dataset.targets.select(Axis(0), rows),
    )
    .with_feature_names(dataset.feature_names())
}

// Split into `(train, test)` with matching fraud proportions.
pub fn stratified_split(
    dataset: &Transactions,
    test_fraction: f64,
    seed: u64,
) -> Result<(Transactions, Transactions)> {
    let (train, test) = stratified_indices(&dataset.targets, test_fraction, seed)?;
    Ok((subset(dataset, &train), subset(dataset, &test)))
}

// Per-feature mean/variance transform. Fitted once on the train partition.
#[derive(Debug, Clone, PartialEq)]
pub struct StandardScaler {
    mean: Array1<f64>,
    scale: Array1<f64>,
}

impl StandardScaler {
    pub fn fit(x: &Array2<f64>) -> Result<Self> {
        if x.nrows() == 0 {
            return Err(FraudError::computation("cannot fit a scaler on zero rows"));
        }
        if let Some(col) = x
            .axis_iter(Axis(1))
            .position(|c| c.iter().any(|v| !v.is_finite()))
        {
            return Err(FraudError::computation(format!(
                "feature column {col} contains NaN or infinite values"
            )));
        }

        let mean = x
            .mean_axis(Axis(0))
            .ok_or_else(|| FraudError::computation("cannot fit a scaler on zero rows"))?;
        // population variance; constant columns keep unit scale
        let scale = x
            .var_axis(Axis(0), 0.0)
            .mapv(|v| if v > 0.0 { v.sqrt() } else { 1.0 });
        Ok(Self { mean, scale })
    }

    pub fn transform(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        if x.ncols() != self.mean.len() {
            return Err(FraudError::computation(format!(
                "scaler fitted on {} features, got {}",
                self.mean.len(),
                x.ncols()
            )));
        }
        if x.iter().any(|v| !v.is_finite()) {
            return Err(FraudError::computation("cannot scale NaN or infinite values"));
        }
        Ok((x - &self.mean) / &self.scale)
    }

    pub fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    pub fn scale(&self) -> &Array1<f64> {
        &self.scale
    }
}

// Scaled partitions shared read-only by every trainer
pub struct PreparedData {
    pub x_train: Array2<f64>,
    pub x_test: Array2<f64>,
    pub y_train: Array1<usize>,
    pub y_test: Array1<usize>,
    pub scaler: StandardScaler,
    pub feature_names: Vec<String>,
}

impl PreparedData {
    pub fn train_fraud_ratio(&self) -> f64 {
        fraud_ratio(&self.y_train)
    }
}

// Split, then standardize with statistics from the train partition only
pub fn prepare(dataset: &Transactions, config: &PipelineConfig) -> Result<PreparedData> {
    let (train, test) = stratified_split(dataset, config.test_fraction, config.random_seed)?;

    let scaler = StandardScaler::fit(&train.records)?;
    debug!(mean = ?scaler.mean(), scale = ?scaler.scale(), "scaler fitted on train split");
    let x_train = scaler.transform(&train.records)?;
    let x_test = scaler.transform(&test.records)?;

    println!("\nTrain/test split ({:.0}% test, seed {}):", config.test_fraction * 100.0, config.random_seed);
    println!("X_train: {:?}  X_test: {:?}", x_train.dim(), x_test.dim());
    let (train_neg, train_pos) = class_counts(&train.targets);
    let (test_neg, test_pos) = class_counts(&test.targets);
    println!("Train classes: 0={} 1={}", train_neg, train_pos);
    println!("Test classes:  0={} 1={}", test_neg, test_pos);
    info!(
        train_rows = x_train.nrows(),
        test_rows = x_test.nrows(),
        "prepared stratified split"
    );

    Ok(PreparedData {
        x_train,
        x_test,
        y_train: train.targets,
        y_test: test.targets,
        scaler,
        feature_names: dataset.feature_names(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocation_sums_to_test_size() {
        let alloc = allocate_test_rows(&[995, 5], 300);
        assert_eq!(alloc.iter().sum::<usize>(), 300);
        assert!(alloc[1] >= 1 && alloc[1] <= 4);
    }

    #[test]
    fn test_rare_class_lands_on_both_sides() {
        // 2 positives out of 1000 at 10% test would round to zero
        let alloc = allocate_test_rows(&[998, 2], 100);
        assert_eq!(alloc[1], 1);
        assert_eq!(alloc.iter().sum::<usize>(), 100);
    }

    #[test]
    fn test_split_is_deterministic() {
        let labels = Array1::from_iter((0..200).map(|i| usize::from(i % 20 == 0)));
        let a = stratified_indices(&labels, 0.3, 7).unwrap();
        let b = stratified_indices(&labels, 0.3, 7).unwrap();
        assert_eq!(a, b);
        let c = stratified_indices(&labels, 0.3, 8).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_invalid_fraction_rejected() {
        let labels = Array1::from(vec![0, 1, 0]);
        assert!(stratified_indices(&labels, 1.0, 0).is_err());
    }

    #[test]
    fn test_scaler_rejects_nan() {
        let x = ndarray::array![[1.0, f64::NAN], [2.0, 3.0]];
        let err = StandardScaler::fit(&x).unwrap_err();
        assert!(err.is_computation());
    }
}
