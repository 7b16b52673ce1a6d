use std::io::Write;

use approx::assert_abs_diff_eq;
use linfa::traits::{Fit, Predict};
use linfa::Dataset;
use ndarray::{Array1, Array2, Axis};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tempfile::NamedTempFile;

use crate::boosting::XgbClassifier;
use crate::config::{PipelineConfig, RandomForestGrid, XgboostGrid};
use crate::csv_reader::{read_transactions, Transactions};
use crate::forest::RandomForest;
use crate::isolation::map_outlier_labels;
use crate::metrics::roc_auc;
use crate::model::ScoreModel;
use crate::pipeline::{run, run_on_table};
use crate::preprocess::{class_counts, prepare, stratified_split, StandardScaler};
use crate::search::stratified_folds;
use crate::trainers::{
    resample_train, ISOLATION_FOREST, RANDOM_FOREST, RANDOM_FOREST_SMOTE, XGBOOST, XGBOOST_SMOTE,
};

#[cfg(test)]
mod tests {
    use super::*;

    // 1000 rows, 10 features, label 1 on five rows whose features are shifted up
    fn synthetic_rows(seed: u64) -> (Array2<f64>, Array1<usize>) {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let n = 1000;
        let positives = [17, 203, 488, 611, 947];
        let y = Array1::from_iter((0..n).map(|i| usize::from(positives.contains(&i))));
        let x = Array2::from_shape_fn((n, 10), |(i, _)| {
            let noise: f64 = rng.gen_range(-1.0..1.0);
            if y[i] == 1 { noise + 4.0 } else { noise }
        });
        (x, y)
    }

    fn write_csv(x: &Array2<f64>, y: &Array1<usize>) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        let header: Vec<String> = (0..x.ncols()).map(|j| format!("V{}", j + 1)).collect();
        writeln!(file, "{},Class", header.join(",")).unwrap();
        for (row, label) in x.rows().into_iter().zip(y.iter()) {
            let cells: Vec<String> = row.iter().map(|v| v.to_string()).collect();
            writeln!(file, "{},{}", cells.join(","), label).unwrap();
        }
        file.flush().unwrap();
        file
    }

    fn csv_from(text: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", text).unwrap();
        file.flush().unwrap();
        file
    }

    fn small_grids(config: &mut PipelineConfig) {
        config.random_forest_grid = RandomForestGrid {
            n_estimators: vec![10],
            max_depth: vec![Some(4)],
            min_samples_split: vec![2],
            min_samples_leaf: vec![1],
        };
        config.xgboost_grid = XgboostGrid {
            n_estimators: vec![10],
            max_depth: vec![3],
            learning_rate: vec![0.3],
            subsample: vec![1.0],
            colsample_bytree: vec![1.0],
        };
        config.show_plots = false;
    }

    #[test]
    fn test_loader_reads_shape_names_and_nulls() {
        let file = csv_from("Time,Amount,Class\n0,10.5,0\n1,,1\n2,3.0,0\n");
        let table = read_transactions(file.path(), "Class").unwrap();
        assert_eq!(table.n_rows(), 3, "Should read every data row");
        assert_eq!(table.n_columns(), 3, "Column count includes the label");
        assert_eq!(table.dataset.feature_names(), vec!["Time".to_string(), "Amount".to_string()]);
        assert_eq!(table.total_nulls(), 1, "The empty Amount cell counts as a null");
        assert_eq!(table.dataset.targets, ndarray::array![0, 1, 0]);
    }

    #[test]
    fn test_loader_labels_are_one_dimensional() {
        let file = csv_from("V1,V2,Class\n0.5,1.5,0\n2.0,-1.0,1\n");
        let table = read_transactions(file.path(), "Class").unwrap();
        assert_eq!(table.dataset.targets.ndim(), 1, "One label per row");
        assert_eq!(table.dataset.targets.len(), table.dataset.records.nrows());

        // the table also goes through `Dataset` subsetting without reshaping labels
        let (train, test) = stratified_split(&table.dataset, 0.5, 1).unwrap();
        assert_eq!(train.targets.len() + test.targets.len(), 2);

        let shown = format!("{:?}", table);
        assert!(shown.contains("Class"), "Debug output should name the label column");
    }

    #[test]
    fn test_loader_missing_file() {
        let err = read_transactions("/definitely/not/here.csv", "Class").unwrap_err();
        assert!(err.is_data_access(), "Missing file should be a data access error");
    }

    #[test]
    fn test_loader_missing_label_column() {
        let file = csv_from("Time,Amount\n0,1.0\n");
        let err = read_transactions(file.path(), "Class").unwrap_err();
        assert!(err.is_data_access(), "Missing label column should be a data access error");
    }

    #[test]
    fn test_loader_rejects_non_numeric_and_ragged_rows() {
        let text = csv_from("Time,Amount,Class\n0,abc,0\n");
        assert!(read_transactions(text.path(), "Class").unwrap_err().is_data_access());

        let ragged = csv_from("Time,Amount,Class\n0,1.0\n");
        assert!(read_transactions(ragged.path(), "Class").unwrap_err().is_data_access());

        let label = csv_from("Time,Class\n0,2\n");
        assert!(read_transactions(label.path(), "Class").unwrap_err().is_data_access());
    }

    #[test]
    fn test_split_sizes_and_stratification() {
        let (x, y) = synthetic_rows(1);
        let dataset: Transactions = Dataset::new(x, y);
        let (train, test) = stratified_split(&dataset, 0.3, 42).unwrap();

        assert!((test.records.nrows() as i64 - 300).abs() <= 1, "Test split should hold 30% of rows");
        assert_eq!(train.records.nrows() + test.records.nrows(), 1000);

        let (_, train_pos) = class_counts(&train.targets);
        let (_, test_pos) = class_counts(&test.targets);
        assert_eq!(train_pos + test_pos, 5);
        assert!(train_pos >= 1 && test_pos >= 1, "Fraud rows should land on both sides");
        let train_ratio = train_pos as f64 / train.records.nrows() as f64;
        let test_ratio = test_pos as f64 / test.records.nrows() as f64;
        assert_abs_diff_eq!(train_ratio, test_ratio, epsilon = 0.005);
    }

    #[test]
    fn test_scaler_standardizes_train_only() {
        let (x, y) = synthetic_rows(2);
        let dataset: Transactions = Dataset::new(x.mapv(|v| v * 5.0 + 3.0), y);
        let config = PipelineConfig::default();
        let data = prepare(&dataset, &config).unwrap();

        for column in data.x_train.axis_iter(Axis(1)) {
            let mean = column.mean().unwrap();
            let var = column.mapv(|v| (v - mean).powi(2)).mean().unwrap();
            assert_abs_diff_eq!(mean, 0.0, epsilon = 1e-9);
            assert_abs_diff_eq!(var, 1.0, epsilon = 1e-9);
        }

        // parameters come from the train partition alone
        let (train, _) = stratified_split(&dataset, config.test_fraction, config.random_seed).unwrap();
        let refit = StandardScaler::fit(&train.records).unwrap();
        assert_eq!(&data.scaler, &refit);
        assert_eq!(data.x_test.nrows(), 300);
    }

    #[test]
    fn test_auc_is_a_probability() {
        let (x, y) = synthetic_rows(3);
        let model = XgbClassifier::params()
            .n_estimators(20)
            .max_depth(3)
            .fit(&Dataset::new(x.clone(), y.clone()))
            .unwrap();
        let probs = model.probabilities(x.view()).unwrap();
        assert!(probs.iter().all(|p| (0.0..=1.0).contains(p)));
        let auc = roc_auc(&y, &probs).unwrap();
        assert!((0.0..=1.0).contains(&auc));
    }

    #[test]
    fn test_auc_near_half_for_permuted_labels() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let trials = 5;
        let mut total = 0.0;
        for trial in 0..trials {
            let x_train = Array2::from_shape_fn((300, 5), |_| rng.gen_range(-1.0..1.0));
            let y_train = Array1::from_iter((0..300).map(|_| usize::from(rng.gen_bool(0.5))));
            let x_test = Array2::from_shape_fn((300, 5), |_| rng.gen_range(-1.0..1.0));
            let y_test = Array1::from_iter((0..300).map(|_| usize::from(rng.gen_bool(0.5))));

            let model = RandomForest::params()
                .n_estimators(20)
                .seed(trial)
                .fit(&Dataset::new(x_train, y_train))
                .unwrap();
            let scores = model.probabilities(x_test.view()).unwrap();
            total += roc_auc(&y_test, &scores).unwrap();
        }
        let mean = total / trials as f64;
        assert_abs_diff_eq!(mean, 0.5, epsilon = 0.1);
    }

    #[test]
    fn test_isolation_labels_map_to_fraud() {
        let codes = ndarray::array![1i8, -1, 1, -1];
        assert_eq!(map_outlier_labels(codes.view()), ndarray::array![0, 1, 0, 1]);
    }

    #[test]
    fn test_forest_hard_labels_follow_probabilities() {
        let (x, y) = synthetic_rows(4);
        let model = RandomForest::params()
            .n_estimators(15)
            .fit(&Dataset::new(x.clone(), y))
            .unwrap();
        let labels: Array1<usize> = model.predict(&x);
        let probs = model.probabilities(x.view()).unwrap();
        for (label, p) in labels.iter().zip(probs.iter()) {
            assert_eq!(*label, usize::from(*p > 0.5));
        }
    }

    #[test]
    fn test_smote_balances_train_and_leaves_test_alone() {
        let (x, y) = synthetic_rows(5);
        let dataset: Transactions = Dataset::new(x, y);
        let config = PipelineConfig::default();
        let data = prepare(&dataset, &config).unwrap();
        let test_before = data.x_test.clone();

        let (x_res, y_res) = resample_train(&data, &config).unwrap();
        let (neg, pos) = class_counts(&y_res);
        assert_eq!(neg, pos, "Classes should be balanced after oversampling");
        assert_eq!(neg, class_counts(&data.y_train).0);
        assert_eq!(x_res.nrows(), 2 * neg);
        assert_eq!(data.x_test, test_before, "Test split must stay untouched");
    }

    #[test]
    fn test_grid_search_folds_are_stratified() {
        let labels = Array1::from_iter((0..99).map(|i| usize::from(i % 11 == 0)));
        let folds = stratified_folds(&labels, 3).unwrap();
        for fold in &folds {
            let positives = fold.validation_indices.iter().filter(|&&i| labels[i] == 1).count();
            assert_eq!(positives, 3, "Each fold should carry a third of the fraud rows");
        }
    }

    #[test]
    fn test_config_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "test_fraction = 0.25\nshow_plots = false\nrandom_seed = 7").unwrap();
        file.flush().unwrap();

        let config = PipelineConfig::load_from_path(file.path()).unwrap();
        assert_eq!(config.test_fraction, 0.25);
        assert!(!config.show_plots);
        assert_eq!(config.random_seed, 7);
        assert_eq!(config.label_column, "Class", "Unset keys keep their defaults");
        assert!(config.validate().is_ok());

        let bad = PipelineConfig {
            grid_search_fold_count: 1,
            ..PipelineConfig::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_end_to_end_produces_five_results() {
        let (x, y) = synthetic_rows(6);
        let file = write_csv(&x, &y);
        let mut config = PipelineConfig {
            source_path: file.path().to_path_buf(),
            ..PipelineConfig::default()
        };
        small_grids(&mut config);

        let results = run(&config).unwrap();
        let names: Vec<&str> = results.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(
            names,
            vec![RANDOM_FOREST, XGBOOST, ISOLATION_FOREST, RANDOM_FOREST_SMOTE, XGBOOST_SMOTE]
        );
        for result in &results {
            assert_eq!(result.report.total_support(), 300, "{} supports should cover the test split", result.name);
            assert_eq!(result.predictions.len(), 300);
            if let Some(auc) = result.roc_auc {
                assert!((0.0..=1.0).contains(&auc));
            }
        }
    }

    #[test]
    fn test_nan_features_fail_with_computation_error() {
        let file = csv_from("A,B,Class\n1,2,0\n,3,1\n2,4,0\n3,5,1\n4,6,0\n5,7,1\n");
        let table = read_transactions(file.path(), "Class").unwrap();
        let mut config = PipelineConfig::default();
        small_grids(&mut config);
        config.test_fraction = 0.5;
        let err = run_on_table(&table, &config).unwrap_err();
        assert!(err.is_computation(), "NaN inputs should surface as a computation error");
    }
}
