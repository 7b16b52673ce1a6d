// The five model runs: two grid-searched supervised models, the unsupervised
// isolation forest, and both supervised models again on an oversampled train split.

use std::fmt;
use std::time::Instant;

use linfa::traits::Fit;
use linfa::Dataset;
use ndarray::{Array1, Array2};
use tracing::{debug, info};

use crate::boosting::{XgbClassifier, XgbParams};
use crate::config::{PipelineConfig, RandomForestGrid, XgboostGrid};
use crate::error::Result;
use crate::evaluate::{evaluate, ModelResult};
use crate::forest::{RandomForest, RandomForestParams};
use crate::isolation::IsolationForest;
use crate::model::ScoreModel;
use crate::plots;
use crate::preprocess::{class_counts, PreparedData};
use crate::search::{grid_search, GridSearchResult};
use crate::smote::Smote;

pub const RANDOM_FOREST: &str = "Random Forest";
pub const XGBOOST: &str = "XGBoost";
pub const ISOLATION_FOREST: &str = "Isolation Forest";
pub const RANDOM_FOREST_SMOTE: &str = "Random Forest (SMOTE)";
pub const XGBOOST_SMOTE: &str = "XGBoost (SMOTE)";

const BAR_WIDTH: usize = 40;

pub fn random_forest_candidates(grid: &RandomForestGrid, seed: u64) -> Vec<RandomForestParams> {
    let mut candidates = Vec::with_capacity(grid.size());
    for &n_estimators in &grid.n_estimators {
        for &max_depth in &grid.max_depth {
            for &min_samples_split in &grid.min_samples_split {
                for &min_samples_leaf in &grid.min_samples_leaf {
                    candidates.push(
                        RandomForest::params()
                            .n_estimators(n_estimators)
                            .max_depth(max_depth)
                            .min_samples_split(min_samples_split)
                            .min_samples_leaf(min_samples_leaf)
                            .seed(seed),
                    );
                }
            }
        }
    }
    candidates
}

pub fn xgboost_candidates(grid: &XgboostGrid, seed: u64) -> Vec<XgbParams> {
    let mut candidates = Vec::with_capacity(grid.size());
    for &n_estimators in &grid.n_estimators {
        for &max_depth in &grid.max_depth {
            for &learning_rate in &grid.learning_rate {
                for &subsample in &grid.subsample {
                    for &colsample_bytree in &grid.colsample_bytree {
                        candidates.push(
                            XgbClassifier::params()
                                .n_estimators(n_estimators)
                                .max_depth(max_depth)
                                .learning_rate(learning_rate)
                                .subsample(subsample)
                                .colsample_bytree(colsample_bytree)
                                .seed(seed),
                        );
                    }
                }
            }
        }
    }
    candidates
}

// Feature names paired with importances, highest first, at most `top` of them.
pub fn top_importances(model: &dyn ScoreModel, names: &[String], top: usize) -> Vec<(String, f64)> {
    let importances = match model.feature_importances() {
        Some(imp) => imp,
        None => return Vec::new(),
    };
    let mut ranked: Vec<(String, f64)> = importances
        .iter()
        .enumerate()
        .map(|(i, &v)| {
            let name = names.get(i).cloned().unwrap_or_else(|| format!("feature_{i}"));
            (name, v)
        })
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranked.truncate(top);
    ranked
}

fn print_importances(model_name: &str, ranked: &[(String, f64)], show_plots: bool) {
    let title = format!("Top {} feature importances ({})", ranked.len(), model_name);
    if show_plots {
        println!("{}", plots::bar_chart(&title, ranked, BAR_WIDTH));
    } else {
        println!("\n{}:", title);
        for (rank, (name, value)) in ranked.iter().enumerate() {
            println!("{:>3}. {:<20} {:.4}", rank + 1, name, value);
        }
    }
}

fn print_search<P: fmt::Display>(search: &GridSearchResult<P>) {
    println!("Candidates tried: {}", search.candidate_scores.len());
    for (params, score) in &search.candidate_scores {
        debug!(%params, cv_auc = *score, "grid candidate");
    }
    println!("Best parameters: {}", search.best_params);
    println!("Best CV ROC-AUC: {:.4}", search.best_score);
}

// Inputs: prepared splits and run configuration
// Outputs: evaluated "Random Forest" result
// Key steps:
// 1. Grid search over the forest grid with stratified k-fold ROC-AUC
// 2. Report the winning hyperparameters and top feature importances
// 3. Evaluate the refit model on the test split
pub fn train_random_forest(data: &PreparedData, config: &PipelineConfig) -> Result<ModelResult> {
    let start = Instant::now();
    info!(model = RANDOM_FOREST, "training started");
    println!("\n##### {} #####", RANDOM_FOREST);

    let candidates = random_forest_candidates(&config.random_forest_grid, config.random_seed);
    let (model, search) = grid_search(
        candidates,
        &data.x_train,
        &data.y_train,
        config.grid_search_fold_count,
    )?;
    print_search(&search);
    println!("Refit on the full train split: {} trees", model.n_trees());
    info!(params = %search.best_params, cv_auc = search.best_score, "best random forest configuration");

    let ranked = top_importances(&model, &data.feature_names, config.top_features);
    print_importances(RANDOM_FOREST, &ranked, config.show_plots);

    let result = evaluate(RANDOM_FOREST, &model, &data.x_test, &data.y_test, config.show_plots)?;
    info!(model = RANDOM_FOREST, seconds = start.elapsed().as_secs_f64(), "training finished");
    Ok(result)
}

// Same flow as the random forest, over the boosting grid
pub fn train_xgboost(data: &PreparedData, config: &PipelineConfig) -> Result<ModelResult> {
    let start = Instant::now();
    info!(model = XGBOOST, "training started");
    println!("\n##### {} #####", XGBOOST);

    let candidates = xgboost_candidates(&config.xgboost_grid, config.random_seed);
    let (model, search) = grid_search(
        candidates,
        &data.x_train,
        &data.y_train,
        config.grid_search_fold_count,
    )?;
    print_search(&search);
    println!("Objective: {}", model.hyperparameters().objective());
    if let Some(loss) = model.train_loss().last() {
        println!("Final training log-loss ({} rounds): {:.5}", model.n_trees(), loss);
    }
    info!(params = %search.best_params, cv_auc = search.best_score, "best xgboost configuration");

    let ranked = top_importances(&model, &data.feature_names, config.top_features);
    print_importances(XGBOOST, &ranked, config.show_plots);

    let result = evaluate(XGBOOST, &model, &data.x_test, &data.y_test, config.show_plots)?;
    info!(model = XGBOOST, seconds = start.elapsed().as_secs_f64(), "training finished");
    Ok(result)
}

// Labels only set the contamination; the detector itself sees features alone
pub fn train_isolation_forest(data: &PreparedData, config: &PipelineConfig) -> Result<ModelResult> {
    let start = Instant::now();
    info!(model = ISOLATION_FOREST, "training started");
    println!("\n##### {} #####", ISOLATION_FOREST);

    let contamination = data.train_fraud_ratio();
    println!("Contamination (train fraud rate): {:.6}", contamination);
    let model = IsolationForest::params()
        .contamination(contamination)
        .seed(config.random_seed)
        .fit_features(data.x_train.view())?;
    println!("Decision offset: {:.5}", model.offset());
    debug!(params = ?model.hyperparameters(), "isolation forest fitted");

    let result = evaluate(ISOLATION_FOREST, &model, &data.x_test, &data.y_test, config.show_plots)?;
    info!(model = ISOLATION_FOREST, seconds = start.elapsed().as_secs_f64(), "training finished");
    Ok(result)
}

// Oversamples the train split only; the test split is left as it is.
pub fn resample_train(data: &PreparedData, config: &PipelineConfig) -> Result<(Array2<f64>, Array1<usize>)> {
    let (neg, pos) = class_counts(&data.y_train);
    println!("\nBefore SMOTE: 0={} 1={}  X_train: {:?}", neg, pos, data.x_train.dim());

    let (x_res, y_res) = Smote::new(config.smote_neighbors)
        .seed(config.random_seed)
        .fit_resample(&data.x_train, &data.y_train)?;

    let (neg, pos) = class_counts(&y_res);
    println!("After SMOTE:  0={} 1={}  X_train: {:?}", neg, pos, x_res.dim());
    println!("X_test unchanged: {:?}", data.x_test.dim());
    info!(rows = x_res.nrows(), synthetic = x_res.nrows() - data.x_train.nrows(), "train split oversampled");
    Ok((x_res, y_res))
}

// Inputs: prepared splits and run configuration
// Outputs: "Random Forest (SMOTE)" and "XGBoost (SMOTE)" results, in that order
// Key steps:
// 1. Oversample the train split
// 2. Fit both models with fixed hyperparameters
// 3. Evaluate against the original, imbalanced test split
pub fn train_resampled(data: &PreparedData, config: &PipelineConfig) -> Result<Vec<ModelResult>> {
    let start = Instant::now();
    info!("resampled training started");
    println!("\n##### SMOTE resampling #####");

    let (x_res, y_res) = resample_train(data, config)?;
    let resampled = Dataset::new(x_res, y_res);

    let forest = RandomForest::params()
        .n_estimators(100)
        .seed(config.random_seed)
        .fit(&resampled)?;
    let forest_result = evaluate(RANDOM_FOREST_SMOTE, &forest, &data.x_test, &data.y_test, config.show_plots)?;

    let booster = XgbClassifier::params()
        .n_estimators(100)
        .max_depth(6)
        .learning_rate(0.1)
        .seed(config.random_seed)
        .fit(&resampled)?;
    let booster_result = evaluate(XGBOOST_SMOTE, &booster, &data.x_test, &data.y_test, config.show_plots)?;

    info!(seconds = start.elapsed().as_secs_f64(), "resampled training finished");
    Ok(vec![forest_result, booster_result])
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_candidates_cover_the_grid() {
        let rf = random_forest_candidates(&RandomForestGrid::default(), 42);
        assert_eq!(rf.len(), RandomForestGrid::default().size());
        assert_eq!(rf.len(), 16);
        let xgb = xgboost_candidates(&XgboostGrid::default(), 42);
        assert_eq!(xgb.len(), 32);
    }

    #[test]
    fn test_top_importances_ranks_and_truncates() {
        struct Fixed(Array1<f64>);
        impl ScoreModel for Fixed {
            fn feature_importances(&self) -> Option<&Array1<f64>> {
                Some(&self.0)
            }
        }
        let model = Fixed(array![0.1, 0.5, 0.4]);
        let names = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let ranked = top_importances(&model, &names, 2);
        assert_eq!(ranked, vec![("b".to_string(), 0.5), ("c".to_string(), 0.4)]);
    }
}
