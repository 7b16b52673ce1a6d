// Run configuration: defaults, optional config file, then command-line overrides.

use std::path::{Path, PathBuf};

use ::config::{Config, File};
use serde::{Deserialize, Serialize};

use crate::error::{FraudError, Result};

pub const DEFAULT_SOURCE_PATH: &str = "creditcard.csv";
pub const DEFAULT_LABEL_COLUMN: &str = "Class";
const DEFAULT_TEST_FRACTION: f64 = 0.3;
const DEFAULT_RANDOM_SEED: u64 = 42;
const DEFAULT_FOLDS: usize = 3;
const DEFAULT_TOP_FEATURES: usize = 15;
const DEFAULT_SMOTE_NEIGHBORS: usize = 5;

// Hyperparameter grid searched for the random forest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RandomForestGrid {
    pub n_estimators: Vec<usize>,
    // `None` grows trees until leaves are pure.
    pub max_depth: Vec<Option<usize>>,
    pub min_samples_split: Vec<usize>,
    pub min_samples_leaf: Vec<usize>,
}

impl Default for RandomForestGrid {
    fn default() -> Self {
        Self {
            n_estimators: vec![50, 100],
            max_depth: vec![Some(10), Some(20)],
            min_samples_split: vec![2, 5],
            min_samples_leaf: vec![1, 2],
        }
    }
}

impl RandomForestGrid {
    pub fn size(&self) -> usize {
        self.n_estimators.len()
            * self.max_depth.len()
            * self.min_samples_split.len()
            * self.min_samples_leaf.len()
    }
}

// Hyperparameter grid searched for the gradient-boosted trees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct XgboostGrid {
    pub n_estimators: Vec<usize>,
    pub max_depth: Vec<usize>,
    pub learning_rate: Vec<f64>,
    pub subsample: Vec<f64>,
    pub colsample_bytree: Vec<f64>,
}

impl Default for XgboostGrid {
    fn default() -> Self {
        Self {
            n_estimators: vec![100, 200],
            max_depth: vec![3, 6],
            learning_rate: vec![0.05, 0.1],
            subsample: vec![0.8, 1.0],
            colsample_bytree: vec![0.8, 1.0],
        }
    }
}

impl XgboostGrid {
    pub fn size(&self) -> usize {
        self.n_estimators.len()
            * self.max_depth.len()
            * self.learning_rate.len()
            * self.subsample.len()
            * self.colsample_bytree.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub source_path: PathBuf,
    pub label_column: String,
    pub test_fraction: f64,
    pub random_seed: u64,
    pub grid_search_fold_count: usize,
    pub top_features: usize,
    pub smote_neighbors: usize,
    pub show_plots: bool,
    pub random_forest_grid: RandomForestGrid,
    pub xgboost_grid: XgboostGrid,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            source_path: PathBuf::from(DEFAULT_SOURCE_PATH),
            label_column: DEFAULT_LABEL_COLUMN.to_string(),
            test_fraction: DEFAULT_TEST_FRACTION,
            random_seed: DEFAULT_RANDOM_SEED,
            grid_search_fold_count: DEFAULT_FOLDS,
            top_features: DEFAULT_TOP_FEATURES,
            smote_neighbors: DEFAULT_SMOTE_NEIGHBORS,
            show_plots: true,
            random_forest_grid: RandomForestGrid::default(),
            xgboost_grid: XgboostGrid::default(),
        }
    }
}

impl PipelineConfig {
    // Load a TOML/JSON/YAML config file; keys left out keep their defaults.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let settings = Config::builder()
            .add_source(File::from(path.as_ref()))
            .build()
            .map_err(|e| FraudError::InvalidConfig(format!("reading config file: {e}")))?;

        settings
            .try_deserialize()
            .map_err(|e| FraudError::InvalidConfig(format!("parsing config file: {e}")))
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.test_fraction > 0.0 && self.test_fraction < 1.0) {
            return Err(FraudError::InvalidConfig(format!(
                "test_fraction must be in (0, 1), got {}",
                self.test_fraction
            )));
        }
        if self.grid_search_fold_count < 2 {
            return Err(FraudError::InvalidConfig(format!(
                "grid_search_fold_count must be at least 2, got {}",
                self.grid_search_fold_count
            )));
        }
        if self.label_column.is_empty() {
            return Err(FraudError::InvalidConfig("label_column is empty".into()));
        }
        if self.smote_neighbors == 0 {
            return Err(FraudError::InvalidConfig("smote_neighbors must be positive".into()));
        }
        if self.random_forest_grid.size() == 0 {
            return Err(FraudError::InvalidConfig("random forest grid is empty".into()));
        }
        if self.xgboost_grid.size() == 0 {
            return Err(FraudError::InvalidConfig("xgboost grid is empty".into()));
        }
        Ok(())
    }
}
