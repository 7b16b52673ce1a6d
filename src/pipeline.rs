// Stage sequencing: load, explore, prepare, train and evaluate, report.

use std::time::Instant;

use tracing::info;

use crate::config::PipelineConfig;
use crate::csv_reader::{read_transactions, TransactionTable};
use crate::error::Result;
use crate::evaluate::ModelResult;
use crate::explore::explore;
use crate::preprocess::prepare;
use crate::report::print_final_report;
use crate::trainers::{train_isolation_forest, train_random_forest, train_resampled, train_xgboost};

// Runs the whole experiment on the configured CSV file.
pub fn run(config: &PipelineConfig) -> Result<Vec<ModelResult>> {
    config.validate()?;
    let table = read_transactions(&config.source_path, &config.label_column)?;
    run_on_table(&table, config)
}

// Inputs: loaded transaction table and run configuration
// Outputs: the five model results, in report order
// Key steps:
// 1. Exploratory diagnostics
// 2. Stratified split and scaling shared by every trainer
// 3. Random Forest, XGBoost, Isolation Forest, then both SMOTE models
// 4. Final comparison
pub fn run_on_table(table: &TransactionTable, config: &PipelineConfig) -> Result<Vec<ModelResult>> {
    config.validate()?;
    let start = Instant::now();

    let fraud_ratio = explore(table, config.show_plots);
    info!(rows = table.n_rows(), fraud_ratio, "dataset explored");

    let data = prepare(&table.dataset, config)?;
    info!(features = data.scaler.mean().len(), "features standardized");

    let mut results = Vec::with_capacity(5);
    results.push(train_random_forest(&data, config)?);
    results.push(train_xgboost(&data, config)?);
    results.push(train_isolation_forest(&data, config)?);
    results.extend(train_resampled(&data, config)?);

    print_final_report(&results);
    info!(models = results.len(), seconds = start.elapsed().as_secs_f64(), "pipeline finished");
    Ok(results)
}
