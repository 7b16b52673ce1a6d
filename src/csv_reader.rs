use std::fs::File;
use std::path::Path;

use linfa::Dataset;
use ndarray::{Array1, Array2, Ix1};
use tracing::{info, warn};

use crate::error::{FraudError, Result};

// Feature matrix plus 0/1 fraud label, with column names attached
pub type Transactions = Dataset<f64, usize, Ix1>;

// Loaded table along with the per-column count of empty cells seen while parsing.
// Empty feature cells become NaN; an empty label cell is an error.
#[derive(Debug)]
pub struct TransactionTable {
    pub dataset: Transactions,
    pub label_column: String,
    pub null_counts: Vec<(String, usize)>,
}

impl TransactionTable {
    pub fn n_rows(&self) -> usize {
        self.dataset.records.nrows()
    }

    pub fn n_columns(&self) -> usize {
        self.dataset.records.ncols() + 1
    }

    pub fn total_nulls(&self) -> usize {
        self.null_counts.iter().map(|(_, n)| n).sum()
    }
}

enum Cell {
    Value(f64),
    Null,
    Invalid,
}

fn parse_cell(cell: &str) -> Cell {
    if cell.is_empty() || cell.eq_ignore_ascii_case("nan") || cell.eq_ignore_ascii_case("na") {
        return Cell::Null;
    }
    match cell.parse::<f64>() {
        Ok(v) if v.is_finite() => Cell::Value(v),
        _ => Cell::Invalid,
    }
}

// Reads a CSV with a header row. Every column other than `label_column` must be numeric;
// the label must be 0 or 1 on every row.
pub fn read_transactions<P: AsRef<Path>>(file_path: P, label_column: &str) -> Result<TransactionTable> {
    let path = file_path.as_ref();
    let file = File::open(path)
        .map_err(|e| FraudError::data(format!("cannot open {}: {e}", path.display())))?;
    let mut rdr = csv::Reader::from_reader(file);

    let headers = rdr.headers()?.clone();
    let label_idx = headers
        .iter()
        .position(|h| h.trim() == label_column)
        .ok_or_else(|| FraudError::data(format!("missing label column `{label_column}`")))?;

    let feature_names: Vec<String> = headers
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != label_idx)
        .map(|(_, h)| h.trim().to_string())
        .collect();
    if feature_names.is_empty() {
        return Err(FraudError::data("table has no feature columns"));
    }

    let n_features = feature_names.len();
    let mut values = Vec::new();
    let mut labels = Vec::new();
    let mut nulls = vec![0usize; n_features];

    for (row, record) in rdr.records().enumerate() {
        let record = record?;
        let mut feature = 0;
        for (col, raw) in record.iter().enumerate() {
            if col == label_idx {
                let label = match raw.trim().parse::<f64>() {
                    Ok(v) if v == 0.0 => 0,
                    Ok(v) if v == 1.0 => 1,
                    _ => {
                        return Err(FraudError::data(format!(
                            "row {}: label `{}` is not binary",
                            row + 1,
                            raw
                        )))
                    }
                };
                labels.push(label);
                continue;
            }

            let cell = raw.trim();
            match parse_cell(cell) {
                Cell::Value(v) => values.push(v),
                Cell::Null => {
                    nulls[feature] += 1;
                    values.push(f64::NAN);
                }
                Cell::Invalid => {
                    return Err(FraudError::data(format!(
                        "row {}: column `{}` has non-numeric value `{}`",
                        row + 1,
                        feature_names[feature],
                        cell
                    )))
                }
            }
            feature += 1;
        }
    }

    if labels.is_empty() {
        return Err(FraudError::data(format!("{} contains no rows", path.display())));
    }

    let n_rows = labels.len();
    let records = Array2::from_shape_vec((n_rows, n_features), values)
        .map_err(|e| FraudError::data(format!("malformed table: {e}")))?;
    let targets = Array1::from(labels);

    let null_counts: Vec<(String, usize)> = feature_names
        .iter()
        .cloned()
        .zip(nulls)
        .chain(std::iter::once((label_column.to_string(), 0)))
        .collect();

    let dataset = Dataset::new(records, targets).with_feature_names(feature_names);
    let table = TransactionTable {
        dataset,
        label_column: label_column.to_string(),
        null_counts,
    };

    info!(rows = n_rows, columns = table.n_columns(), "loaded {}", path.display());
    if table.total_nulls() > 0 {
        warn!(nulls = table.total_nulls(), "dataset contains empty feature cells");
    }
    Ok(table)
}
