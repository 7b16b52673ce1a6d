// Diagnostic pass over the raw table: shape, nulls, summary statistics, class balance
// and the exploratory charts. Nothing computed here feeds the models except the fraud ratio.
use ndarray::{Array2, ArrayView1, Axis};

use crate::csv_reader::TransactionTable;
use crate::plots;
use crate::preprocess::{class_counts, fraud_ratio};

const HISTOGRAM_BINS: usize = 20;
const CHART_WIDTH: usize = 50;
const HISTOGRAM_COLUMNS: [&str; 2] = ["Amount", "Time"];

#[derive(Debug, Clone)]
pub struct FeatureSummary {
    pub name: String,
    pub count: usize,
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

fn summarize(name: &str, column: ArrayView1<f64>) -> FeatureSummary {
    let values: Vec<f64> = column.iter().copied().filter(|v| v.is_finite()).collect();
    let count = values.len();
    if count == 0 {
        return FeatureSummary {
            name: name.to_string(),
            count,
            mean: f64::NAN,
            std: f64::NAN,
            min: f64::NAN,
            max: f64::NAN,
        };
    }
    let mean = values.iter().sum::<f64>() / count as f64;
    // sample standard deviation, as a describe table reports it
    let std = if count > 1 {
        (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (count - 1) as f64).sqrt()
    } else {
        0.0
    };
    FeatureSummary {
        name: name.to_string(),
        count,
        mean,
        std,
        min: values.iter().copied().fold(f64::INFINITY, f64::min),
        max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
    }
}

// Summary statistics for every feature column followed by the label column
pub fn describe(table: &TransactionTable) -> Vec<FeatureSummary> {
    let names = table.dataset.feature_names();
    let mut out: Vec<FeatureSummary> = table
        .dataset
        .records
        .axis_iter(Axis(1))
        .zip(names.iter())
        .map(|(col, name)| summarize(name, col))
        .collect();
    let labels = table.dataset.targets.mapv(|l| l as f64);
    out.push(summarize(&table.label_column, labels.view()));
    out
}

fn pearson(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    let pairs: Vec<(f64, f64)> = a
        .iter()
        .zip(b.iter())
        .filter(|(x, y)| x.is_finite() && y.is_finite())
        .map(|(&x, &y)| (x, y))
        .collect();
    let n = pairs.len() as f64;
    if n < 2.0 {
        return 0.0;
    }
    let mean_a = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_b = pairs.iter().map(|p| p.1).sum::<f64>() / n;
    let (mut cov, mut var_a, mut var_b) = (0.0, 0.0, 0.0);
    for (x, y) in &pairs {
        cov += (x - mean_a) * (y - mean_b);
        var_a += (x - mean_a).powi(2);
        var_b += (y - mean_b).powi(2);
    }
    if var_a == 0.0 || var_b == 0.0 {
        0.0
    } else {
        cov / (var_a.sqrt() * var_b.sqrt())
    }
}

// Pearson correlation between all columns, label last
pub fn correlation_matrix(table: &TransactionTable) -> (Vec<String>, Array2<f64>) {
    let records = &table.dataset.records;
    let labels = table.dataset.targets.mapv(|l| l as f64);
    let mut names = table.dataset.feature_names();
    names.push(table.label_column.clone());

    let columns: Vec<ArrayView1<f64>> = records
        .axis_iter(Axis(1))
        .chain(std::iter::once(labels.view()))
        .collect();

    let n = names.len();
    let mut corr = Array2::<f64>::eye(n);
    for i in 0..n {
        for j in (i + 1)..n {
            let r = pearson(columns[i].view(), columns[j].view());
            corr[[i, j]] = r;
            corr[[j, i]] = r;
        }
    }
    (names, corr)
}

// Prints the exploratory report and returns the observed fraud ratio
pub fn explore(table: &TransactionTable, show_plots: bool) -> f64 {
    println!("Dataset shape: ({}, {})", table.n_rows(), table.n_columns());

    println!("\nNull values per column:");
    for (name, nulls) in &table.null_counts {
        println!("  {name:<12} {nulls}");
    }
    println!("Total nulls: {}", table.total_nulls());

    println!("\n{:<12} {:>10} {:>14} {:>14} {:>14} {:>14}", "column", "count", "mean", "std", "min", "max");
    for s in describe(table) {
        println!(
            "{:<12} {:>10} {:>14.4} {:>14.4} {:>14.4} {:>14.4}",
            s.name, s.count, s.mean, s.std, s.min, s.max
        );
    }

    let labels = &table.dataset.targets;
    let (negatives, positives) = class_counts(labels);
    let ratio = fraud_ratio(labels);
    println!("\nClass distribution:");
    println!("  0 (normal): {negatives}");
    println!("  1 (fraud):  {positives}");
    println!("Fraud ratio: {:.6} ({:.4}%)", ratio, ratio * 100.0);

    if show_plots {
        print!(
            "{}",
            plots::bar_chart(
                "Class count",
                &[("0".to_string(), negatives as f64), ("1".to_string(), positives as f64)],
                CHART_WIDTH,
            )
        );

        let names = table.dataset.feature_names();
        for wanted in HISTOGRAM_COLUMNS {
            if let Some(j) = names.iter().position(|n| n == wanted) {
                let values: Vec<f64> = table.dataset.records.column(j).to_vec();
                print!(
                    "{}",
                    plots::histogram(&format!("{wanted} distribution"), &values, HISTOGRAM_BINS, CHART_WIDTH)
                );
            }
        }

        let (corr_names, corr) = correlation_matrix(table);
        print!("{}", plots::heatmap("Correlation heatmap", &corr_names, &corr));

        let label_col = corr.ncols() - 1;
        let with_label: Vec<(String, f64)> = corr_names[..label_col]
            .iter()
            .enumerate()
            .map(|(j, name)| (name.clone(), corr[[j, label_col]]))
            .collect();
        print!(
            "{}",
            plots::bar_chart(
                &format!("Correlation with {}", table.label_column),
                &with_label,
                CHART_WIDTH,
            )
        );
    }

    ratio
}
