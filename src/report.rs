// Final human-readable comparison of every model run.

use crate::evaluate::ModelResult;

fn optional(value: Option<f64>) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| format!("{:.4}", v))
}

// One row per model: fraud-class precision, recall and F1, then ROC-AUC, average precision and latency.
pub fn comparison_table(results: &[ModelResult]) -> String {
    let name_width = results
        .iter()
        .map(|r| r.name.len())
        .max()
        .unwrap_or(5)
        .max(5);
    let mut out = format!(
        "{:<w$}  {:>9}  {:>7}  {:>7}  {:>7}  {:>7}  {:>12}  {:>8}\n",
        "Model",
        "Precision",
        "Recall",
        "F1",
        "ROC-AUC",
        "AP",
        "Latency (ms)",
        "µs/row",
        w = name_width
    );
    out.push_str(&"-".repeat(name_width + 72));
    out.push('\n');
    for r in results {
        let fraud = r.report.fraud();
        out.push_str(&format!(
            "{:<w$}  {:>9.4}  {:>7.4}  {:>7.4}  {:>7}  {:>7}  {:>12.3}  {:>8.2}\n",
            r.name,
            fraud.precision,
            fraud.recall,
            fraud.f1,
            optional(r.roc_auc),
            optional(r.average_precision),
            r.inference_time.as_secs_f64() * 1000.0,
            r.latency_per_row().as_secs_f64() * 1e6,
            w = name_width
        ));
    }
    out
}

// Prints each model's classification report in run order, then the comparison table
pub fn print_final_report(results: &[ModelResult]) {
    println!("\n==================== Final Model Comparison ====================");
    for r in results {
        println!("\n{} Classification Report:", r.name);
        println!("{}", r.report);
        println!("{}", r.confusion);
        if let Some(scores) = &r.scores {
            let lo = scores.iter().copied().fold(f64::INFINITY, f64::min);
            let hi = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            println!("Score range over {} test rows: [{:.4}, {:.4}]", r.predictions.len(), lo, hi);
        }
    }
    println!("\n{}", comparison_table(results));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{ClassificationReport, ConfusionMatrix};
    use ndarray::array;
    use std::time::Duration;

    #[test]
    fn test_table_has_a_row_per_model() {
        let y_true = array![0, 1, 0, 1];
        let predictions = array![0, 1, 1, 1];
        let confusion = ConfusionMatrix::from_labels(&y_true, &predictions);
        let result = |name: &str, auc: Option<f64>| ModelResult {
            name: name.to_string(),
            predictions: predictions.clone(),
            scores: None,
            report: ClassificationReport::from_confusion(&confusion),
            confusion,
            roc_auc: auc,
            average_precision: None,
            inference_time: Duration::from_millis(2),
        };
        let table = comparison_table(&[result("Random Forest", Some(0.9)), result("Isolation Forest", None)]);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[2].starts_with("Random Forest"));
        assert!(lines[2].contains("0.9000"));
        assert!(lines[3].contains("n/a"));
    }
}
