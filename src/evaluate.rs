// Test-split evaluation shared by every model.

use std::time::{Duration, Instant};

use linfa::traits::PredictInplace;
use ndarray::{Array1, Array2};
use tracing::info;

use crate::error::{FraudError, Result};
use crate::metrics::{
    average_precision, precision_recall_curve, roc_auc, roc_curve, ClassificationReport,
    ConfusionMatrix,
};
use crate::model::ScoreModel;
use crate::plots;

const CURVE_WIDTH: usize = 50;
const CURVE_HEIGHT: usize = 16;

// Everything measured for one model on the held-out split.
#[derive(Debug, Clone)]
pub struct ModelResult {
    pub name: String,
    pub predictions: Array1<usize>,
    // Probabilities or decision scores, higher meaning more likely fraud.
    pub scores: Option<Array1<f64>>,
    pub report: ClassificationReport,
    pub confusion: ConfusionMatrix,
    pub roc_auc: Option<f64>,
    pub average_precision: Option<f64>,
    // Wall-clock time of the hard-label prediction over the whole test split.
    pub inference_time: Duration,
}

impl ModelResult {
    pub fn latency_per_row(&self) -> Duration {
        let rows = self.predictions.len().max(1) as u32;
        self.inference_time / rows
    }
}

// Inputs: display name, fitted model, test features and labels, whether to draw curves
// Outputs: ModelResult, with the report and matrix already printed
// Key steps:
// 1. Time the hard-label prediction
// 2. Build the classification report and confusion matrix
// 3. Rank by soft scores for ROC-AUC and average precision
pub fn evaluate<M>(
    name: &str,
    model: &M,
    x_test: &Array2<f64>,
    y_test: &Array1<usize>,
    show_plots: bool,
) -> Result<ModelResult>
where
    M: PredictInplace<Array2<f64>, Array1<usize>> + ScoreModel,
{
    if x_test.nrows() != y_test.len() {
        return Err(FraudError::computation(format!(
            "{} test rows but {} labels",
            x_test.nrows(),
            y_test.len()
        )));
    }

    let start = Instant::now();
    let mut predictions = model.default_target(x_test);
    model.predict_inplace(x_test, &mut predictions);
    let inference_time = start.elapsed();

    let confusion = ConfusionMatrix::from_labels(y_test, &predictions);
    let report = ClassificationReport::from_labels(y_test, &predictions)?;

    println!("\n=== {} ===", name);
    println!("Inference time: {:.4}s", inference_time.as_secs_f64());
    println!("\nClassification Report:\n{}", report);
    println!("{}", confusion);

    // models without probabilities or decision scores skip the ranking metrics
    let scores = model.soft_scores(x_test.view());
    let (auc, ap) = match &scores {
        Some(s) => {
            let auc = roc_auc(y_test, s);
            let ap = average_precision(y_test, s);
            match (auc, ap) {
                (Some(auc), Some(ap)) => {
                    println!("ROC-AUC: {:.4}", auc);
                    println!("Average precision: {:.4}", ap);
                }
                _ => println!("ROC-AUC: undefined (test split holds a single class)"),
            }
            (auc, ap)
        }
        None => (None, None),
    };

    if show_plots {
        if let Some(s) = &scores {
            if let Some(roc) = roc_curve(y_test, s) {
                let title = format!("{} ROC curve (AUC = {:.4})", name, auc.unwrap_or(f64::NAN));
                println!(
                    "{}",
                    plots::curve(&title, &roc.x, &roc.y, ("FPR", "TPR"), true, CURVE_WIDTH, CURVE_HEIGHT)
                );
            }
            if let Some(pr) = precision_recall_curve(y_test, s) {
                let title = format!("{} precision-recall curve (AP = {:.4})", name, ap.unwrap_or(f64::NAN));
                println!(
                    "{}",
                    plots::curve(&title, &pr.x, &pr.y, ("Recall", "Precision"), false, CURVE_WIDTH, CURVE_HEIGHT)
                );
            }
        }
    }

    info!(
        model = name,
        fraud_recall = report.fraud().recall,
        roc_auc = auc.unwrap_or(f64::NAN),
        seconds = inference_time.as_secs_f64(),
        "evaluated"
    );

    Ok(ModelResult {
        name: name.to_string(),
        predictions,
        scores,
        report,
        confusion,
        roc_auc: auc,
        average_precision: ap,
        inference_time,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forest::RandomForest;
    use linfa::traits::Fit;
    use linfa::Dataset;
    use ndarray::{array, ArrayBase, Data, Ix2};

    // Hard labels only: flags rows whose first feature is positive
    struct ThresholdRule;

    impl<D: Data<Elem = f64>> PredictInplace<ArrayBase<D, Ix2>, Array1<usize>> for ThresholdRule {
        fn predict_inplace(&self, x: &ArrayBase<D, Ix2>, y: &mut Array1<usize>) {
            for (row, target) in x.rows().into_iter().zip(y.iter_mut()) {
                *target = usize::from(row[0] > 0.0);
            }
        }

        fn default_target(&self, x: &ArrayBase<D, Ix2>) -> Array1<usize> {
            Array1::zeros(x.nrows())
        }
    }

    impl ScoreModel for ThresholdRule {}

    #[test]
    fn test_label_only_model_omits_ranking_metrics() {
        let x = array![[1.0, 0.0], [-1.0, 0.0], [-2.0, 1.0], [0.5, 1.0]];
        let y = array![1, 0, 0, 1];
        let result = evaluate("rule", &ThresholdRule, &x, &y, true).unwrap();
        assert!(result.scores.is_none());
        assert!(result.roc_auc.is_none());
        assert!(result.average_precision.is_none());
        assert_eq!(result.predictions, y);
        assert_eq!(result.report.fraud().recall, 1.0);
    }

    #[test]
    fn test_evaluate_separable_data() {
        let n = 80;
        let x = Array2::from_shape_fn((n, 2), |(i, j)| {
            let label = (i % 4 == 0) as usize as f64;
            label * 3.0 + ((i * (j + 3)) % 7) as f64 * 0.1
        });
        let y = Array1::from_iter((0..n).map(|i| usize::from(i % 4 == 0)));
        let model = RandomForest::params()
            .n_estimators(10)
            .fit(&Dataset::new(x.clone(), y.clone()))
            .unwrap();

        let result = evaluate("forest", &model, &x, &y, false).unwrap();
        assert_eq!(result.predictions.len(), n);
        assert_eq!(result.report.total_support(), n);
        assert_eq!(result.confusion.total(), n);
        assert!(result.roc_auc.unwrap() > 0.99);
        assert!(result.scores.is_some());
    }
}
