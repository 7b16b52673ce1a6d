// Classification metrics for the binary fraud task.
// Accuracy, MCC and ROC come from linfa's metrics; per-class rows and the
// precision-recall curve are counted here.

use std::fmt;

use linfa::dataset::Pr;
use linfa::metrics::{BinaryClassification, ToConfusionMatrix};
use ndarray::Array1;

use crate::error::Result;
use crate::model::sigmoid;

// Counts for the fraud class (label 1). linfa's matrix keeps its class order
// private, so the per-class rows are read from these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfusionMatrix {
    pub tn: usize,
    pub fp: usize,
    pub fn_: usize,
    pub tp: usize,
}

impl ConfusionMatrix {
    pub fn from_labels(y_true: &Array1<usize>, y_pred: &Array1<usize>) -> Self {
        let mut cm = ConfusionMatrix {
            tn: 0,
            fp: 0,
            fn_: 0,
            tp: 0,
        };
        for (&t, &p) in y_true.iter().zip(y_pred.iter()) {
            match (t == 1, p == 1) {
                (true, true) => cm.tp += 1,
                (false, false) => cm.tn += 1,
                (false, true) => cm.fp += 1,
                (true, false) => cm.fn_ += 1,
            }
        }
        cm
    }

    pub fn total(&self) -> usize {
        self.tp + self.tn + self.fp + self.fn_
    }

    fn both_classes_present(&self) -> bool {
        self.tp + self.fn_ > 0 && self.tn + self.fp > 0
    }
}

impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self.total().to_string().len().max(5);
        writeln!(f, "Confusion Matrix:")?;
        writeln!(f, "              Predicted 0  Predicted 1")?;
        writeln!(f, "  Actual 0    {:>w$}        {:>w$}   (TN/FP)", self.tn, self.fp, w = width)?;
        writeln!(f, "  Actual 1    {:>w$}        {:>w$}   (FN/TP)", self.fn_, self.tp, w = width)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

// 0 when the denominator is empty
fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

fn f1(precision: f64, recall: f64) -> f64 {
    if precision + recall == 0.0 {
        0.0
    } else {
        2.0 * precision * recall / (precision + recall)
    }
}

fn weighted_average(classes: &[ClassMetrics; 2], weights: [f64; 2], support: usize) -> ClassMetrics {
    let total_weight: f64 = weights.iter().sum();
    let avg = |value: fn(&ClassMetrics) -> f64| -> f64 {
        if total_weight == 0.0 {
            0.0
        } else {
            classes
                .iter()
                .zip(weights.iter())
                .map(|(c, w)| w * value(c))
                .sum::<f64>()
                / total_weight
        }
    };
    ClassMetrics {
        precision: avg(|c| c.precision),
        recall: avg(|c| c.recall),
        f1: avg(|c| c.f1),
        support,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationReport {
    // Index 0 is the normal class, index 1 fraud.
    pub classes: [ClassMetrics; 2],
    pub accuracy: f64,
    // Matthews correlation; `None` while the truth holds a single class.
    pub mcc: Option<f64>,
    pub macro_avg: ClassMetrics,
    pub weighted_avg: ClassMetrics,
}

impl ClassificationReport {
    pub fn from_confusion(cm: &ConfusionMatrix) -> Self {
        let normal = {
            let precision = ratio(cm.tn, cm.tn + cm.fn_);
            let recall = ratio(cm.tn, cm.tn + cm.fp);
            ClassMetrics {
                precision,
                recall,
                f1: f1(precision, recall),
                support: cm.tn + cm.fp,
            }
        };
        let fraud = {
            let precision = ratio(cm.tp, cm.tp + cm.fp);
            let recall = ratio(cm.tp, cm.tp + cm.fn_);
            ClassMetrics {
                precision,
                recall,
                f1: f1(precision, recall),
                support: cm.tp + cm.fn_,
            }
        };

        let total = cm.total();
        let classes = [normal, fraud];
        let macro_avg = weighted_average(&classes, [1.0, 1.0], total);
        let weighted_avg = weighted_average(
            &classes,
            [normal.support as f64, fraud.support as f64],
            total,
        );

        ClassificationReport {
            classes,
            accuracy: ratio(cm.tp + cm.tn, total),
            mcc: None,
            macro_avg,
            weighted_avg,
        }
    }

    // Per-class rows from the counts; accuracy and MCC from linfa's confusion matrix.
    // linfa indexes classes by the labels present in the truth, so it is only
    // consulted when both classes are there.
    pub fn from_labels(y_true: &Array1<usize>, y_pred: &Array1<usize>) -> Result<Self> {
        let counts = ConfusionMatrix::from_labels(y_true, y_pred);
        let mut report = Self::from_confusion(&counts);
        if counts.both_classes_present() {
            let cm = y_true.confusion_matrix(y_pred)?;
            report.accuracy = f64::from(cm.accuracy());
            // a constant prediction leaves MCC at 0/0
            let mcc = f64::from(cm.mcc());
            report.mcc = Some(if mcc.is_finite() { mcc } else { 0.0 });
        }
        Ok(report)
    }

    pub fn fraud(&self) -> &ClassMetrics {
        &self.classes[1]
    }

    pub fn total_support(&self) -> usize {
        self.classes.iter().map(|c| c.support).sum()
    }
}

impl fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:>14}{:>11}{:>10}{:>10}{:>10}", "", "precision", "recall", "f1-score", "support")?;
        writeln!(f)?;
        for (label, c) in self.classes.iter().enumerate() {
            writeln!(
                f,
                "{:>14}{:>11.4}{:>10.4}{:>10.4}{:>10}",
                label, c.precision, c.recall, c.f1, c.support
            )?;
        }
        writeln!(f)?;
        writeln!(
            f,
            "{:>14}{:>11}{:>10}{:>10.4}{:>10}",
            "accuracy",
            "",
            "",
            self.accuracy,
            self.total_support()
        )?;
        for (name, c) in [("macro avg", &self.macro_avg), ("weighted avg", &self.weighted_avg)] {
            writeln!(
                f,
                "{:>14}{:>11.4}{:>10.4}{:>10.4}{:>10}",
                name, c.precision, c.recall, c.f1, c.support
            )?;
        }
        if let Some(mcc) = self.mcc {
            writeln!(f, "{:>14}{:>11}{:>10}{:>10.4}", "mcc", "", "", mcc)?;
        }
        Ok(())
    }
}

// Points of a threshold sweep, in order of decreasing threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct Curve {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
}

fn positives_and_negatives(y_true: &Array1<usize>) -> (usize, usize) {
    let p = y_true.iter().filter(|&&t| t == 1).count();
    (p, y_true.len() - p)
}

// linfa's sweep takes probabilities and opens its first segment at score 0.
// Scores are moved into [0.5, 1] first, keeping their order.
fn as_probabilities(scores: &Array1<f64>) -> Array1<Pr> {
    let bounded = scores.iter().all(|s| (0.0..=1.0).contains(s));
    scores.mapv(|s| {
        let p = if bounded { s } else { sigmoid(s) };
        Pr::new_unchecked((0.5 + 0.5 * p) as f32)
    })
}

fn truth_flags(y_true: &Array1<usize>) -> Vec<bool> {
    y_true.iter().map(|&t| t == 1).collect()
}

// ROC curve: `x` is the false positive rate, `y` the true positive rate.
// `None` unless both classes are present.
pub fn roc_curve(y_true: &Array1<usize>, scores: &Array1<f64>) -> Option<Curve> {
    let (p, n) = positives_and_negatives(y_true);
    if p == 0 || n == 0 {
        return None;
    }
    let roc = as_probabilities(scores).roc(&truth_flags(y_true)).ok()?;

    // linfa accumulates (tp, fp) shares upward from the lowest score
    let mut curve = Curve {
        x: Vec::new(),
        y: Vec::new(),
    };
    for (tp_below, fp_below) in roc.get_curve().into_iter().rev() {
        curve.x.push(1.0 - f64::from(fp_below));
        curve.y.push(1.0 - f64::from(tp_below));
    }
    Some(curve)
}

// Area under the ROC curve, from linfa's trapezoidal integration.
pub fn roc_auc(y_true: &Array1<usize>, scores: &Array1<f64>) -> Option<f64> {
    let (p, n) = positives_and_negatives(y_true);
    if p == 0 || n == 0 {
        return None;
    }
    let roc = as_probabilities(scores).roc(&truth_flags(y_true)).ok()?;
    Some(f64::from(roc.area_under_curve()).clamp(0.0, 1.0))
}

// Cumulative (tp, fp) at every distinct score, highest score first
fn threshold_sweep(y_true: &Array1<usize>, scores: &Array1<f64>) -> Vec<(usize, usize)> {
    let mut pairs: Vec<(f64, bool)> = scores
        .iter()
        .zip(y_true.iter())
        .map(|(&s, &t)| (s, t == 1))
        .collect();
    pairs.sort_by(|a, b| b.0.total_cmp(&a.0));

    let mut out = Vec::new();
    let (mut tp, mut fp) = (0, 0);
    for (i, &(score, positive)) in pairs.iter().enumerate() {
        if positive {
            tp += 1;
        } else {
            fp += 1;
        }
        let last_of_tie = pairs.get(i + 1).map_or(true, |next| next.0 != score);
        if last_of_tie {
            out.push((tp, fp));
        }
    }
    out
}

// Precision-recall curve: `x` is recall, `y` precision. Starts at (0, 1).
pub fn precision_recall_curve(y_true: &Array1<usize>, scores: &Array1<f64>) -> Option<Curve> {
    let (p, n) = positives_and_negatives(y_true);
    if p == 0 || n == 0 {
        return None;
    }
    let mut curve = Curve {
        x: vec![0.0],
        y: vec![1.0],
    };
    for (tp, fp) in threshold_sweep(y_true, scores) {
        curve.x.push(tp as f64 / p as f64);
        curve.y.push(ratio(tp, tp + fp));
    }
    Some(curve)
}

// Step-wise area under the precision-recall curve: sum of (R_n - R_{n-1}) * P_n.
pub fn average_precision(y_true: &Array1<usize>, scores: &Array1<f64>) -> Option<f64> {
    let curve = precision_recall_curve(y_true, scores)?;
    let ap = curve
        .x
        .windows(2)
        .zip(curve.y.iter().skip(1))
        .map(|(r, &precision)| (r[1] - r[0]) * precision)
        .sum();
    Some(ap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_confusion_matrix() {
        let y_true = array![1, 0, 1, 1, 0, 0];
        let y_pred = array![1, 0, 0, 1, 1, 0];
        let cm = ConfusionMatrix::from_labels(&y_true, &y_pred);
        assert_eq!(cm, ConfusionMatrix { tn: 2, fp: 1, fn_: 1, tp: 2 });
    }

    #[test]
    fn test_report_values() {
        let y_true = array![1, 0, 1, 1, 0, 0];
        let y_pred = array![1, 0, 0, 1, 1, 0];
        let report = ClassificationReport::from_labels(&y_true, &y_pred).unwrap();
        assert_abs_diff_eq!(report.fraud().precision, 2.0 / 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(report.fraud().recall, 2.0 / 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(report.fraud().f1, 2.0 / 3.0, epsilon = 1e-12);
        assert_eq!(report.total_support(), 6);
        assert_abs_diff_eq!(report.accuracy, 4.0 / 6.0, epsilon = 1e-6);
        // (2*2 - 1*1) / sqrt(3*3*3*3)
        assert_abs_diff_eq!(report.mcc.unwrap(), 1.0 / 3.0, epsilon = 1e-6);
    }

    #[test]
    fn test_single_class_truth_skips_mcc() {
        let y_true = array![0, 0, 0, 0];
        let y_pred = array![0, 1, 0, 0];
        let report = ClassificationReport::from_labels(&y_true, &y_pred).unwrap();
        assert_eq!(report.mcc, None);
        assert_abs_diff_eq!(report.accuracy, 0.75, epsilon = 1e-12);
        assert_eq!(report.total_support(), 4);
    }

    #[test]
    fn test_no_predicted_positives_gives_zero_precision() {
        let y_true = array![1, 0, 0];
        let y_pred = array![0, 0, 0];
        let report = ClassificationReport::from_labels(&y_true, &y_pred).unwrap();
        assert_eq!(report.fraud().precision, 0.0);
        assert_eq!(report.fraud().f1, 0.0);
        assert_eq!(report.mcc, Some(0.0));
        assert_abs_diff_eq!(report.accuracy, 2.0 / 3.0, epsilon = 1e-6);
    }

    #[test]
    fn test_auc_perfect_and_inverted() {
        let y_true = array![0, 0, 1, 1];
        let scores = array![0.1, 0.2, 0.8, 0.9];
        assert_abs_diff_eq!(roc_auc(&y_true, &scores).unwrap(), 1.0, epsilon = 1e-6);
        let inverted = scores.mapv(|s| 1.0 - s);
        assert_abs_diff_eq!(roc_auc(&y_true, &inverted).unwrap(), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_auc_with_zero_scores_and_ties() {
        let y_true = array![0, 1, 0, 1];
        let scores = array![0.0, 0.0, 0.0, 0.0];
        assert_abs_diff_eq!(roc_auc(&y_true, &scores).unwrap(), 0.5, epsilon = 1e-6);

        // one positive tied with a negative at 0, the other on top
        let y_true = array![0, 0, 1, 1];
        let scores = array![0.0, 0.6, 0.0, 0.9];
        assert_abs_diff_eq!(roc_auc(&y_true, &scores).unwrap(), 0.625, epsilon = 1e-6);
    }

    #[test]
    fn test_auc_on_unbounded_decision_scores() {
        let y_true = array![0, 0, 1, 0, 1];
        let scores = array![-0.3, -0.1, 0.25, 0.05, -0.2];
        // positives outrank 3 of 3 and 1 of 3 negatives
        assert_abs_diff_eq!(roc_auc(&y_true, &scores).unwrap(), 4.0 / 6.0, epsilon = 1e-6);
        let stretched = scores.mapv(|s| s * 10.0 - 4.0);
        assert_abs_diff_eq!(roc_auc(&y_true, &stretched).unwrap(), 4.0 / 6.0, epsilon = 1e-6);
    }

    #[test]
    fn test_roc_curve_runs_from_origin_to_corner() {
        let y_true = array![0, 1, 0, 1, 1];
        let scores = array![0.2, 0.7, 0.4, 0.9, 0.3];
        let roc = roc_curve(&y_true, &scores).unwrap();
        assert_abs_diff_eq!(roc.x[0], 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(roc.y[0], 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(*roc.x.last().unwrap(), 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(*roc.y.last().unwrap(), 1.0, epsilon = 1e-6);
        assert!(roc.x.windows(2).all(|w| w[1] >= w[0] - 1e-6));
    }

    #[test]
    fn test_average_precision_known_value() {
        // ranking: 0.8(+) 0.4(-) 0.35(+) 0.1(-) -> AP = 0.5*1 + 0.5*(2/3)
        let y_true = array![0, 0, 1, 1];
        let scores = array![0.1, 0.4, 0.35, 0.8];
        let ap = average_precision(&y_true, &scores).unwrap();
        assert_abs_diff_eq!(ap, 0.5 + 1.0 / 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_single_class_has_no_curve() {
        let y_true = array![0, 0, 0];
        let scores = array![0.1, 0.2, 0.3];
        assert!(roc_curve(&y_true, &scores).is_none());
        assert!(roc_auc(&y_true, &scores).is_none());
        assert!(average_precision(&y_true, &scores).is_none());
    }
}
