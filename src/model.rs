// Shared model seams.
//
// Hard labels come from linfa's `PredictInplace`/`Predict`; everything softer goes
// through [`ScoreModel`].

use ndarray::{Array1, ArrayView1, ArrayView2};

use crate::error::{FraudError, Result};

// Soft outputs a fitted model may expose. Scores follow one convention:
// higher means more likely fraud.
pub trait ScoreModel: Sync {
    // Estimated probability of the fraud class, if the model has one.
    fn probabilities(&self, _x: ArrayView2<f64>) -> Option<Array1<f64>> {
        None
    }

    // Unbounded decision score, for models without probabilities.
    fn confidence_scores(&self, _x: ArrayView2<f64>) -> Option<Array1<f64>> {
        None
    }

    // Normalized per-feature importances, summing to one.
    fn feature_importances(&self) -> Option<&Array1<f64>> {
        None
    }

    // Probabilities when available, otherwise decision scores.
    fn soft_scores(&self, x: ArrayView2<f64>) -> Option<Array1<f64>> {
        self.probabilities(x).or_else(|| self.confidence_scores(x))
    }
}

pub fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

pub fn check_features(x: ArrayView2<f64>) -> Result<()> {
    if x.nrows() == 0 || x.ncols() == 0 {
        return Err(FraudError::computation(format!(
            "cannot fit on an empty {}x{} matrix",
            x.nrows(),
            x.ncols()
        )));
    }
    if x.iter().any(|v| !v.is_finite()) {
        return Err(FraudError::computation("input contains NaN or infinite values"));
    }
    Ok(())
}

// Supervised learners need finite features, 0/1 labels and both classes present
pub fn check_binary_targets(x: ArrayView2<f64>, y: ArrayView1<usize>) -> Result<()> {
    check_features(x)?;
    if x.nrows() != y.len() {
        return Err(FraudError::computation(format!(
            "{} rows but {} labels",
            x.nrows(),
            y.len()
        )));
    }
    if let Some(bad) = y.iter().find(|&&l| l > 1) {
        return Err(FraudError::computation(format!("label {bad} is not binary")));
    }
    let positives = y.iter().filter(|&&l| l == 1).count();
    if positives == 0 || positives == y.len() {
        return Err(FraudError::computation(
            "training labels contain a single class",
        ));
    }
    Ok(())
}

pub fn normalize(mut importances: Array1<f64>) -> Array1<f64> {
    let total = importances.sum();
    if total > 0.0 {
        importances /= total;
    }
    importances
}
