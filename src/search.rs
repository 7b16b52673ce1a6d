// Exhaustive hyperparameter search scored by cross-validated ROC-AUC.

use linfa::traits::Fit;
use linfa::Dataset;
use ndarray::{Array1, Array2, Axis};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::error::{FraudError, Result};
use crate::metrics::roc_auc;
use crate::model::ScoreModel;

// One cross-validation split, as row indices into the training partition.
#[derive(Debug, Clone, PartialEq)]
pub struct Fold {
    pub train_indices: Vec<usize>,
    pub validation_indices: Vec<usize>,
}

// Stratified k-fold without shuffling: each class's rows, in order, are cut into k
// contiguous chunks and chunk i of every class forms validation fold i.
pub fn stratified_folds(labels: &Array1<usize>, k: usize) -> Result<Vec<Fold>> {
    if k < 2 {
        return Err(FraudError::computation(format!("need at least 2 folds, got {k}")));
    }
    if labels.len() < k {
        return Err(FraudError::computation(format!(
            "cannot cut {} rows into {k} folds",
            labels.len()
        )));
    }

    let mut fold_of = vec![0usize; labels.len()];
    for class in [0usize, 1] {
        let rows: Vec<usize> = (0..labels.len()).filter(|&i| labels[i] == class).collect();
        if !rows.is_empty() && rows.len() < k {
            warn!(class, rows = rows.len(), folds = k, "class has fewer rows than folds");
        }
        let base = rows.len() / k;
        let extra = rows.len() % k;
        let mut start = 0;
        for fold in 0..k {
            let size = base + usize::from(fold < extra);
            for &row in &rows[start..start + size] {
                fold_of[row] = fold;
            }
            start += size;
        }
    }

    Ok((0..k)
        .map(|fold| {
            let (validation_indices, train_indices): (Vec<usize>, Vec<usize>) =
                (0..labels.len()).partition(|&i| fold_of[i] == fold);
            Fold {
                train_indices,
                validation_indices,
            }
        })
        .collect())
}

#[derive(Debug, Clone)]
pub struct GridSearchResult<P> {
    pub best_params: P,
    // Mean validation ROC-AUC of the winning candidate.
    pub best_score: f64,
    // Every candidate with its mean validation ROC-AUC, in grid order.
    pub candidate_scores: Vec<(P, f64)>,
}

// Fits on one fold's train rows and scores its validation rows; None when the
// validation rows hold a single class.
fn score_fold<P, M>(params: &P, x: &Array2<f64>, y: &Array1<usize>, fold: &Fold) -> Result<Option<f64>>
where
    P: Fit<Array2<f64>, Array1<usize>, FraudError, Object = M>,
    M: ScoreModel,
{
    let train = Dataset::new(
        x.select(Axis(0), &fold.train_indices),
        y.select(Axis(0), &fold.train_indices),
    );
    let model = params.fit(&train)?;

    let x_val = x.select(Axis(0), &fold.validation_indices);
    let y_val = y.select(Axis(0), &fold.validation_indices);
    let scores = model
        .soft_scores(x_val.view())
        .ok_or_else(|| FraudError::computation("model exposes no scores to rank by"))?;
    Ok(roc_auc(&y_val, &scores))
}

// Evaluates every candidate on every fold in parallel, keeps the candidate with the
// highest mean ROC-AUC (earliest on ties) and refits it on all of `x`/`y`.
pub fn grid_search<P, M>(
    candidates: Vec<P>,
    x: &Array2<f64>,
    y: &Array1<usize>,
    folds: usize,
) -> Result<(M, GridSearchResult<P>)>
where
    P: Fit<Array2<f64>, Array1<usize>, FraudError, Object = M> + Clone + Send + Sync,
    M: ScoreModel,
{
    if candidates.is_empty() {
        return Err(FraudError::computation("hyperparameter grid is empty"));
    }
    let splits = stratified_folds(y, folds)?;
    info!(
        candidates = candidates.len(),
        folds,
        fits = candidates.len() * folds,
        "starting grid search"
    );

    let pairs: Vec<(usize, usize)> = (0..candidates.len())
        .flat_map(|c| (0..splits.len()).map(move |f| (c, f)))
        .collect();
    let fold_scores: Vec<Option<f64>> = pairs
        .par_iter()
        .map(|&(c, f)| score_fold(&candidates[c], x, y, &splits[f]))
        .collect::<Result<_>>()?;

    let mut candidate_scores = Vec::with_capacity(candidates.len());
    for (c, params) in candidates.iter().enumerate() {
        let scores: Vec<f64> = fold_scores[c * splits.len()..(c + 1) * splits.len()]
            .iter()
            .flatten()
            .copied()
            .collect();
        if scores.len() < splits.len() {
            warn!(
                candidate = c,
                skipped = splits.len() - scores.len(),
                "validation folds without both classes were skipped"
            );
        }
        if scores.is_empty() {
            return Err(FraudError::computation(
                "ROC-AUC is undefined on every validation fold",
            ));
        }
        let mean = scores.iter().sum::<f64>() / scores.len() as f64;
        debug!(candidate = c, mean_auc = mean, "candidate scored");
        candidate_scores.push((params.clone(), mean));
    }

    let mut best = 0;
    for (i, (_, score)) in candidate_scores.iter().enumerate() {
        if *score > candidate_scores[best].1 {
            best = i;
        }
    }
    let (best_params, best_score) = candidate_scores[best].clone();

    let model = best_params.fit(&Dataset::new(x.clone(), y.clone()))?;
    Ok((
        model,
        GridSearchResult {
            best_params,
            best_score,
            candidate_scores,
        },
    ))
}
