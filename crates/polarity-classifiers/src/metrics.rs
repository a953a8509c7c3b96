//! Evaluation metrics shared by every model family.
//!
//! Precision, recall and F1 are averaged with weights equal to each class's support
//! in the true labels, so models trained on corpora with different class balance
//! stay comparable. Division by zero for a class resolves to 0.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::Display;

use crate::error::{ensure_same_len, PolarityError, Result};

/// Result of one evaluation. Never mutated after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    /// Rows are true classes and columns predicted classes, both ordered as `labels`.
    pub confusion_matrix: Vec<Vec<usize>>,
    /// Class names in ascending order.
    pub labels: Vec<String>,
}

/// Per-class counts and scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassScore {
    pub label: String,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

fn safe_div(num: f64, den: f64) -> f64 {
    if den == 0.0 {
        0.0
    } else {
        num / den
    }
}

/// Compute metrics for a set of predictions.
///
/// # Arguments
///
/// * `y_true` - Ground truth labels
/// * `y_pred` - Predicted labels, aligned with `y_true`
///
/// # Returns
///
/// Accuracy, support-weighted precision/recall/F1 and a square confusion matrix
/// over every label seen in either slice.
pub fn compute<L>(y_true: &[L], y_pred: &[L]) -> Result<Metrics>
where
    L: Ord + Clone + Display,
{
    let (metrics, _) = compute_with_report(y_true, y_pred)?;
    Ok(metrics)
}

/// Same as [`compute`], additionally returning the per-class breakdown.
pub fn compute_with_report<L>(y_true: &[L], y_pred: &[L]) -> Result<(Metrics, Vec<ClassScore>)>
where
    L: Ord + Clone + Display,
{
    ensure_same_len(y_true.len(), y_pred.len())?;
    if y_true.is_empty() {
        return Err(PolarityError::Validation(
            "cannot compute metrics on an empty label set".to_string(),
        ));
    }

    let classes: Vec<L> = y_true
        .iter()
        .chain(y_pred.iter())
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let index_of = |l: &L| classes.binary_search(l).unwrap_or_default();

    let k = classes.len();
    let mut cm = vec![vec![0usize; k]; k];
    for (t, p) in y_true.iter().zip(y_pred.iter()) {
        cm[index_of(t)][index_of(p)] += 1;
    }

    let n = y_true.len() as f64;
    let correct: usize = (0..k).map(|i| cm[i][i]).sum();

    let mut per_class = Vec::with_capacity(k);
    let (mut precision, mut recall, mut f1) = (0.0, 0.0, 0.0);
    for (c, label) in classes.iter().enumerate() {
        let tp = cm[c][c] as f64;
        let support: usize = cm[c].iter().sum();
        let predicted: usize = (0..k).map(|r| cm[r][c]).sum();

        let p = safe_div(tp, predicted as f64);
        let r = safe_div(tp, support as f64);
        let f = safe_div(2.0 * p * r, p + r);

        let weight = support as f64 / n;
        precision += weight * p;
        recall += weight * r;
        f1 += weight * f;

        per_class.push(ClassScore {
            label: label.to_string(),
            precision: p,
            recall: r,
            f1: f,
            support,
        });
    }

    let metrics = Metrics {
        accuracy: correct as f64 / n,
        precision,
        recall,
        f1,
        confusion_matrix: cm,
        labels: classes.iter().map(|l| l.to_string()).collect(),
    };
    Ok((metrics, per_class))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_handling::Sentiment;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_binary_reference_case() {
        let m = compute(&[0, 0, 1, 1], &[0, 1, 1, 1]).unwrap();
        assert!(approx(m.accuracy, 0.75));
        assert_eq!(m.confusion_matrix, vec![vec![1, 1], vec![0, 2]]);
        // class 0: p=1, r=0.5 ; class 1: p=2/3, r=1 ; equal support
        assert!(approx(m.precision, (1.0 + 2.0 / 3.0) / 2.0));
        assert!(approx(m.recall, 0.75));
        assert!(approx(m.f1, (2.0 / 3.0 + 0.8) / 2.0));
    }

    #[test]
    fn test_class_only_in_predictions_gets_zero_row() {
        let m = compute(&["neg", "neg"], &["neg", "pos"]).unwrap();
        assert_eq!(m.labels, vec!["neg", "pos"]);
        assert_eq!(m.confusion_matrix, vec![vec![1, 1], vec![0, 0]]);
        // "pos" has no support, so only "neg" contributes.
        assert!(approx(m.recall, 0.5));
        assert!(approx(m.precision, 1.0));
    }

    #[test]
    fn test_zero_division_is_zero() {
        let m = compute(&[1, 1], &[0, 0]).unwrap();
        assert!(approx(m.accuracy, 0.0));
        assert!(approx(m.precision, 0.0));
        assert!(approx(m.f1, 0.0));
    }

    #[test]
    fn test_sentiment_labels_order() {
        let y_true = [Sentiment::Positive, Sentiment::Negative];
        let y_pred = [Sentiment::Positive, Sentiment::Positive];
        let (m, report) = compute_with_report(&y_true, &y_pred).unwrap();
        assert_eq!(m.labels, vec!["Negative", "Positive"]);
        assert_eq!(report[1].support, 1);
    }

    #[test]
    fn test_mismatched_lengths() {
        assert!(matches!(
            compute(&[0, 1], &[0]),
            Err(PolarityError::Validation(_))
        ));
        assert!(compute::<i32>(&[], &[]).is_err());
    }
}
