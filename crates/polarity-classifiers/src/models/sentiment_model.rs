use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::config::{ModelConfig, TrainingParams};
use crate::data_handling::Sentiment;
use crate::error::{ensure_same_len, PolarityError, Result};
use crate::metrics::{self, Metrics};

/// Progress of a training run, emitted after every epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochReport {
    /// 1-based epoch number.
    pub epoch: usize,
    pub total_epochs: usize,
    /// Mean minibatch loss, when the family optimizes an explicit loss.
    pub mean_loss: Option<f32>,
}

/// Outcome of one `train` call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingSummary {
    pub epochs: Vec<EpochReport>,
    pub n_examples: usize,
}

impl TrainingSummary {
    pub fn losses(&self) -> Vec<f32> {
        self.epochs.iter().filter_map(|e| e.mean_loss).collect()
    }
}

/// The uniform contract every model family implements, so that orchestration code
/// can train, evaluate, predict, persist and explain any of them generically.
///
/// Implementations own their learned parameters and their tokenizer/vectorizer
/// state. Inference methods take `&self` and never mutate parameters, so a trained
/// model can serve concurrent readers.
pub trait SentimentModel: Send + Sync {
    /// Human readable family name.
    fn name(&self) -> &str;

    fn config(&self) -> &ModelConfig;

    /// Fixed location this model saves to and loads from.
    fn model_dir(&self) -> PathBuf {
        self.config().model_dir()
    }

    /// True once parameters exist, either from `train` or `load`.
    fn is_trained(&self) -> bool;

    /// Train in place, invoking `observer` after every epoch.
    ///
    /// On failure the model is left in its pre-training (or last successfully
    /// trained) state.
    fn train_with_observer(
        &mut self,
        texts: &[String],
        labels: &[Sentiment],
        params: &TrainingParams,
        observer: &mut dyn FnMut(&EpochReport),
    ) -> Result<TrainingSummary>;

    fn train(
        &mut self,
        texts: &[String],
        labels: &[Sentiment],
        params: &TrainingParams,
    ) -> Result<TrainingSummary> {
        self.train_with_observer(texts, labels, params, &mut |_: &EpochReport| {})
    }

    /// Per-class probabilities, one row per text, columns ordered by class index.
    fn predict_proba(&self, texts: &[String]) -> Result<Array2<f32>>;

    fn predict(&self, texts: &[String]) -> Result<Vec<Sentiment>> {
        let proba = self.predict_proba(texts)?;
        Ok(labels_from_proba(&proba))
    }

    /// Evaluate on labeled data without touching parameters.
    fn evaluate(&self, texts: &[String], labels: &[Sentiment]) -> Result<Metrics> {
        ensure_same_len(texts.len(), labels.len())?;
        ensure_trained(self.is_trained(), self.name())?;
        let predicted = self.predict(texts)?;
        metrics::compute(labels, &predicted)
    }

    /// Persist parameters and encoder state to [`SentimentModel::model_dir`].
    fn save(&self) -> Result<()>;

    /// Restore state saved by [`SentimentModel::save`]. Fails with `NotFound` if
    /// nothing was saved there.
    fn load(&mut self) -> Result<()>;
}

pub fn ensure_trained(is_trained: bool, name: &str) -> Result<()> {
    if !is_trained {
        return Err(PolarityError::NotTrained(name.to_string()));
    }
    Ok(())
}

/// Validate the inputs shared by every `train` implementation.
pub fn validate_training_input(texts: &[String], labels: &[Sentiment]) -> Result<()> {
    ensure_same_len(texts.len(), labels.len())?;
    if texts.is_empty() {
        return Err(PolarityError::Validation(
            "training requires at least one example".to_string(),
        ));
    }
    Ok(())
}

fn argmax(row: ArrayView1<f32>) -> usize {
    let mut best = 0;
    for (i, v) in row.iter().enumerate() {
        if *v > row[best] {
            best = i;
        }
    }
    best
}

/// Arg-max over each row. Ties go to the lower class index.
pub fn labels_from_proba(proba: &Array2<f32>) -> Vec<Sentiment> {
    proba
        .rows()
        .into_iter()
        .map(|row| Sentiment::from_index(argmax(row)).unwrap_or(Sentiment::Negative))
        .collect()
}

/// Expand positive-class probabilities into `[1 - p, p]` rows.
pub fn binary_proba(positive: &[f32]) -> Array2<f32> {
    let mut out = Array2::<f32>::zeros((positive.len(), 2));
    for (i, &p) in positive.iter().enumerate() {
        let p = p.clamp(0.0, 1.0);
        out[(i, 0)] = 1.0 - p;
        out[(i, 1)] = p;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_proba_rows_sum_to_one() {
        let proba = binary_proba(&[0.2, 0.9, 1.3]);
        assert_eq!(proba.shape(), &[3, 2]);
        for row in proba.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-6);
        }
        assert_eq!(proba[(2, 1)], 1.0);
    }

    #[test]
    fn test_labels_from_proba_ties_go_negative() {
        let proba = binary_proba(&[0.5, 0.51, 0.1]);
        assert_eq!(
            labels_from_proba(&proba),
            vec![Sentiment::Negative, Sentiment::Positive, Sentiment::Negative]
        );
    }

    #[test]
    fn test_validate_training_input() {
        let texts = vec!["a".to_string()];
        assert!(validate_training_input(&texts, &[Sentiment::Positive]).is_ok());
        assert!(validate_training_input(&texts, &[]).is_err());
        assert!(validate_training_input(&[], &[]).is_err());
    }
}
