use anyhow::{anyhow, Result};
use candle_core::{Device, Tensor};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarMap};
use log::info;
use ndarray::Array2;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use polarity_classifiers::config::TrainingParams;
use polarity_classifiers::data_handling::Sentiment;
use polarity_classifiers::models::sentiment_model::{EpochReport, TrainingSummary};
use polarity_classifiers::PolarityError;

use crate::utils::logging::Progress;

/// Batch size used for inference regardless of the training batch size.
pub const INFERENCE_BATCH_SIZE: usize = 64;

/// Device tensors for one encoded batch.
pub struct EncodedBatch {
    pub input_ids: Tensor,
    /// `1` for real tokens, `0` for padding. Recurrent networks read `lengths`
    /// instead and leave it empty.
    pub attention_mask: Option<Tensor>,
    /// True length of each row.
    pub lengths: Vec<usize>,
}

/// Saved copy of every trainable variable.
pub struct Snapshot(Vec<(String, Tensor)>);

/// Shared machinery for the candle-backed networks: batching, the optimisation
/// loop, batched inference and weight snapshots.
pub trait NeuralInterface: Send + Sync {
    fn model_arch(&self) -> &'static str;

    fn get_device(&self) -> &Device;

    fn get_varmap(&self) -> &VarMap;

    /// Encode already-cleaned texts into device tensors.
    fn encode(&self, texts: &[String]) -> Result<EncodedBatch>;

    /// Raw logits for a batch.
    fn forward(&self, batch: &EncodedBatch) -> Result<Tensor>;

    /// Scalar training loss for a batch of logits.
    fn loss(&self, logits: &Tensor, labels: &[Sentiment]) -> Result<Tensor>;

    /// Convert logits to `(n, 2)` class probabilities.
    fn probabilities(&self, logits: &Tensor) -> Result<Array2<f32>>;

    fn optimizer_params(&self, learning_rate: f64) -> ParamsAdamW {
        ParamsAdamW {
            lr: learning_rate,
            ..Default::default()
        }
    }

    /// Set model to evaluation mode for inference.
    /// This disables dropout and other training-specific layers.
    fn set_evaluation_mode(&mut self);

    /// Set model to training mode.
    /// This enables dropout and other training-specific layers.
    fn set_training_mode(&mut self);

    /// Run minibatch AdamW over the training set for `params.epochs` epochs.
    ///
    /// Examples are reshuffled every epoch from a generator seeded with
    /// `params.seed`. `observer` sees every finished epoch. The model is left in
    /// evaluation mode, also on error.
    fn fine_tune(
        &mut self,
        texts: &[String],
        labels: &[Sentiment],
        params: &TrainingParams,
        observer: &mut dyn FnMut(&EpochReport),
    ) -> Result<TrainingSummary> {
        let batch_size = params.batch_size.max(1);
        let num_batches = texts.len().div_ceil(batch_size);

        info!(
            "Training {} model on {} examples ({} batches) for {} epochs",
            self.model_arch(),
            texts.len(),
            num_batches,
            params.epochs
        );

        let mut opt = AdamW::new(
            self.get_varmap().all_vars(),
            self.optimizer_params(params.learning_rate),
        )?;
        let mut rng = ChaCha8Rng::seed_from_u64(params.seed);
        let mut order: Vec<usize> = (0..texts.len()).collect();
        let mut epochs = Vec::with_capacity(params.epochs);

        self.set_training_mode();
        for epoch in 0..params.epochs {
            order.shuffle(&mut rng);
            let progress = Progress::new(
                num_batches,
                &format!("[training] Epoch {}/{}: ", epoch + 1, params.epochs),
            );

            let mut total_loss = 0.0f32;
            for chunk in order.chunks(batch_size) {
                let batch_texts: Vec<String> = chunk.iter().map(|&i| texts[i].clone()).collect();
                let batch_labels: Vec<Sentiment> = chunk.iter().map(|&i| labels[i]).collect();

                let step = self.encode(&batch_texts).and_then(|batch| {
                    let logits = self.forward(&batch)?;
                    let loss = self.loss(&logits, &batch_labels)?;
                    opt.backward_step(&loss)?;
                    Ok(loss.to_scalar::<f32>()?)
                });
                let loss_value = match step {
                    Ok(v) if v.is_finite() => v,
                    Ok(v) => {
                        progress.finish();
                        self.set_evaluation_mode();
                        return Err(PolarityError::TrainingFailed(format!(
                            "non-finite loss {} in epoch {}",
                            v,
                            epoch + 1
                        ))
                        .into());
                    }
                    Err(e) => {
                        progress.finish();
                        self.set_evaluation_mode();
                        return Err(e);
                    }
                };
                total_loss += loss_value;
                progress.inc();
            }

            let mean_loss = total_loss / num_batches.max(1) as f32;
            progress.update_description(&format!(
                "[training] Epoch {}/{}: Avg. Batch Loss: {:.4}",
                epoch + 1,
                params.epochs,
                mean_loss
            ));
            progress.finish();

            let report = EpochReport {
                epoch: epoch + 1,
                total_epochs: params.epochs,
                mean_loss: Some(mean_loss),
            };
            log::debug!("{} epoch {}: loss {:.4}", self.model_arch(), report.epoch, mean_loss);
            observer(&report);
            epochs.push(report);
        }
        self.set_evaluation_mode();

        Ok(TrainingSummary {
            epochs,
            n_examples: texts.len(),
        })
    }

    /// Class probabilities for cleaned texts, computed in fixed-size batches.
    fn predict_batched(&self, texts: &[String]) -> Result<Array2<f32>> {
        let mut out = Array2::<f32>::zeros((texts.len(), 2));
        for (b, chunk) in texts.chunks(INFERENCE_BATCH_SIZE).enumerate() {
            let batch = self.encode(chunk)?;
            let logits = self.forward(&batch)?;
            let proba = self.probabilities(&logits)?;
            if proba.nrows() != chunk.len() {
                return Err(anyhow!(
                    "{} returned {} rows for {} texts",
                    self.model_arch(),
                    proba.nrows(),
                    chunk.len()
                ));
            }
            let start = b * INFERENCE_BATCH_SIZE;
            out.slice_mut(ndarray::s![start..start + chunk.len(), ..])
                .assign(&proba);
        }
        Ok(out)
    }

    /// Copy every variable so a failed run can be undone.
    fn snapshot(&self) -> Result<Snapshot> {
        let data = self
            .get_varmap()
            .data()
            .lock()
            .map_err(|_| anyhow!("variable map lock poisoned"))?;
        let mut saved = Vec::with_capacity(data.len());
        for (name, var) in data.iter() {
            saved.push((name.clone(), var.as_tensor().copy()?));
        }
        Ok(Snapshot(saved))
    }

    fn restore(&self, snapshot: &Snapshot) -> Result<()> {
        let data = self
            .get_varmap()
            .data()
            .lock()
            .map_err(|_| anyhow!("variable map lock poisoned"))?;
        for (name, tensor) in &snapshot.0 {
            if let Some(var) = data.get(name) {
                var.set(tensor)?;
            }
        }
        Ok(())
    }
}

/// Continue training `network`, putting its previous weights back if the run fails.
pub fn train_with_rollback<N: NeuralInterface>(
    network: &mut N,
    texts: &[String],
    labels: &[Sentiment],
    params: &TrainingParams,
    observer: &mut dyn FnMut(&EpochReport),
) -> Result<TrainingSummary> {
    let snapshot = network.snapshot()?;
    match network.fine_tune(texts, labels, params, observer) {
        Ok(summary) => Ok(summary),
        Err(err) => {
            log::warn!(
                "Training {} failed, restoring previous weights: {:#}",
                network.model_arch(),
                err
            );
            network.restore(&snapshot)?;
            Err(err)
        }
    }
}
