use anyhow::{anyhow, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::{rnn, Dropout, Embedding, Linear, Module, ParamsAdamW, VarBuilder, VarMap, RNN};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use polarity_classifiers::config::{ModelConfig, ModelType, TrainingParams};
use polarity_classifiers::data_handling::Sentiment;
use polarity_classifiers::models::sentiment_model::{
    binary_proba, ensure_trained, validate_training_input, EpochReport, SentimentModel,
    TrainingSummary,
};
use polarity_classifiers::models::utils::{ensure_saved, read_json, write_json};
use polarity_classifiers::preprocessing::clean_all;
use polarity_classifiers::{PolarityError, Result as PolarityResult};

use crate::encoding::vocab::{Vocabulary, PAD_ID};
use crate::models::model_interface::{train_with_rollback, EncodedBatch, NeuralInterface};
use crate::utils::utils::to_polarity_error;

const WEIGHTS_FILE: &str = "model.safetensors";
const VOCAB_FILE: &str = "vocab.json";
const PARAMS_FILE: &str = "params.json";

/// Architecture hyper-parameters, persisted next to the weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LstmParams {
    pub vocab_size: usize,
    pub embedding_dim: usize,
    pub hidden_dim: usize,
    pub n_layers: usize,
    pub dropout: f32,
    pub max_length: usize,
}

impl LstmParams {
    pub fn from_model_type(model_type: &ModelType) -> Result<Self> {
        match model_type {
            ModelType::Lstm {
                vocab_size,
                embedding_dim,
                hidden_dim,
                n_layers,
                dropout,
                max_length,
            } => Ok(LstmParams {
                vocab_size: *vocab_size,
                embedding_dim: *embedding_dim,
                hidden_dim: *hidden_dim,
                n_layers: (*n_layers).max(1),
                dropout: *dropout,
                max_length: (*max_length).max(1),
            }),
            other => Err(anyhow!(
                "expected lstm parameters, got {}",
                other.family()
            )),
        }
    }
}

/// Numerically stable binary cross-entropy on raw logits:
/// `max(x, 0) - x * y + ln(1 + exp(-|x|))`, averaged.
fn bce_with_logits(logits: &Tensor, targets: &Tensor) -> candle_core::Result<Tensor> {
    let softplus = (logits.abs()?.neg()?.exp()? + 1.0)?.log()?;
    let loss = ((logits.relu()? - (logits * targets)?)? + softplus)?;
    loss.mean_all()
}

/// Embedding, stacked LSTM layers and a single-logit head read from the hidden
/// state at each sequence's last real token.
pub struct LstmNetwork {
    varmap: VarMap,
    embedding: Embedding,
    layers: Vec<rnn::LSTM>,
    dropout: Dropout,
    classifier: Linear,
    vocab: Vocabulary,
    params: LstmParams,
    device: Device,
    is_training: bool,
}

impl LstmNetwork {
    pub fn new(vocab: Vocabulary, params: LstmParams, device: Device) -> Result<Self> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let embedding =
            candle_nn::embedding(vocab.len(), params.embedding_dim, vb.pp("embedding"))?;
        let mut layers = Vec::with_capacity(params.n_layers);
        for layer_idx in 0..params.n_layers {
            let input_dim = if layer_idx == 0 {
                params.embedding_dim
            } else {
                params.hidden_dim
            };
            layers.push(rnn::lstm(
                input_dim,
                params.hidden_dim,
                rnn::LSTMConfig {
                    layer_idx,
                    ..Default::default()
                },
                vb.pp("lstm"),
            )?);
        }
        let classifier = candle_nn::linear(params.hidden_dim, 1, vb.pp("classifier"))?;

        Ok(Self {
            varmap,
            embedding,
            layers,
            dropout: Dropout::new(params.dropout),
            classifier,
            vocab,
            params,
            device,
            is_training: false,
        })
    }

    pub fn vocab(&self) -> &Vocabulary {
        &self.vocab
    }

    pub fn save(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        log::info!("Saving {} model weights to: {:?}", self.model_arch(), dir);
        self.varmap.save(dir.join(WEIGHTS_FILE))?;
        self.vocab.save(dir.join(VOCAB_FILE))?;
        write_json(dir.join(PARAMS_FILE), &self.params)?;
        Ok(())
    }

    pub fn load(dir: &Path, device: Device) -> Result<Self> {
        ensure_saved(dir, &[WEIGHTS_FILE, VOCAB_FILE, PARAMS_FILE])?;
        let params: LstmParams = read_json(dir.join(PARAMS_FILE))?;
        let vocab = Vocabulary::load(dir.join(VOCAB_FILE))?;
        let mut network = Self::new(vocab, params, device)?;
        network.varmap.load(dir.join(WEIGHTS_FILE))?;
        Ok(network)
    }
}

impl NeuralInterface for LstmNetwork {
    fn model_arch(&self) -> &'static str {
        "lstm"
    }

    fn get_device(&self) -> &Device {
        &self.device
    }

    fn get_varmap(&self) -> &VarMap {
        &self.varmap
    }

    fn encode(&self, texts: &[String]) -> Result<EncodedBatch> {
        let padded = self.vocab.encode_batch(texts, self.params.max_length);
        let n = texts.len();
        let input_ids = Tensor::from_vec(padded.ids, (n, padded.width), &self.device)?;
        Ok(EncodedBatch {
            input_ids,
            attention_mask: None,
            lengths: padded.lengths,
        })
    }

    fn forward(&self, batch: &EncodedBatch) -> Result<Tensor> {
        let mut xs = self.embedding.forward(&batch.input_ids)?;
        for (i, layer) in self.layers.iter().enumerate() {
            if i > 0 {
                xs = self.dropout.forward(&xs, self.is_training)?;
            }
            let states = layer.seq(&xs)?;
            xs = layer.states_to_tensor(&states)?;
        }

        // Padding sits on the right, so the last real token is at `length - 1`.
        let (b, _, h) = xs.dims3()?;
        let last: Vec<u32> = batch
            .lengths
            .iter()
            .map(|&l| l.saturating_sub(1) as u32)
            .collect();
        let index = Tensor::from_vec(last, (b, 1, 1), &self.device)?
            .broadcast_as((b, 1, h))?
            .contiguous()?;
        let last_hidden = xs.contiguous()?.gather(&index, 1)?.squeeze(1)?;
        let last_hidden = self.dropout.forward(&last_hidden, self.is_training)?;
        Ok(self.classifier.forward(&last_hidden)?)
    }

    fn loss(&self, logits: &Tensor, labels: &[Sentiment]) -> Result<Tensor> {
        let targets: Vec<f32> = labels.iter().map(|l| l.as_f32()).collect();
        let targets = Tensor::from_vec(targets, (labels.len(), 1), &self.device)?;
        Ok(bce_with_logits(logits, &targets)?)
    }

    fn probabilities(&self, logits: &Tensor) -> Result<Array2<f32>> {
        let positive: Vec<f32> = candle_nn::ops::sigmoid(&logits.squeeze(1)?)?.to_vec1()?;
        Ok(binary_proba(&positive))
    }

    fn optimizer_params(&self, learning_rate: f64) -> ParamsAdamW {
        ParamsAdamW {
            lr: learning_rate,
            weight_decay: 0.0,
            ..Default::default()
        }
    }

    fn set_evaluation_mode(&mut self) {
        self.is_training = false;
    }

    fn set_training_mode(&mut self) {
        self.is_training = true;
    }
}

/// Recurrent sentiment classifier over a corpus word vocabulary.
pub struct LSTMClassifier {
    config: ModelConfig,
    params: LstmParams,
    device: Device,
    network: Option<LstmNetwork>,
}

impl LSTMClassifier {
    pub fn new(config: ModelConfig, device: Device) -> Result<Self> {
        let params = LstmParams::from_model_type(&config.model_type)?;
        Ok(Self {
            config,
            params,
            device,
            network: None,
        })
    }

    pub fn network(&self) -> Option<&LstmNetwork> {
        self.network.as_ref()
    }
}

impl SentimentModel for LSTMClassifier {
    fn name(&self) -> &str {
        "lstm"
    }

    fn config(&self) -> &ModelConfig {
        &self.config
    }

    fn is_trained(&self) -> bool {
        self.network.is_some()
    }

    fn train_with_observer(
        &mut self,
        texts: &[String],
        labels: &[Sentiment],
        params: &TrainingParams,
        observer: &mut dyn FnMut(&EpochReport),
    ) -> PolarityResult<TrainingSummary> {
        validate_training_input(texts, labels)?;
        let cleaned = clean_all(texts);

        let result = if let Some(network) = self.network.as_mut() {
            train_with_rollback(network, &cleaned, labels, params, observer)
        } else {
            let vocab = Vocabulary::build(&cleaned, self.params.vocab_size);
            log::info!(
                "Built LSTM vocabulary of {} words (padding id {})",
                vocab.len(),
                PAD_ID
            );
            LstmNetwork::new(vocab, self.params.clone(), self.device.clone()).and_then(
                |mut network| {
                    let summary = network.fine_tune(&cleaned, labels, params, observer)?;
                    self.network = Some(network);
                    Ok(summary)
                },
            )
        };
        result.map_err(to_polarity_error)
    }

    fn predict_proba(&self, texts: &[String]) -> PolarityResult<Array2<f32>> {
        ensure_trained(self.is_trained(), self.name())?;
        let network = self
            .network
            .as_ref()
            .ok_or_else(|| PolarityError::NotTrained(self.name().to_string()))?;
        network
            .predict_batched(&clean_all(texts))
            .map_err(to_polarity_error)
    }

    fn save(&self) -> PolarityResult<()> {
        let network = self
            .network
            .as_ref()
            .ok_or_else(|| PolarityError::NotTrained(self.name().to_string()))?;
        network.save(&self.model_dir()).map_err(to_polarity_error)
    }

    fn load(&mut self) -> PolarityResult<()> {
        let dir = self.model_dir();
        let network = LstmNetwork::load(&dir, self.device.clone()).map_err(to_polarity_error)?;
        if network.params != self.params {
            log::warn!(
                "Saved LSTM architecture differs from the configured one; using the saved one"
            );
        }
        log::info!("Loaded {} model from: {:?}", self.name(), dir);
        self.network = Some(network);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_config(dir: &Path) -> ModelConfig {
        ModelConfig::new(
            ModelType::Lstm {
                vocab_size: 50,
                embedding_dim: 8,
                hidden_dim: 8,
                n_layers: 2,
                dropout: 0.1,
                max_length: 16,
            },
            dir,
        )
    }

    fn corpus() -> (Vec<String>, Vec<Sentiment>) {
        let mut texts = Vec::new();
        let mut labels = Vec::new();
        for subject in ["film", "meal", "trip", "show", "book", "song"] {
            texts.push(format!("the {} was good", subject));
            labels.push(Sentiment::Positive);
            texts.push(format!("the {} was bad", subject));
            labels.push(Sentiment::Negative);
        }
        (texts, labels)
    }

    fn params(epochs: usize) -> TrainingParams {
        TrainingParams {
            epochs,
            batch_size: 4,
            learning_rate: 1e-2,
            seed: 3,
        }
    }

    #[test]
    fn test_bce_matches_closed_form() {
        let logits = Tensor::new(&[[0.0f32], [2.0]], &Device::Cpu).unwrap();
        let targets = Tensor::new(&[[1.0f32], [0.0]], &Device::Cpu).unwrap();
        let loss: f32 = bce_with_logits(&logits, &targets)
            .unwrap()
            .to_scalar()
            .unwrap();
        let expected = (2f32.ln() + (1.0 + 2f32.exp()).ln()) / 2.0;
        assert!((loss - expected).abs() < 1e-5);
    }

    #[test]
    fn test_encode_uses_lengths_without_mask() {
        let (texts, _) = corpus();
        let cleaned = clean_all(&texts);
        let params = LstmParams::from_model_type(&tiny_config(Path::new("unused")).model_type).unwrap();
        let network =
            LstmNetwork::new(Vocabulary::build(&cleaned, 50), params, Device::Cpu).unwrap();
        let batch = network
            .encode(&["the film".to_string(), "the film was good".to_string()])
            .unwrap();
        assert!(batch.attention_mask.is_none());
        assert_eq!(batch.lengths, vec![2, 4]);
        assert_eq!(batch.input_ids.dims(), &[2, 4]);
    }

    #[test]
    fn test_train_predict_and_observe() {
        let dir = tempfile::tempdir().unwrap();
        let (texts, labels) = corpus();
        let mut model = LSTMClassifier::new(tiny_config(dir.path()), Device::Cpu).unwrap();

        let mut seen = Vec::new();
        let summary = model
            .train_with_observer(&texts, &labels, &params(15), &mut |r: &EpochReport| {
                seen.push(r.epoch)
            })
            .unwrap();
        assert_eq!(seen, (1..=15).collect::<Vec<_>>());
        let losses = summary.losses();
        assert_eq!(losses.len(), 15);
        assert!(losses.iter().all(|l| l.is_finite()));
        assert!(losses[14] < losses[0]);

        let queries = vec!["a good one".to_string(), "".to_string(), "??".to_string()];
        let proba = model.predict_proba(&queries).unwrap();
        assert_eq!(proba.shape(), &[3, 2]);
        for row in proba.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-5);
        }
        assert_eq!(model.predict(&queries).unwrap().len(), 3);
    }

    #[test]
    fn test_untrained_model_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let model = LSTMClassifier::new(tiny_config(dir.path()), Device::Cpu).unwrap();
        assert!(matches!(
            model.predict(&["good".to_string()]),
            Err(PolarityError::NotTrained(_))
        ));
        assert!(matches!(model.save(), Err(PolarityError::NotTrained(_))));
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let (texts, labels) = corpus();
        let mut model = LSTMClassifier::new(tiny_config(dir.path()), Device::Cpu).unwrap();
        model.train(&texts, &labels, &params(2)).unwrap();
        model.save().unwrap();
        for file in [WEIGHTS_FILE, VOCAB_FILE, PARAMS_FILE] {
            assert!(dir.path().join("lstm_model").join(file).exists());
        }

        let mut restored = LSTMClassifier::new(tiny_config(dir.path()), Device::Cpu).unwrap();
        restored.load().unwrap();
        let a = model.predict_proba(&texts).unwrap();
        let b = restored.predict_proba(&texts).unwrap();
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).abs() < 1e-6);
        }
    }

    #[test]
    fn test_diverging_run_keeps_last_trained_weights() {
        let dir = tempfile::tempdir().unwrap();
        let (texts, labels) = corpus();
        let mut model = LSTMClassifier::new(tiny_config(dir.path()), Device::Cpu).unwrap();
        model.train(&texts, &labels, &params(2)).unwrap();
        let before = model.predict_proba(&texts).unwrap();

        let diverging = TrainingParams {
            learning_rate: 1e30,
            ..params(3)
        };
        assert!(matches!(
            model.train(&texts, &labels, &diverging),
            Err(PolarityError::TrainingFailed(_))
        ));
        assert!(model.is_trained());
        let after = model.predict_proba(&texts).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_load_missing_state_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let mut model = LSTMClassifier::new(tiny_config(dir.path()), Device::Cpu).unwrap();
        assert!(matches!(model.load(), Err(PolarityError::NotFound(_))));
    }

    #[test]
    fn test_retraining_continues_from_current_weights() {
        let dir = tempfile::tempdir().unwrap();
        let (texts, labels) = corpus();
        let mut model = LSTMClassifier::new(tiny_config(dir.path()), Device::Cpu).unwrap();
        model.train(&texts, &labels, &params(1)).unwrap();
        let vocab_len = model.network().unwrap().vocab().len();
        model.train(&texts[..4], &labels[..4], &params(1)).unwrap();
        assert!(model.is_trained());
        assert_eq!(model.network().unwrap().vocab().len(), vocab_len);
    }
}
