use anyhow::{anyhow, Context, Result};
use candle_core::{DType, Device, IndexOp, Tensor};
use candle_nn::{Dropout, Linear, Module, VarBuilder, VarMap};
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use tokenizers::Tokenizer;

use polarity_classifiers::config::{ModelConfig, ModelType, TrainingParams};
use polarity_classifiers::data_handling::Sentiment;
use polarity_classifiers::models::sentiment_model::{
    ensure_trained, validate_training_input, EpochReport, SentimentModel, TrainingSummary,
};
use polarity_classifiers::models::utils::{ensure_saved, read_json, write_json};
use polarity_classifiers::preprocessing::clean_all;
use polarity_classifiers::{PolarityError, Result as PolarityResult};

use crate::encoding::wordpiece::{encode_batch, load_tokenizer, save_tokenizer, train_tokenizer};
use crate::models::model_interface::{train_with_rollback, EncodedBatch, NeuralInterface};
use crate::utils::utils::to_polarity_error;

const WEIGHTS_FILE: &str = "model.safetensors";
const CONFIG_FILE: &str = "config.json";
const TOKENIZER_FILE: &str = "tokenizer.json";
const PARAMS_FILE: &str = "params.json";

const NUM_LABELS: usize = 2;

/// Settings that come from the model configuration rather than the encoder's
/// `config.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BertParams {
    pub pretrained: Option<String>,
    pub max_length: usize,
    pub vocab_size: usize,
    pub hidden_size: usize,
    pub num_hidden_layers: usize,
    pub num_attention_heads: usize,
    pub intermediate_size: usize,
    pub dropout: f32,
}

impl BertParams {
    pub fn from_model_type(model_type: &ModelType) -> Result<Self> {
        match model_type {
            ModelType::Bert {
                pretrained,
                max_length,
                vocab_size,
                hidden_size,
                num_hidden_layers,
                num_attention_heads,
                intermediate_size,
                dropout,
            } => {
                if *num_attention_heads == 0 || hidden_size % num_attention_heads != 0 {
                    return Err(PolarityError::Validation(format!(
                        "hidden_size {} is not divisible by num_attention_heads {}",
                        hidden_size, num_attention_heads
                    ))
                    .into());
                }
                if *max_length < 2 {
                    return Err(PolarityError::Validation(
                        "max_length must leave room for [CLS] and [SEP]".to_string(),
                    )
                    .into());
                }
                Ok(BertParams {
                    pretrained: pretrained.clone(),
                    max_length: *max_length,
                    vocab_size: *vocab_size,
                    hidden_size: *hidden_size,
                    num_hidden_layers: *num_hidden_layers,
                    num_attention_heads: *num_attention_heads,
                    intermediate_size: *intermediate_size,
                    dropout: *dropout,
                })
            }
            other => Err(anyhow!("expected bert parameters, got {}", other.family())),
        }
    }

    /// `config.json` for an encoder trained from scratch.
    fn fresh_config(&self, vocab_len: usize) -> serde_json::Value {
        json!({
            "model_type": "bert",
            "vocab_size": vocab_len,
            "hidden_size": self.hidden_size,
            "num_hidden_layers": self.num_hidden_layers,
            "num_attention_heads": self.num_attention_heads,
            "intermediate_size": self.intermediate_size,
            "hidden_act": "gelu",
            "hidden_dropout_prob": self.dropout,
            "max_position_embeddings": self.max_length,
            "type_vocab_size": 2,
            "initializer_range": 0.02,
            "layer_norm_eps": 1e-12,
            "pad_token_id": 0,
            "position_embedding_type": "absolute",
            "use_cache": false,
            "classifier_dropout": null,
        })
    }
}

/// Locate a pretrained encoder directory. Sources that are not local
/// directories are fetched from the hub when the `hub` feature is enabled.
pub fn resolve_pretrained(source: &str) -> Result<PathBuf> {
    let path = PathBuf::from(source);
    if path.is_dir() {
        Ok(path)
    } else {
        fetch_from_hub(source)
    }
}

#[cfg(feature = "hub")]
fn fetch_from_hub(repo_id: &str) -> Result<PathBuf> {
    log::info!("Fetching pretrained encoder {} from the hub", repo_id);
    let api = hf_hub::api::sync::Api::new()?;
    let repo = api.model(repo_id.to_string());
    let config = repo.get(CONFIG_FILE)?;
    repo.get(TOKENIZER_FILE)?;
    repo.get(WEIGHTS_FILE)?;
    config
        .parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| anyhow!("hub snapshot for {} has no directory", repo_id))
}

#[cfg(not(feature = "hub"))]
fn fetch_from_hub(repo_id: &str) -> Result<PathBuf> {
    Err(PolarityError::NotFound(PathBuf::from(repo_id)).into())
}

/// Names a checkpoint may use for one of our variables.
fn checkpoint_names(name: &str) -> Vec<String> {
    let mut names = vec![name.to_string()];
    if let Some(stripped) = name.strip_prefix("bert.") {
        names.push(stripped.to_string());
    }
    for (new, old) in [("LayerNorm.weight", "LayerNorm.gamma"), ("LayerNorm.bias", "LayerNorm.beta")] {
        let legacy: Vec<String> = names
            .iter()
            .filter(|n| n.ends_with(new))
            .map(|n| format!("{}{}", &n[..n.len() - new.len()], old))
            .collect();
        names.extend(legacy);
    }
    names
}

/// BERT encoder with a two-way classification head on the `[CLS]` position.
pub struct BertNetwork {
    varmap: VarMap,
    bert: BertModel,
    dropout: Dropout,
    classifier: Linear,
    tokenizer: Tokenizer,
    encoder_config: serde_json::Value,
    params: BertParams,
    device: Device,
    is_training: bool,
}

impl BertNetwork {
    fn build(
        tokenizer: Tokenizer,
        encoder_config: serde_json::Value,
        params: BertParams,
        device: Device,
    ) -> Result<Self> {
        let config: BertConfig = serde_json::from_value(encoder_config.clone())
            .context("invalid BERT config.json")?;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let bert = BertModel::load(vb.pp("bert"), &config)?;
        let classifier = candle_nn::linear(config.hidden_size, NUM_LABELS, vb.pp("classifier"))?;

        Ok(Self {
            varmap,
            bert,
            dropout: Dropout::new(params.dropout),
            classifier,
            tokenizer,
            encoder_config,
            params,
            device,
            is_training: false,
        })
    }

    /// A compact encoder with a WordPiece vocabulary grown from `cleaned_texts`.
    pub fn from_scratch(cleaned_texts: &[String], params: BertParams, device: Device) -> Result<Self> {
        let tokenizer = train_tokenizer(cleaned_texts, params.vocab_size, params.max_length)?;
        let vocab_len = tokenizer.get_vocab_size(true);
        let encoder_config = params.fresh_config(vocab_len);
        log::info!(
            "Initialising BERT encoder: {} layers, hidden size {}, vocabulary {}",
            params.num_hidden_layers,
            params.hidden_size,
            vocab_len
        );
        Self::build(tokenizer, encoder_config, params, device)
    }

    /// Start from a pretrained encoder directory holding `config.json`,
    /// `tokenizer.json` and `model.safetensors`.
    pub fn from_pretrained(dir: &Path, params: BertParams, device: Device) -> Result<Self> {
        ensure_saved(dir, &[CONFIG_FILE, TOKENIZER_FILE, WEIGHTS_FILE])?;
        let encoder_config: serde_json::Value = read_json(dir.join(CONFIG_FILE))?;
        let max_positions = encoder_config
            .get("max_position_embeddings")
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
            .unwrap_or(params.max_length);
        let tokenizer =
            load_tokenizer(dir.join(TOKENIZER_FILE), params.max_length.min(max_positions))?;
        let network = Self::build(tokenizer, encoder_config, params, device)?;
        network.copy_weights(&dir.join(WEIGHTS_FILE))?;
        Ok(network)
    }

    /// Copy checkpoint tensors into our variables by name. Variables the
    /// checkpoint lacks (typically the classification head) keep their
    /// initialisation.
    fn copy_weights(&self, weights: &Path) -> Result<()> {
        let tensors = candle_core::safetensors::load(weights, &self.device)?;
        let data = self
            .varmap
            .data()
            .lock()
            .map_err(|_| anyhow!("variable map lock poisoned"))?;

        let mut copied = 0;
        let mut skipped = Vec::new();
        for (name, var) in data.iter() {
            let source = checkpoint_names(name)
                .into_iter()
                .find_map(|n| tensors.get(&n));
            match source {
                Some(tensor) if tensor.dims() == var.dims() => {
                    var.set(&tensor.to_dtype(DType::F32)?)?;
                    copied += 1;
                }
                Some(tensor) => {
                    log::warn!(
                        "Not copying {}: checkpoint shape {:?} differs from {:?}",
                        name,
                        tensor.dims(),
                        var.dims()
                    );
                    skipped.push(name.clone());
                }
                None => skipped.push(name.clone()),
            }
        }

        if copied == 0 {
            return Err(anyhow!(
                "no tensor in {:?} matches the BERT parameter layout",
                weights
            ));
        }
        log::info!(
            "Copied {} pretrained tensors, {} left at initialisation",
            copied,
            skipped.len()
        );
        log::debug!("Initialised without checkpoint values: {:?}", skipped);
        Ok(())
    }

    pub fn tokenizer(&self) -> &Tokenizer {
        &self.tokenizer
    }

    pub fn save(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        log::info!("Saving {} model weights to: {:?}", self.model_arch(), dir);
        self.varmap.save(dir.join(WEIGHTS_FILE))?;
        write_json(dir.join(CONFIG_FILE), &self.encoder_config)?;
        save_tokenizer(&self.tokenizer, dir.join(TOKENIZER_FILE))?;
        write_json(dir.join(PARAMS_FILE), &self.params)?;
        Ok(())
    }

    pub fn load(dir: &Path, device: Device) -> Result<Self> {
        ensure_saved(dir, &[WEIGHTS_FILE, CONFIG_FILE, TOKENIZER_FILE, PARAMS_FILE])?;
        let params: BertParams = read_json(dir.join(PARAMS_FILE))?;
        let encoder_config: serde_json::Value = read_json(dir.join(CONFIG_FILE))?;
        let tokenizer = load_tokenizer(dir.join(TOKENIZER_FILE), params.max_length)?;
        let mut network = Self::build(tokenizer, encoder_config, params, device)?;
        network.varmap.load(dir.join(WEIGHTS_FILE))?;
        Ok(network)
    }
}

impl NeuralInterface for BertNetwork {
    fn model_arch(&self) -> &'static str {
        "bert"
    }

    fn get_device(&self) -> &Device {
        &self.device
    }

    fn get_varmap(&self) -> &VarMap {
        &self.varmap
    }

    fn encode(&self, texts: &[String]) -> Result<EncodedBatch> {
        let encoded = encode_batch(&self.tokenizer, texts)?;
        let shape = (texts.len(), encoded.width);
        Ok(EncodedBatch {
            input_ids: Tensor::from_vec(encoded.ids, shape, &self.device)?,
            attention_mask: Some(Tensor::from_vec(
                encoded.attention_mask,
                shape,
                &self.device,
            )?),
            lengths: encoded.lengths,
        })
    }

    fn forward(&self, batch: &EncodedBatch) -> Result<Tensor> {
        let token_type_ids = batch.input_ids.zeros_like()?;
        let hidden = self.bert.forward(
            &batch.input_ids,
            &token_type_ids,
            batch.attention_mask.as_ref(),
        )?;
        let cls = hidden.i((.., 0))?;
        let cls = self.dropout.forward(&cls, self.is_training)?;
        Ok(self.classifier.forward(&cls)?)
    }

    fn loss(&self, logits: &Tensor, labels: &[Sentiment]) -> Result<Tensor> {
        let targets: Vec<u32> = labels.iter().map(|l| l.index() as u32).collect();
        let targets = Tensor::from_vec(targets, labels.len(), &self.device)?;
        Ok(candle_nn::loss::cross_entropy(logits, &targets)?)
    }

    fn probabilities(&self, logits: &Tensor) -> Result<Array2<f32>> {
        let (n, k) = logits.dims2()?;
        let proba = candle_nn::ops::softmax(logits, 1)?;
        let flat: Vec<f32> = proba.flatten_all()?.to_vec1()?;
        Ok(Array2::from_shape_vec((n, k), flat)?)
    }

    fn set_evaluation_mode(&mut self) {
        self.is_training = false;
    }

    fn set_training_mode(&mut self) {
        self.is_training = true;
    }
}

/// Transformer sentiment classifier, trained from scratch or fine-tuned from a
/// pretrained encoder.
pub struct BertClassifier {
    config: ModelConfig,
    params: BertParams,
    device: Device,
    network: Option<BertNetwork>,
}

impl BertClassifier {
    pub fn new(config: ModelConfig, device: Device) -> Result<Self> {
        let params = BertParams::from_model_type(&config.model_type)?;
        Ok(Self {
            config,
            params,
            device,
            network: None,
        })
    }

    pub fn network(&self) -> Option<&BertNetwork> {
        self.network.as_ref()
    }

    fn initial_network(&self, cleaned: &[String]) -> Result<BertNetwork> {
        match &self.params.pretrained {
            Some(source) => {
                let dir = resolve_pretrained(source)?;
                log::info!("Fine-tuning pretrained encoder from {:?}", dir);
                BertNetwork::from_pretrained(&dir, self.params.clone(), self.device.clone())
            }
            None => BertNetwork::from_scratch(cleaned, self.params.clone(), self.device.clone()),
        }
    }
}

impl SentimentModel for BertClassifier {
    fn name(&self) -> &str {
        "bert"
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
            self.initial_network(&cleaned).and_then(|mut network| {
                let summary = network.fine_tune(&cleaned, labels, params, observer)?;
                self.network = Some(network);
                Ok(summary)
            })
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
        let network = BertNetwork::load(&dir, self.device.clone()).map_err(to_polarity_error)?;
        log::info!("Loaded {} model from: {:?}", self.name(), dir);
        self.network = Some(network);
        Ok(())
    }
}
