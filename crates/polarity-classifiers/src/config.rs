use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::PolarityError;

/// Default root directory under which each family persists its state.
pub const DEFAULT_SAVE_DIR: &str = "saved_models";

/// Central configuration for a model adapter: which family, its architecture
/// hyper-parameters, and where it persists.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ModelConfig {
    #[serde(default = "default_save_dir")]
    pub save_dir: PathBuf,

    #[serde(flatten)]
    pub model_type: ModelType,
}

fn default_save_dir() -> PathBuf {
    PathBuf::from(DEFAULT_SAVE_DIR)
}

/// Supported model families and their architecture hyper-parameters.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "model_type", rename_all = "lowercase")]
pub enum ModelType {
    Bert {
        /// Directory (or hub repo id with the `hub` feature) holding `config.json`,
        /// `tokenizer.json` and `model.safetensors`. `None` trains a compact encoder
        /// from scratch with a corpus-derived WordPiece vocabulary.
        pretrained: Option<String>,
        max_length: usize,
        vocab_size: usize,
        hidden_size: usize,
        num_hidden_layers: usize,
        num_attention_heads: usize,
        intermediate_size: usize,
        dropout: f32,
    },
    Lstm {
        vocab_size: usize,
        embedding_dim: usize,
        hidden_dim: usize,
        n_layers: usize,
        dropout: f32,
        max_length: usize,
    },
    Gbdt {
        max_features: usize,
        max_depth: u32,
        num_boost_round: u32,
        debug: bool,
        training_optimization_level: u8,
        loss_type: String,
    },
    #[cfg(feature = "linfa")]
    Logistic {
        max_features: usize,
        max_iterations: u64,
        alpha: f64,
    },
}

impl Default for ModelType {
    fn default() -> Self {
        ModelType::default_gbdt()
    }
}

impl ModelType {
    pub fn default_bert() -> Self {
        ModelType::Bert {
            pretrained: None,
            max_length: 128,
            vocab_size: 8000,
            hidden_size: 128,
            num_hidden_layers: 2,
            num_attention_heads: 2,
            intermediate_size: 512,
            dropout: 0.1,
        }
    }

    pub fn default_lstm() -> Self {
        ModelType::Lstm {
            vocab_size: 5000,
            embedding_dim: 100,
            hidden_dim: 256,
            n_layers: 2,
            dropout: 0.5,
            max_length: 128,
        }
    }

    pub fn default_gbdt() -> Self {
        ModelType::Gbdt {
            max_features: 5000,
            max_depth: 6,
            num_boost_round: 100,
            debug: false,
            training_optimization_level: 2,
            loss_type: "LogLikelyhood".to_string(),
        }
    }

    #[cfg(feature = "linfa")]
    pub fn default_logistic() -> Self {
        ModelType::Logistic {
            max_features: 5000,
            max_iterations: 200,
            alpha: 1.0,
        }
    }

    /// Stable family name, used as the persistence key.
    pub fn family(&self) -> &'static str {
        match self {
            ModelType::Bert { .. } => "bert",
            ModelType::Lstm { .. } => "lstm",
            ModelType::Gbdt { .. } => "rf",
            #[cfg(feature = "linfa")]
            ModelType::Logistic { .. } => "lr",
        }
    }

    /// Run hyper-parameters that suit this family when the caller gives none.
    pub fn default_training_params(&self) -> TrainingParams {
        match self {
            ModelType::Bert { .. } => TrainingParams {
                epochs: 3,
                batch_size: 16,
                learning_rate: 5e-5,
                seed: 42,
            },
            ModelType::Lstm { .. } => TrainingParams {
                epochs: 5,
                batch_size: 64,
                learning_rate: 1e-3,
                seed: 42,
            },
            ModelType::Gbdt { .. } => TrainingParams {
                epochs: 1,
                batch_size: 0,
                learning_rate: 0.1,
                seed: 42,
            },
            #[cfg(feature = "linfa")]
            ModelType::Logistic { .. } => TrainingParams {
                epochs: 1,
                batch_size: 0,
                learning_rate: 0.0,
                seed: 42,
            },
        }
    }
}

impl FromStr for ModelType {
    type Err = PolarityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "bert" | "transformer" => Ok(ModelType::default_bert()),
            "lstm" | "rnn" => Ok(ModelType::default_lstm()),
            "rf" | "gbdt" | "trees" => Ok(ModelType::default_gbdt()),
            #[cfg(feature = "linfa")]
            "lr" | "logistic" => Ok(ModelType::default_logistic()),
            _ => Err(PolarityError::UnknownModelType(s.to_string())),
        }
    }
}

impl ModelConfig {
    pub fn new(model_type: ModelType, save_dir: impl Into<PathBuf>) -> Self {
        Self {
            save_dir: save_dir.into(),
            model_type,
        }
    }

    /// Fixed directory where this family's state lives.
    pub fn model_dir(&self) -> PathBuf {
        self.save_dir
            .join(format!("{}_model", self.model_type.family()))
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            save_dir: default_save_dir(),
            model_type: ModelType::default(),
        }
    }
}

/// Per-run hyper-parameters passed to `train`.
///
/// Classical families read `learning_rate` as the boosting shrinkage and ignore
/// `epochs` and `batch_size`.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct TrainingParams {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub seed: u64,
}

impl Default for TrainingParams {
    fn default() -> Self {
        Self {
            epochs: 5,
            batch_size: 32,
            learning_rate: 1e-3,
            seed: 42,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifiers_are_case_insensitive() {
        assert_eq!("BERT".parse::<ModelType>().unwrap().family(), "bert");
        assert_eq!("Lstm".parse::<ModelType>().unwrap().family(), "lstm");
        assert_eq!("RF".parse::<ModelType>().unwrap().family(), "rf");
        assert_eq!("gbdt".parse::<ModelType>().unwrap().family(), "rf");
    }

    #[test]
    fn test_unknown_identifier() {
        let err = "svm".parse::<ModelType>().unwrap_err();
        assert!(matches!(err, PolarityError::UnknownModelType(ref s) if s == "svm"));
    }

    #[test]
    fn test_model_dir_is_keyed_by_family() {
        let config = ModelConfig::new(ModelType::default_lstm(), "/tmp/models");
        assert_eq!(config.model_dir(), PathBuf::from("/tmp/models/lstm_model"));
    }

    #[test]
    fn test_config_json_round_trip() {
        let json = r#"{"save_dir": "out", "model_type": "lstm", "vocab_size": 100,
            "embedding_dim": 8, "hidden_dim": 16, "n_layers": 1, "dropout": 0.0, "max_length": 32}"#;
        let config: ModelConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.model_type.family(), "lstm");
        assert_eq!(config.save_dir, PathBuf::from("out"));
    }
}
