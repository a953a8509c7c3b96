use candle_core::Device;

use polarity_classifiers::config::{ModelConfig, ModelType};
use polarity_classifiers::models::sentiment_model::SentimentModel;
use polarity_classifiers::{PolarityError, Result};

use crate::models::bert_model::BertClassifier;
use crate::models::lstm_model::LSTMClassifier;
use crate::utils::utils::to_polarity_error;

/// Build a boxed neural model from a `ModelConfig`, placing it on `device`.
pub fn build_model(params: ModelConfig, device: Device) -> Result<Box<dyn SentimentModel>> {
    match params.model_type {
        ModelType::Bert { .. } => Ok(Box::new(
            BertClassifier::new(params, device).map_err(to_polarity_error)?,
        )),
        ModelType::Lstm { .. } => Ok(Box::new(
            LSTMClassifier::new(params, device).map_err(to_polarity_error)?,
        )),
        _ => Err(PolarityError::Validation(format!(
            "'{}' is not a neural family",
            params.model_type.family()
        ))),
    }
}
