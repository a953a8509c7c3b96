use crate::config::{ModelConfig, ModelType};
use crate::error::{PolarityError, Result};
use crate::models::sentiment_model::SentimentModel;

/// Build a boxed classical model from a `ModelConfig`.
///
/// Neural families live in their own crate; asking this factory for one is a
/// validation error rather than a silent fallback.
pub fn build_model(params: ModelConfig) -> Result<Box<dyn SentimentModel>> {
    match params.model_type {
        ModelType::Gbdt { .. } => Ok(Box::new(crate::models::gbdt::GBDTClassifier::new(params))),

        #[cfg(feature = "linfa")]
        ModelType::Logistic { .. } => Ok(Box::new(
            crate::models::logistic::LogisticClassifier::new(params),
        )),

        ModelType::Bert { .. } | ModelType::Lstm { .. } => Err(PolarityError::Validation(
            format!(
                "'{}' is a neural family and cannot be built by the classical factory",
                params.model_type.family()
            ),
        )),
    }
}
