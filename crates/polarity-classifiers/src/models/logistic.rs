use linfa::prelude::*;
use linfa::Dataset;
use linfa_logistic::{FittedLogisticRegression, LogisticRegression};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::config::{ModelConfig, ModelType, TrainingParams};
use crate::data_handling::Sentiment;
use crate::error::{PolarityError, Result};
use crate::models::sentiment_model::{
    binary_proba, ensure_trained, validate_training_input, EpochReport, SentimentModel,
    TrainingSummary,
};
use crate::models::tfidf::TfidfVectorizer;
use crate::models::utils::{ensure_saved, read_json, write_json};
use crate::preprocessing::clean_all;

const BUNDLE_FILE: &str = "lr_model.json";

#[derive(Serialize, Deserialize)]
struct LogisticBundle {
    vectorizer: TfidfVectorizer,
    model: FittedLogisticRegression<f64, usize>,
}

/// TF-IDF features feeding an l2-regularized logistic regression.
pub struct LogisticClassifier {
    bundle: Option<LogisticBundle>,
    params: ModelConfig,
}

impl LogisticClassifier {
    pub fn new(params: ModelConfig) -> Self {
        LogisticClassifier {
            bundle: None,
            params,
        }
    }
}

impl SentimentModel for LogisticClassifier {
    fn name(&self) -> &str {
        "lr"
    }

    fn config(&self) -> &ModelConfig {
        &self.params
    }

    fn is_trained(&self) -> bool {
        self.bundle.is_some()
    }

    fn train_with_observer(
        &mut self,
        texts: &[String],
        labels: &[Sentiment],
        _params: &TrainingParams,
        observer: &mut dyn FnMut(&EpochReport),
    ) -> Result<TrainingSummary> {
        validate_training_input(texts, labels)?;
        let (max_features, max_iterations, alpha) = match &self.params.model_type {
            ModelType::Logistic {
                max_features,
                max_iterations,
                alpha,
            } => (*max_features, *max_iterations, *alpha),
            other => {
                return Err(PolarityError::Validation(format!(
                    "expected logistic parameters, got {}",
                    other.family()
                )))
            }
        };

        let mut vectorizer = TfidfVectorizer::new(max_features);
        let x = vectorizer.fit_transform(&clean_all(texts))?.mapv(|v| v as f64);
        let y: Array1<usize> = labels.iter().map(|l| l.index()).collect();
        let dataset = Dataset::new(x, y);

        log::info!("Fitting TF-IDF + logistic regression on {} examples", texts.len());
        let model = LogisticRegression::default()
            .alpha(alpha)
            .max_iterations(max_iterations)
            .fit(&dataset)
            .map_err(|e| PolarityError::TrainingFailed(e.to_string()))?;

        self.bundle = Some(LogisticBundle { vectorizer, model });

        let report = EpochReport {
            epoch: 1,
            total_epochs: 1,
            mean_loss: None,
        };
        observer(&report);
        Ok(TrainingSummary {
            epochs: vec![report],
            n_examples: texts.len(),
        })
    }

    fn predict_proba(&self, texts: &[String]) -> Result<Array2<f32>> {
        ensure_trained(self.is_trained(), self.name())?;
        let bundle = self
            .bundle
            .as_ref()
            .ok_or_else(|| PolarityError::NotTrained(self.name().to_string()))?;
        let x = bundle.vectorizer.transform(&clean_all(texts))?.mapv(|v| v as f64);
        // Probabilities refer to the larger class label, i.e. Positive.
        let positive: Vec<f32> = bundle
            .model
            .predict_probabilities(&x)
            .iter()
            .map(|&p| p as f32)
            .collect();
        Ok(binary_proba(&positive))
    }

    fn save(&self) -> Result<()> {
        let bundle = self
            .bundle
            .as_ref()
            .ok_or_else(|| PolarityError::NotTrained(self.name().to_string()))?;
        write_json(self.model_dir().join(BUNDLE_FILE), bundle)
    }

    fn load(&mut self) -> Result<()> {
        let dir = self.model_dir();
        ensure_saved(&dir, &[BUNDLE_FILE])?;
        self.bundle = Some(read_json(dir.join(BUNDLE_FILE))?);
        Ok(())
    }
}
