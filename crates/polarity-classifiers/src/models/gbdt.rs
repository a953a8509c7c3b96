use gbdt::config::Config;
use gbdt::decision_tree::{Data, DataVec};
use gbdt::gradient_boost::GBDT;
use ndarray::Array2;
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

const BUNDLE_FILE: &str = "rf_model.json";

/// Everything needed to reproduce predictions: the fitted vectorizer and the
/// boosted tree ensemble.
#[derive(Serialize, Deserialize)]
struct GbdtBundle {
    vectorizer: TfidfVectorizer,
    model: GBDT,
}

/// TF-IDF features feeding a gradient boosted decision tree ensemble.
pub struct GBDTClassifier {
    bundle: Option<GbdtBundle>,
    params: ModelConfig,
}

impl GBDTClassifier {
    pub fn new(params: ModelConfig) -> Self {
        GBDTClassifier {
            bundle: None,
            params,
        }
    }

    fn to_data(x: &Array2<f32>, labels: Option<&[Sentiment]>) -> DataVec {
        let mut out = DataVec::with_capacity(x.nrows());
        for (i, row) in x.rows().into_iter().enumerate() {
            // LogLikelyhood expects targets in {-1, 1}.
            let label = match labels {
                Some(l) if l[i] == Sentiment::Positive => 1.0,
                Some(_) => -1.0,
                None => 0.0,
            };
            out.push(Data::new_training_data(row.to_vec(), 1.0, label, None));
        }
        out
    }

    fn fit(
        &mut self,
        texts: &[String],
        labels: &[Sentiment],
        train_params: &TrainingParams,
    ) -> Result<()> {
        match &self.params.model_type {
            ModelType::Gbdt {
                max_features,
                max_depth,
                num_boost_round,
                debug,
                training_optimization_level,
                loss_type,
            } => {
                let cleaned = clean_all(texts);
                let mut vectorizer = TfidfVectorizer::new(*max_features);
                let x = vectorizer.fit_transform(&cleaned)?;

                let mut config = Config::new();
                config.set_feature_size(vectorizer.n_features());
                config.set_shrinkage(train_params.learning_rate as f32);
                config.set_max_depth(*max_depth);
                config.set_iterations(*num_boost_round as usize);
                config.set_debug(*debug);
                config.set_training_optimization_level(*training_optimization_level);
                config.set_loss(loss_type);

                let mut gbdt = GBDT::new(&config);
                let mut train_x = Self::to_data(&x, Some(labels));
                gbdt.fit(&mut train_x);

                self.bundle = Some(GbdtBundle {
                    vectorizer,
                    model: gbdt,
                });
                Ok(())
            }
            other => Err(PolarityError::Validation(format!(
                "expected gbdt parameters, got {}",
                other.family()
            ))),
        }
    }
}

impl SentimentModel for GBDTClassifier {
    fn name(&self) -> &str {
        "rf"
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
        params: &TrainingParams,
        observer: &mut dyn FnMut(&EpochReport),
    ) -> Result<TrainingSummary> {
        validate_training_input(texts, labels)?;
        log::info!(
            "Fitting TF-IDF + GBDT ensemble on {} examples",
            texts.len()
        );
        // `fit` only replaces the bundle once the ensemble is complete, so a
        // failure keeps the previous state.
        self.fit(texts, labels, params)?;

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
        let x = bundle.vectorizer.transform(&clean_all(texts))?;
        let test_x = Self::to_data(&x, None);
        // With the LogLikelyhood loss, predictions are probabilities of the +1 class.
        let positive = bundle.model.predict(&test_x);
        Ok(binary_proba(&positive))
    }

    fn save(&self) -> Result<()> {
        let bundle = self
            .bundle
            .as_ref()
            .ok_or_else(|| PolarityError::NotTrained(self.name().to_string()))?;
        let path = self.model_dir().join(BUNDLE_FILE);
        log::info!("Saving {} model to: {:?}", self.name(), path);
        write_json(&path, bundle)
    }

    fn load(&mut self) -> Result<()> {
        let dir = self.model_dir();
        ensure_saved(&dir, &[BUNDLE_FILE])?;
        let bundle: GbdtBundle = read_json(dir.join(BUNDLE_FILE))?;
        log::info!("Loaded {} model from: {:?}", self.name(), dir);
        self.bundle = Some(bundle);
        Ok(())
    }
}
