//! Train, evaluate and explain any registered model family by identifier.
//!
//! The orchestrator keeps one adapter per family behind an `RwLock`: training
//! and lazy loading take the write side, prediction and explanation share the
//! read side. Adapters persist under `<save_dir>/<family>_model`, so a fresh
//! orchestrator pointed at the same directory serves previously trained models.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;

use polarity_classifiers::config::{ModelType, TrainingParams};
use polarity_classifiers::data_handling::{
    load_datasets, train_test_split, DatasetColumns, LabeledExample, Sentiment, TrainTestSplit,
};
use polarity_classifiers::error::ensure_same_len;
use polarity_classifiers::explain::{
    explain, AttributionExplainer, ExplainerConfig, Explanation, ExplanationMethod,
};
use polarity_classifiers::metrics::Metrics;
use polarity_classifiers::models::sentiment_model::{EpochReport, SentimentModel, TrainingSummary};
use polarity_classifiers::{PolarityError, Result};

use crate::jobs::JobStore;
use crate::registry::ModelRegistry;

pub type SharedModel = Arc<RwLock<Box<dyn SentimentModel>>>;

pub const DEFAULT_SPLIT_RATIO: f64 = 0.8;

/// Everything a finished training run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingRun {
    pub model_type: String,
    pub metrics: Metrics,
    pub summary: TrainingSummary,
    pub params: TrainingParams,
    pub n_train: usize,
    pub n_test: usize,
}

/// A single-text prediction with its explanation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub model_type: String,
    pub text: String,
    pub label: Sentiment,
    /// Probability of `label`.
    pub confidence: f32,
    /// Probability per class, ordered by class index.
    pub probabilities: Vec<f32>,
    pub method: ExplanationMethod,
    pub explanation: Explanation,
}

pub struct Orchestrator {
    registry: ModelRegistry,
    split_ratio: f64,
    adapters: Mutex<HashMap<&'static str, SharedModel>>,
}

fn poisoned<T>(_: T) -> PolarityError {
    PolarityError::backend("model lock poisoned by a panicked training run")
}

impl Orchestrator {
    pub fn new(registry: ModelRegistry) -> Self {
        Orchestrator {
            registry,
            split_ratio: DEFAULT_SPLIT_RATIO,
            adapters: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_split_ratio(mut self, split_ratio: f64) -> Self {
        self.split_ratio = split_ratio;
        self
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// The cached adapter for a family, built on first use.
    fn adapter(&self, model_type: &ModelType) -> Result<SharedModel> {
        let mut adapters = self.adapters.lock().map_err(poisoned)?;
        if let Some(shared) = adapters.get(model_type.family()) {
            return Ok(Arc::clone(shared));
        }
        let shared: SharedModel = Arc::new(RwLock::new(self.registry.build(model_type.clone())?));
        adapters.insert(model_type.family(), Arc::clone(&shared));
        Ok(shared)
    }

    /// Split, train, evaluate on the held-out side and persist.
    ///
    /// # Returns
    ///
    /// Metrics on the held-out portion. Unknown identifiers fail before any
    /// data is touched; failures inside the run surface as `TrainingFailed`.
    pub fn train_and_evaluate(
        &self,
        model_type: &str,
        texts: &[String],
        labels: &[Sentiment],
        params: Option<TrainingParams>,
    ) -> Result<Metrics> {
        let resolved = self.registry.resolve(model_type)?;
        ensure_same_len(texts.len(), labels.len())?;
        let examples: Vec<LabeledExample> = texts
            .iter()
            .zip(labels.iter())
            .map(|(t, &l)| LabeledExample::new(t.clone(), l))
            .collect();
        let run = self.run_training(resolved, &examples, params, &mut |_: &EpochReport| {})?;
        Ok(run.metrics)
    }

    /// Load the listed dataset files and train on their concatenation.
    pub fn train_and_evaluate_files<P: AsRef<Path>>(
        &self,
        model_type: &str,
        paths: &[P],
        columns: &DatasetColumns,
        params: Option<TrainingParams>,
    ) -> Result<TrainingRun> {
        let resolved = self.registry.resolve(model_type)?;
        let examples = load_datasets(paths, columns)?;
        self.run_training(resolved, &examples, params, &mut |_: &EpochReport| {})
    }

    /// Same as [`Orchestrator::train_and_evaluate`] on an already loaded corpus,
    /// reporting every finished epoch to `observer`.
    pub fn train_and_evaluate_examples(
        &self,
        model_type: &str,
        examples: &[LabeledExample],
        params: Option<TrainingParams>,
        observer: &mut dyn FnMut(&EpochReport),
    ) -> Result<TrainingRun> {
        let resolved = self.registry.resolve(model_type)?;
        self.run_training(resolved, examples, params, observer)
    }

    fn run_training(
        &self,
        model_type: ModelType,
        examples: &[LabeledExample],
        params: Option<TrainingParams>,
        observer: &mut dyn FnMut(&EpochReport),
    ) -> Result<TrainingRun> {
        let params = params.unwrap_or_else(|| model_type.default_training_params());
        let split = train_test_split(examples, self.split_ratio, params.seed)?;
        split.validate()?;
        let (train_x, train_y) = TrainTestSplit::columns(&split.train);
        let (test_x, test_y) = TrainTestSplit::columns(&split.test);

        let family = model_type.family();
        log::info!(
            "Training {} on {} examples, evaluating on {}",
            family,
            train_x.len(),
            test_x.len()
        );

        let shared = self.adapter(&model_type)?;
        let mut model = shared.write().map_err(poisoned)?;
        let summary = model
            .train_with_observer(&train_x, &train_y, &params, observer)
            .map_err(PolarityError::into_training_failure)?;
        let metrics = model
            .evaluate(&test_x, &test_y)
            .map_err(PolarityError::into_training_failure)?;
        model.save().map_err(PolarityError::into_training_failure)?;

        log::info!(
            "{}: accuracy {:.4}, precision {:.4}, recall {:.4}, f1 {:.4}",
            family,
            metrics.accuracy,
            metrics.precision,
            metrics.recall,
            metrics.f1
        );
        Ok(TrainingRun {
            model_type: family.to_string(),
            metrics,
            summary,
            params,
            n_train: train_x.len(),
            n_test: test_x.len(),
        })
    }

    /// Run [`Orchestrator::train_and_evaluate_examples`] as a background job.
    ///
    /// Epoch progress and the final outcome are recorded in `jobs` under `job_id`.
    pub fn submit_training(
        self: &Arc<Self>,
        jobs: &JobStore,
        job_id: &str,
        model_type: &str,
        examples: Arc<Vec<LabeledExample>>,
        params: Option<TrainingParams>,
    ) -> Result<JoinHandle<()>> {
        let orchestrator = Arc::clone(self);
        let identifier = model_type.to_string();
        jobs.submit(job_id, model_type, move |observer| {
            orchestrator.train_and_evaluate_examples(&identifier, &examples, params, observer)
        })
    }

    /// Make sure the adapter holds parameters, loading the persisted ones if needed.
    fn ensure_loaded(shared: &SharedModel) -> Result<()> {
        if shared.read().map_err(poisoned)?.is_trained() {
            return Ok(());
        }
        let mut model = shared.write().map_err(poisoned)?;
        if model.is_trained() {
            return Ok(());
        }
        match model.load() {
            Ok(()) => {
                log::info!("Loaded {} from {}", model.name(), model.model_dir().display());
                Ok(())
            }
            Err(PolarityError::NotFound(_)) => {
                Err(PolarityError::NotTrained(model.name().to_string()))
            }
            Err(e) => Err(e),
        }
    }

    /// Predict one text and explain the predicted class.
    ///
    /// The explanation targets `label` unless `config.target_class` is set.
    /// Loads the family's persisted state on first use; fails with `NotTrained`
    /// if it was never trained or saved.
    pub fn predict_and_explain(
        &self,
        model_type: &str,
        text: &str,
        method: ExplanationMethod,
        config: &ExplainerConfig,
    ) -> Result<Prediction> {
        let resolved = self.registry.resolve(model_type)?;
        let shared = self.adapter(&resolved)?;
        Self::ensure_loaded(&shared)?;

        let model = shared.read().map_err(poisoned)?;
        let proba = model.predict_proba(&[text.to_string()])?;
        let probabilities: Vec<f32> = proba.row(0).to_vec();
        let mut best = 0;
        for (i, p) in probabilities.iter().enumerate() {
            if *p > probabilities[best] {
                best = i;
            }
        }
        let label = Sentiment::from_index(best).ok_or_else(|| {
            PolarityError::backend(format!("model returned {} classes", probabilities.len()))
        })?;

        // Explain the returned label unless the caller asked for another class.
        let mut explainer = config.clone();
        explainer.target_class.get_or_insert(label.index());
        let proba_fn = |texts: &[String]| model.predict_proba(texts);
        let explanation = explain(method, text, &proba_fn, &explainer)?;

        Ok(Prediction {
            model_type: resolved.family().to_string(),
            text: text.to_string(),
            label,
            confidence: probabilities[best],
            probabilities,
            method,
            explanation,
        })
    }

    /// Rank words by mean absolute attribution over a batch of texts.
    pub fn global_importance(
        &self,
        model_type: &str,
        texts: &[String],
        config: &ExplainerConfig,
    ) -> Result<Explanation> {
        let resolved = self.registry.resolve(model_type)?;
        let shared = self.adapter(&resolved)?;
        Self::ensure_loaded(&shared)?;
        let model = shared.read().map_err(poisoned)?;
        let proba_fn = |batch: &[String]| model.predict_proba(batch);
        AttributionExplainer::new(config.clone()).feature_importance(texts, &proba_fn)
    }

    /// Drop every cached adapter and delete everything under the save directory.
    pub fn reset(&self) -> Result<()> {
        self.adapters.lock().map_err(poisoned)?.clear();
        let dir = self.registry.save_dir();
        if dir.exists() {
            for entry in fs::read_dir(dir)? {
                let path = entry?.path();
                if path.is_dir() {
                    fs::remove_dir_all(&path)?;
                } else {
                    fs::remove_file(&path)?;
                }
            }
        }
        log::info!("Cleared saved models under {}", dir.display());
        Ok(())
    }
}
