use anyhow::{Context, Result};
use clap::ArgMatches;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use polarity_classifiers::config::{ModelType, TrainingParams, DEFAULT_SAVE_DIR};
use polarity_classifiers::data_handling::DatasetColumns;
use polarity_classifiers::explain::{ExplainerConfig, ExplanationMethod};

use crate::util::validate_tsv_or_csv_file;

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct TrainConfig {
    pub datasets: Vec<String>,
    pub text_column: String,
    pub label_column: String,
    /// Model identifiers to compare, e.g. `rf`, `lstm`, `bert`.
    pub models: Vec<String>,
    /// Architecture overrides, one per family.
    pub model_configs: Vec<ModelType>,
    /// Training parameters keyed by model identifier. Missing entries use the
    /// family defaults.
    pub training: HashMap<String, TrainingParams>,
    pub save_dir: String,
    pub split_ratio: f64,
    pub device: String,
    pub report: bool,
    pub summary_file: String,
    pub report_file: String,
}

impl Default for TrainConfig {
    fn default() -> Self {
        TrainConfig {
            datasets: Vec::new(),
            text_column: String::from("text"),
            label_column: String::from("label"),
            models: vec![String::from("rf"), String::from("lstm"), String::from("bert")],
            model_configs: Vec::new(),
            training: HashMap::new(),
            save_dir: String::from(DEFAULT_SAVE_DIR),
            split_ratio: 0.8,
            device: String::from("cpu"),
            report: true,
            summary_file: String::from("polarity_comparison.json"),
            report_file: String::from("polarity_comparison.html"),
        }
    }
}

fn read_config<T: serde::de::DeserializeOwned>(config_path: &Path) -> Result<T> {
    let config_json = fs::read_to_string(config_path)
        .with_context(|| format!("Failed to read config file: {:?}", config_path))?;
    serde_json::from_str(&config_json)
        .with_context(|| format!("Failed to parse config file: {:?}", config_path))
}

impl TrainConfig {
    pub fn from_arguments(config_path: Option<&PathBuf>, matches: &ArgMatches) -> Result<Self> {
        let mut config: TrainConfig = match config_path {
            Some(path) => read_config(path)?,
            None => TrainConfig::default(),
        };

        // Apply CLI overrides
        if let Some(datasets) = matches.get_many::<String>("datasets") {
            config.datasets = datasets.cloned().collect();
        }
        if let Some(models) = matches.get_many::<String>("models") {
            config.models = models.cloned().collect();
        }
        if let Some(save_dir) = matches.get_one::<String>("save_dir") {
            config.save_dir = save_dir.clone();
        }
        if let Some(device) = matches.get_one::<String>("device") {
            config.device = device.clone();
        }
        if matches.get_flag("no_report") {
            config.report = false;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check identifiers before touching any dataset file.
    pub fn validate(&self) -> Result<()> {
        if self.models.is_empty() {
            anyhow::bail!("At least one model identifier is required");
        }
        for model in &self.models {
            model.parse::<ModelType>()?;
        }
        if !(self.split_ratio > 0.0 && self.split_ratio < 1.0) {
            anyhow::bail!(
                "split_ratio must lie strictly between 0 and 1, got {}",
                self.split_ratio
            );
        }
        if self.datasets.is_empty() {
            anyhow::bail!("No datasets given; pass -d <file> or list them under \"datasets\"");
        }
        for dataset in &self.datasets {
            validate_tsv_or_csv_file(dataset)?;
        }
        Ok(())
    }

    pub fn columns(&self) -> DatasetColumns {
        DatasetColumns {
            text_column: self.text_column.clone(),
            label_column: self.label_column.clone(),
        }
    }

    /// Directory that holds `save_dir`. Outputs land here so that `reset`,
    /// which deletes `save_dir`, leaves them in place.
    fn output_dir(&self) -> PathBuf {
        match Path::new(&self.save_dir).parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    pub fn summary_path(&self) -> PathBuf {
        self.output_dir().join(&self.summary_file)
    }

    pub fn report_path(&self) -> PathBuf {
        self.output_dir().join(&self.report_file)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct PredictConfig {
    pub model: String,
    pub text: String,
    pub method: ExplanationMethod,
    pub model_configs: Vec<ModelType>,
    pub save_dir: String,
    pub device: String,
    pub explainer: ExplainerConfig,
}

impl Default for PredictConfig {
    fn default() -> Self {
        PredictConfig {
            model: String::from("rf"),
            text: String::new(),
            method: ExplanationMethod::Perturbation,
            model_configs: Vec::new(),
            save_dir: String::from(DEFAULT_SAVE_DIR),
            device: String::from("cpu"),
            explainer: ExplainerConfig::default(),
        }
    }
}

impl PredictConfig {
    pub fn from_arguments(config_path: Option<&PathBuf>, matches: &ArgMatches) -> Result<Self> {
        let mut config: PredictConfig = match config_path {
            Some(path) => read_config(path)?,
            None => PredictConfig::default(),
        };

        if let Some(model) = matches.get_one::<String>("model") {
            config.model = model.clone();
        }
        if let Some(text) = matches.get_one::<String>("text") {
            config.text = text.clone();
        }
        if let Some(method) = matches.get_one::<String>("method") {
            config.method = method.parse()?;
        }
        if let Some(k) = matches.get_one::<usize>("num_features") {
            config.explainer.num_features = *k;
        }
        if let Some(samples) = matches.get_one::<usize>("num_samples") {
            config.explainer.num_samples = *samples;
        }
        if let Some(seed) = matches.get_one::<u64>("seed") {
            config.explainer.seed = *seed;
        }
        if let Some(save_dir) = matches.get_one::<String>("save_dir") {
            config.save_dir = save_dir.clone();
        }
        if let Some(device) = matches.get_one::<String>("device") {
            config.device = device.clone();
        }

        config.model.parse::<ModelType>()?;
        if matches.get_one::<String>("text").is_none() && config_path.is_none() {
            anyhow::bail!("No text given; pass -t <text>");
        }
        Ok(config)
    }
}
