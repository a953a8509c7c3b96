use std::collections::HashMap;
use std::path::{Path, PathBuf};

use polarity_classifiers::config::{ModelConfig, ModelType};
use polarity_classifiers::models::factory as classical;
use polarity_classifiers::models::sentiment_model::SentimentModel;
use polarity_classifiers::Result;
use polarity_neural::models::factory as neural;
use polarity_neural::Device;

/// Maps model-type identifiers to adapter constructors.
///
/// Identifiers resolve to each family's default architecture unless a custom
/// one was registered with [`ModelRegistry::with_model`].
pub struct ModelRegistry {
    save_dir: PathBuf,
    device: Device,
    configured: HashMap<&'static str, ModelType>,
}

impl ModelRegistry {
    pub fn new(save_dir: impl Into<PathBuf>, device: Device) -> Self {
        ModelRegistry {
            save_dir: save_dir.into(),
            device,
            configured: HashMap::new(),
        }
    }

    /// Use `model_type`'s hyper-parameters for its family.
    pub fn with_model(mut self, model_type: ModelType) -> Self {
        self.configured.insert(model_type.family(), model_type);
        self
    }

    pub fn save_dir(&self) -> &Path {
        &self.save_dir
    }

    /// Identifiers accepted by [`ModelRegistry::resolve`], one per family.
    pub fn families() -> Vec<&'static str> {
        let mut families = vec!["bert", "lstm", "rf"];
        if cfg!(feature = "linfa") {
            families.push("lr");
        }
        families
    }

    /// Resolve an identifier, failing with `UnknownModelType` for anything
    /// unrecognised.
    pub fn resolve(&self, identifier: &str) -> Result<ModelType> {
        let default: ModelType = identifier.parse()?;
        Ok(self
            .configured
            .get(default.family())
            .cloned()
            .unwrap_or(default))
    }

    /// Construct a fresh, untrained adapter.
    pub fn build(&self, model_type: ModelType) -> Result<Box<dyn SentimentModel>> {
        let config = ModelConfig::new(model_type, &self.save_dir);
        log::debug!(
            "Building {} adapter persisting to {:?}",
            config.model_type.family(),
            config.model_dir()
        );
        match config.model_type {
            ModelType::Bert { .. } | ModelType::Lstm { .. } => {
                neural::build_model(config, self.device.clone())
            }
            _ => classical::build_model(config),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polarity_classifiers::PolarityError;

    #[test]
    fn test_unknown_identifier() {
        let registry = ModelRegistry::new("unused", Device::Cpu);
        assert!(matches!(
            registry.resolve("UNKNOWN"),
            Err(PolarityError::UnknownModelType(_))
        ));
    }

    #[test]
    fn test_registered_architecture_overrides_default() {
        let custom = ModelType::Lstm {
            vocab_size: 100,
            embedding_dim: 4,
            hidden_dim: 4,
            n_layers: 1,
            dropout: 0.0,
            max_length: 8,
        };
        let registry = ModelRegistry::new("unused", Device::Cpu).with_model(custom.clone());
        assert_eq!(registry.resolve("rnn").unwrap(), custom);
        assert_eq!(registry.resolve("RF").unwrap(), ModelType::default_gbdt());
    }

    #[test]
    fn test_every_family_builds() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::new(dir.path(), Device::Cpu);
        for family in ModelRegistry::families() {
            let model = registry.build(registry.resolve(family).unwrap()).unwrap();
            assert_eq!(model.name(), family);
            assert!(model.model_dir().starts_with(dir.path()));
        }
    }
}
