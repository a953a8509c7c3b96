use anyhow::Result;

use crate::input::PredictConfig;
use crate::orchestrator::{Orchestrator, Prediction};
use crate::train::build_registry;

pub fn run_prediction(config: &PredictConfig) -> Result<Prediction> {
    let registry = build_registry(&config.save_dir, &config.device, &config.model_configs)?;
    let orchestrator = Orchestrator::new(registry);
    let prediction =
        orchestrator.predict_and_explain(&config.model, &config.text, config.method, &config.explainer)?;
    log::info!(
        "{} predicts {} ({:.3}) with a {}-word {} explanation",
        prediction.model_type,
        prediction.label,
        prediction.confidence,
        prediction.explanation.len(),
        prediction.method
    );
    Ok(prediction)
}

pub fn run_reset(save_dir: &str) -> Result<()> {
    let registry = build_registry(save_dir, "cpu", &[])?;
    Orchestrator::new(registry).reset()?;
    Ok(())
}
