use anyhow::Result;
use chrono::{DateTime, Utc};
use maud::html;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use polarity_classifiers::config::ModelType;
use polarity_classifiers::data_handling::load_datasets;
use polarity_neural::utils::utils::get_device;

use crate::input::TrainConfig;
use crate::jobs::{JobRecord, JobStatus, JobStore};
use crate::orchestrator::{Orchestrator, TrainingRun};
use crate::plot::{plot_confusion_matrix, plot_losses, plot_metric_comparison};
use crate::registry::ModelRegistry;
use crate::report::{code_block, Report, ReportSection};
use crate::util::write_json;

/// Outcome of a `train` invocation across every requested model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonSummary {
    pub generated_at: DateTime<Utc>,
    pub n_examples: usize,
    pub config: TrainConfig,
    pub jobs: Vec<JobRecord>,
}

impl ComparisonSummary {
    pub fn completed_runs(&self) -> Vec<&TrainingRun> {
        self.jobs.iter().filter_map(|j| j.result.as_ref()).collect()
    }

    pub fn failed(&self) -> Vec<&JobRecord> {
        self.jobs
            .iter()
            .filter(|j| j.status == JobStatus::Failed)
            .collect()
    }
}

pub fn build_registry(
    save_dir: &str,
    device: &str,
    model_configs: &[ModelType],
) -> Result<ModelRegistry> {
    let device = get_device(device)?;
    let mut registry = ModelRegistry::new(save_dir, device);
    for model_type in model_configs {
        registry = registry.with_model(model_type.clone());
    }
    Ok(registry)
}

/// Train every requested model concurrently and collect their outcomes.
///
/// Individual model failures are recorded in the summary rather than aborting
/// the other runs.
pub fn run_training(config: &TrainConfig) -> Result<ComparisonSummary> {
    let registry = build_registry(&config.save_dir, &config.device, &config.model_configs)?;
    for model in &config.models {
        registry.resolve(model)?;
    }

    let examples = Arc::new(load_datasets(&config.datasets, &config.columns())?);
    log::info!(
        "Loaded {} labeled examples from {} file(s)",
        examples.len(),
        config.datasets.len()
    );

    let orchestrator = Arc::new(Orchestrator::new(registry).with_split_ratio(config.split_ratio));
    let jobs = JobStore::new();
    let mut job_ids = Vec::with_capacity(config.models.len());
    let mut handles = Vec::with_capacity(config.models.len());
    for model in &config.models {
        let job_id = format!("train-{}", model.to_lowercase());
        let params = config.training.get(model).cloned();
        handles.push(orchestrator.submit_training(
            &jobs,
            &job_id,
            model,
            Arc::clone(&examples),
            params,
        )?);
        job_ids.push(job_id);
    }

    let records = jobs.wait_all(&job_ids, Duration::from_millis(250));
    for handle in handles {
        if handle.join().is_err() {
            log::warn!("A training thread exited abnormally");
        }
    }

    let summary = ComparisonSummary {
        generated_at: Utc::now(),
        n_examples: examples.len(),
        config: config.clone(),
        jobs: records,
    };

    write_json(config.summary_path(), &summary)?;
    log::info!("Summary written to {}", config.summary_path().display());
    if config.report {
        comparison_report(&summary)?.save_to_file(config.report_path())?;
    }
    Ok(summary)
}

pub fn comparison_report(summary: &ComparisonSummary) -> Result<Report> {
    let mut report = Report::new("Sentiment Model Comparison", clap::crate_version!());
    let runs = summary.completed_runs();

    /* Section 1: Overview */
    {
        let mut overview = ReportSection::new("Overview");
        overview.add_content(html! {
            p {
                "Held-out evaluation of " (summary.jobs.len()) " model(s) trained on "
                (summary.n_examples) " labeled examples with a "
                (format!("{:.0}/{:.0}", summary.config.split_ratio * 100.0, (1.0 - summary.config.split_ratio) * 100.0))
                " train/test split."
            }
            table {
                thead {
                    tr { th { "Model" } th { "Status" } th { "Accuracy" } th { "Precision" } th { "Recall" } th { "F1" } th { "Train" } th { "Test" } }
                }
                tbody {
                    @for job in &summary.jobs {
                        @match &job.result {
                            Some(run) => {
                                tr {
                                    td { (run.model_type) }
                                    td { "completed" }
                                    td { (format!("{:.4}", run.metrics.accuracy)) }
                                    td { (format!("{:.4}", run.metrics.precision)) }
                                    td { (format!("{:.4}", run.metrics.recall)) }
                                    td { (format!("{:.4}", run.metrics.f1)) }
                                    td { (run.n_train) }
                                    td { (run.n_test) }
                                }
                            }
                            None => {
                                tr class="failed" {
                                    td { (job.model_type) }
                                    td colspan="7" { (job.detail) }
                                }
                            }
                        }
                    }
                }
            }
        });
        if !runs.is_empty() {
            overview.add_plot(plot_metric_comparison(&runs));
        }
        report.add_section(overview);
    }

    /* Section 2: Training dynamics */
    if let Some(losses) = plot_losses(&runs) {
        let mut dynamics = ReportSection::new("Training Loss");
        dynamics.add_plot(losses);
        report.add_section(dynamics);
    }

    /* Section 3: Confusion matrices */
    if !runs.is_empty() {
        let mut confusion = ReportSection::new("Confusion Matrices");
        for run in &runs {
            confusion.add_plot(plot_confusion_matrix(run));
        }
        report.add_section(confusion);
    }

    /* Section 4: Configuration */
    {
        let mut config_section = ReportSection::new("Configuration");
        config_section.add_content(code_block(&serde_json::to_string_pretty(&summary.config)?));
        report.add_section(config_section);
    }

    Ok(report)
}
