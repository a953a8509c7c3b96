use std::sync::Arc;

use polarity_classifiers::config::{ModelType, TrainingParams};
use polarity_classifiers::data_handling::{DatasetColumns, LabeledExample, Sentiment};
use polarity_classifiers::explain::{ExplainerConfig, ExplanationMethod};
use polarity_classifiers::PolarityError;
use polarity_cli::jobs::{JobStatus, JobStore};
use polarity_cli::orchestrator::Orchestrator;
use polarity_cli::registry::ModelRegistry;
use polarity_neural::Device;

fn corpus() -> Vec<LabeledExample> {
    let subjects = [
        "the movie", "this phone", "our hotel", "the service", "my lunch",
        "the concert", "that book", "the update", "this game", "the trip",
    ];
    let mut examples = Vec::new();
    for subject in subjects {
        examples.push(LabeledExample::new(format!("{} was good", subject), Sentiment::Positive));
        examples.push(LabeledExample::new(format!("{} was bad", subject), Sentiment::Negative));
    }
    examples
}

fn small_gbdt() -> ModelType {
    ModelType::Gbdt {
        max_features: 200,
        max_depth: 3,
        num_boost_round: 30,
        debug: false,
        training_optimization_level: 2,
        loss_type: "LogLikelyhood".to_string(),
    }
}

fn orchestrator(dir: &std::path::Path) -> Orchestrator {
    Orchestrator::new(ModelRegistry::new(dir, Device::Cpu).with_model(small_gbdt()))
}

fn params() -> Option<TrainingParams> {
    Some(TrainingParams {
        learning_rate: 0.3,
        ..Default::default()
    })
}

#[test]
fn test_unknown_model_fails_before_loading_data() {
    let dir = tempfile::tempdir().unwrap();
    let result = orchestrator(dir.path()).train_and_evaluate_files(
        "UNKNOWN",
        &["/definitely/not/here.csv"],
        &DatasetColumns::default(),
        None,
    );
    assert!(matches!(result, Err(PolarityError::UnknownModelType(_))));
}

#[test]
fn test_mismatched_inputs_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let texts = vec!["good".to_string(), "bad".to_string()];
    let result = orchestrator(dir.path()).train_and_evaluate("rf", &texts, &[Sentiment::Positive], None);
    assert!(matches!(result, Err(PolarityError::Validation(_))));
}

#[test]
fn test_train_evaluate_persist_and_explain() {
    let dir = tempfile::tempdir().unwrap();
    let (texts, labels): (Vec<String>, Vec<Sentiment>) =
        corpus().into_iter().map(|e| (e.text, e.label)).unzip();

    let metrics = orchestrator(dir.path())
        .train_and_evaluate("rf", &texts, &labels, params())
        .unwrap();
    assert!(metrics.accuracy >= 0.75, "accuracy {}", metrics.accuracy);
    assert!(metrics
        .labels
        .iter()
        .all(|l| l == "Negative" || l == "Positive"));
    assert!(dir.path().join("rf_model").is_dir());

    // A fresh orchestrator serves the persisted model.
    let fresh = orchestrator(dir.path());
    let text = "the movie was good";
    for method in [ExplanationMethod::Perturbation, ExplanationMethod::Attribution] {
        let prediction = fresh
            .predict_and_explain(
                "RF",
                text,
                method,
                &ExplainerConfig {
                    num_features: 3,
                    num_samples: 100,
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(prediction.label, Sentiment::Positive);
        assert!(prediction.confidence >= 0.5 && prediction.confidence <= 1.0);
        assert!((prediction.probabilities.iter().sum::<f32>() - 1.0).abs() < 1e-4);
        assert!(prediction.explanation.len() <= 3);
        for fw in &prediction.explanation {
            assert!(text.contains(fw.feature.as_str()));
        }
    }

    let ranking = fresh
        .global_importance("rf", &texts[..4], &ExplainerConfig::default())
        .unwrap();
    assert!(ranking.iter().all(|fw| fw.weight >= 0.0));
}

#[test]
fn test_predict_without_training_is_not_trained() {
    let dir = tempfile::tempdir().unwrap();
    let result = orchestrator(dir.path()).predict_and_explain(
        "rf",
        "anything",
        ExplanationMethod::Perturbation,
        &ExplainerConfig::default(),
    );
    assert!(matches!(result, Err(PolarityError::NotTrained(_))));
}

#[test]
fn test_reset_clears_saved_models() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator(dir.path());
    let (texts, labels): (Vec<String>, Vec<Sentiment>) =
        corpus().into_iter().map(|e| (e.text, e.label)).unzip();
    orchestrator
        .train_and_evaluate("rf", &texts, &labels, params())
        .unwrap();
    orchestrator.reset().unwrap();
    assert!(!dir.path().join("rf_model").exists());
    let result = orchestrator.predict_and_explain(
        "rf",
        "the trip was good",
        ExplanationMethod::Attribution,
        &ExplainerConfig::default(),
    );
    assert!(matches!(result, Err(PolarityError::NotTrained(_))));
}

#[test]
fn test_background_jobs_report_outcomes() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = Arc::new(orchestrator(dir.path()));
    let jobs = JobStore::new();
    let examples = Arc::new(corpus());

    let ok = orchestrator
        .submit_training(&jobs, "ok", "rf", Arc::clone(&examples), params())
        .unwrap();
    // A single example leaves the training side empty.
    let tiny = Arc::new(examples[..1].to_vec());
    let failing = orchestrator
        .submit_training(&jobs, "tiny", "rf", tiny, params())
        .unwrap();
    ok.join().unwrap();
    failing.join().unwrap();

    let done = jobs.get_status("ok").unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    let run = done.result.unwrap();
    assert_eq!(run.model_type, "rf");
    assert_eq!(run.n_train + run.n_test, examples.len());

    let failed = jobs.get_status("tiny").unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert!(failed.error.is_some());
    assert!(jobs.get_status("never-submitted").is_none());
}

fn trained(dir: &std::path::Path) -> Orchestrator {
    let orchestrator = orchestrator(dir);
    let (texts, labels): (Vec<String>, Vec<Sentiment>) =
        corpus().into_iter().map(|e| (e.text, e.label)).unzip();
    orchestrator
        .train_and_evaluate("rf", &texts, &labels, params())
        .unwrap();
    orchestrator
}

#[test]
fn test_explanation_targets_the_returned_label() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = trained(dir.path());
    let text = "@bad_airline the movie was good";
    let prediction = orchestrator
        .predict_and_explain(
            "rf",
            text,
            ExplanationMethod::Attribution,
            &ExplainerConfig::default(),
        )
        .unwrap();
    assert_eq!(prediction.label, Sentiment::Positive);
    for fw in &prediction.explanation {
        assert!(text.contains(fw.feature.as_str()));
        if fw.feature == "bad_airline" {
            assert_eq!(fw.weight, 0.0);
        }
    }

    // An explicit target overrides the predicted label.
    let negative = orchestrator
        .predict_and_explain(
            "rf",
            text,
            ExplanationMethod::Attribution,
            &ExplainerConfig {
                target_class: Some(Sentiment::Negative.index()),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(negative.label, Sentiment::Positive);
    for pos in &prediction.explanation {
        let neg = negative
            .explanation
            .iter()
            .find(|fw| fw.feature == pos.feature)
            .unwrap();
        assert!((pos.weight + neg.weight).abs() < 1e-5);
    }
}

#[test]
fn test_concurrent_predictions_share_one_adapter() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = Arc::new(trained(dir.path()));
    let config = ExplainerConfig {
        num_samples: 100,
        seed: 3,
        ..Default::default()
    };

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let orchestrator = Arc::clone(&orchestrator);
            let config = config.clone();
            std::thread::spawn(move || {
                orchestrator
                    .predict_and_explain("rf", "the trip was bad", ExplanationMethod::Perturbation, &config)
                    .unwrap()
            })
        })
        .collect();
    let predictions: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    for prediction in &predictions {
        assert_eq!(prediction.label, Sentiment::Negative);
        assert_eq!(prediction, &predictions[0]);
    }
}
