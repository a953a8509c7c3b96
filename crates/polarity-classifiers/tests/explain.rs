use polarity_classifiers::config::{ModelConfig, ModelType, TrainingParams};
use polarity_classifiers::data_handling::Sentiment;
use polarity_classifiers::explain::{
    explain, AttributionExplainer, ExplainerConfig, ExplanationMethod,
};
use polarity_classifiers::models::factory;
use polarity_classifiers::models::sentiment_model::{binary_proba, SentimentModel};
use polarity_classifiers::preprocessing::clean;
use polarity_classifiers::Result;

fn trained_model(dir: &std::path::Path) -> Box<dyn SentimentModel> {
    let mut texts = Vec::new();
    let mut labels = Vec::new();
    for subject in ["food", "staff", "room", "view", "price", "music"] {
        texts.push(format!("the {} was lovely", subject));
        labels.push(Sentiment::Positive);
        texts.push(format!("the {} was terrible", subject));
        labels.push(Sentiment::Negative);
    }
    let config = ModelConfig::new(
        ModelType::Gbdt {
            max_features: 100,
            max_depth: 3,
            num_boost_round: 20,
            debug: false,
            training_optimization_level: 2,
            loss_type: "LogLikelyhood".to_string(),
        },
        dir,
    );
    let mut model = factory::build_model(config).unwrap();
    model
        .train(&texts, &labels, &TrainingParams { learning_rate: 0.3, ..Default::default() })
        .unwrap();
    model
}

#[test]
fn test_both_methods_explain_a_trained_model() {
    let dir = tempfile::tempdir().unwrap();
    let model = trained_model(dir.path());
    let proba = |texts: &[String]| model.predict_proba(texts);

    let text = "The staff was lovely, the room too!";
    for method in [ExplanationMethod::Perturbation, ExplanationMethod::Attribution] {
        let config = ExplainerConfig {
            num_features: 3,
            num_samples: 200,
            seed: 1,
            ..Default::default()
        };
        let exp = explain(method, text, &proba, &config).unwrap();
        assert!(!exp.is_empty(), "{} returned nothing", method);
        assert!(exp.len() <= 3);
        for fw in &exp {
            assert!(text.contains(fw.feature.as_str()));
            assert!(fw.weight.is_finite());
        }
        for pair in exp.windows(2) {
            assert!(pair[0].weight.abs() >= pair[1].weight.abs());
        }
    }
}

#[test]
fn test_attributions_sum_to_prediction_shift() {
    let dir = tempfile::tempdir().unwrap();
    let model = trained_model(dir.path());
    let proba = |texts: &[String]| model.predict_proba(texts);

    let explainer = AttributionExplainer::new(ExplainerConfig::default());
    let texts = vec![
        "the view was terrible".to_string(),
        "lovely music".to_string(),
    ];
    let attrs = explainer.attributions(&texts, &proba).unwrap();
    assert_eq!(attrs.len(), 2);
    for a in &attrs {
        let total: f32 = a.values.iter().sum();
        assert!((total - (a.full_value - a.base_value)).abs() < 1e-4);
    }

    let ranking = explainer.feature_importance(&texts, &proba).unwrap();
    assert!(ranking.iter().all(|fw| fw.weight >= 0.0));
}

#[test]
fn test_empty_text_explains_to_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let model = trained_model(dir.path());
    let proba = |texts: &[String]| model.predict_proba(texts);
    let exp = explain(
        ExplanationMethod::Attribution,
        "",
        &proba,
        &ExplainerConfig::default(),
    )
    .unwrap();
    assert!(exp.is_empty());
}

/// Scores the cleaned text, the way every trained family does.
fn cleaning_keyword_model(texts: &[String]) -> Result<ndarray::Array2<f32>> {
    let p: Vec<f32> = texts
        .iter()
        .map(|t| {
            let cleaned = clean(t);
            let words: Vec<&str> = cleaned.split_whitespace().collect();
            let mut score = 0.5;
            if words.contains(&"fine") {
                score += 0.4;
            }
            if words.iter().any(|w| w.contains("bad")) {
                score -= 0.4;
            }
            score
        })
        .collect();
    Ok(binary_proba(&p))
}

#[test]
fn test_tokens_removed_by_cleaning_carry_no_weight() {
    let text = "@bad_airline flight was fine";
    let full = cleaning_keyword_model(&[text.to_string()]).unwrap();
    assert!((full[(0, 1)] - 0.9).abs() < 1e-6);

    let config = ExplainerConfig {
        num_samples: 300,
        seed: 4,
        ..Default::default()
    };
    let attrs = AttributionExplainer::new(config.clone())
        .attributions(&[text.to_string()], &cleaning_keyword_model)
        .unwrap();
    assert_eq!(attrs[0].class_index, Sentiment::Positive.index());
    assert!((attrs[0].full_value - 0.9).abs() < 1e-6);
    for (feature, value) in attrs[0].features.iter().zip(&attrs[0].values) {
        if feature == "bad_airline" {
            assert_eq!(*value, 0.0);
        }
    }

    for method in [ExplanationMethod::Perturbation, ExplanationMethod::Attribution] {
        let exp = explain(method, text, &cleaning_keyword_model, &config).unwrap();
        assert_eq!(exp[0].feature, "fine", "{:?}", exp);
        assert!(exp[0].weight > 0.0);
    }
}
