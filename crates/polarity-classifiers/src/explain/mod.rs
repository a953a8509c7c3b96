//! Model-agnostic explanations.
//!
//! Both backends consume a probability function with the shape of
//! [`SentimentModel::predict_proba`](crate::models::sentiment_model::SentimentModel::predict_proba)
//! and never hold the model itself, so any family can be explained by either method.
//!
//! - [`perturbation`]: local linear surrogate fitted on token-deletion samples.
//! - [`attribution`]: sampled Shapley values against a masked baseline.

pub mod attribution;
pub mod perturbation;

use ndarray::{Array2, ArrayView1};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use crate::error::{PolarityError, Result};

pub use attribution::AttributionExplainer;
pub use perturbation::PerturbationExplainer;

/// Borrowed probability function: texts in, one probability row per text out.
pub type ProbaFn<'a> = dyn Fn(&[String]) -> Result<Array2<f32>> + Sync + 'a;

/// One `(feature_token, signed_weight)` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureWeight {
    pub feature: String,
    pub weight: f32,
}

/// Ordered feature weights, strongest first.
pub type Explanation = Vec<FeatureWeight>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExplanationMethod {
    Perturbation,
    Attribution,
}

impl FromStr for ExplanationMethod {
    type Err = PolarityError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "perturbation" | "lime" => Ok(ExplanationMethod::Perturbation),
            "attribution" | "shap" => Ok(ExplanationMethod::Attribution),
            other => Err(PolarityError::Validation(format!(
                "unknown explanation method '{}'; expected 'perturbation' or 'attribution'",
                other
            ))),
        }
    }
}

impl fmt::Display for ExplanationMethod {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ExplanationMethod::Perturbation => write!(f, "perturbation"),
            ExplanationMethod::Attribution => write!(f, "attribution"),
        }
    }
}

/// Settings shared by both backends.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExplainerConfig {
    /// Maximum number of features returned.
    pub num_features: usize,
    /// Perturbed samples drawn by the local surrogate, including the original text.
    pub num_samples: usize,
    /// Random permutations per text for Shapley sampling.
    pub num_permutations: usize,
    /// Width of the exponential kernel over cosine distance (scaled by 100).
    pub kernel_width: f32,
    /// L2 penalty of the surrogate regression.
    pub ridge_alpha: f64,
    /// Class whose probability is explained; `None` picks the predicted class.
    pub target_class: Option<usize>,
    pub seed: u64,
}

impl Default for ExplainerConfig {
    fn default() -> Self {
        Self {
            num_features: 10,
            num_samples: 500,
            num_permutations: 10,
            kernel_width: 25.0,
            ridge_alpha: 1.0,
            target_class: None,
            seed: 0,
        }
    }
}

/// Explain one text with the chosen backend.
pub fn explain(
    method: ExplanationMethod,
    text: &str,
    proba_fn: &ProbaFn,
    config: &ExplainerConfig,
) -> Result<Explanation> {
    match method {
        ExplanationMethod::Perturbation => {
            PerturbationExplainer::new(config.clone()).explain(text, proba_fn)
        }
        ExplanationMethod::Attribution => {
            AttributionExplainer::new(config.clone()).explain(text, proba_fn)
        }
    }
}

fn word_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\w+").expect("valid word pattern"))
}

/// A text split into word occurrences, with distinct words as features.
///
/// Every feature is a substring of the original text. Switching a feature off
/// deletes the spans of all its occurrences and keeps every other character,
/// so rendering with all features on reproduces the text exactly.
#[derive(Debug, Clone)]
pub(crate) struct TokenizedText {
    text: String,
    // (byte start, byte end, feature id)
    spans: Vec<(usize, usize, usize)>,
    features: Vec<String>,
}

impl TokenizedText {
    pub(crate) fn new(text: &str) -> Self {
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut features = Vec::new();
        let mut spans = Vec::new();
        for m in word_regex().find_iter(text) {
            let word = m.as_str().to_string();
            let id = *index.entry(word.clone()).or_insert_with(|| {
                features.push(word);
                features.len() - 1
            });
            spans.push((m.start(), m.end(), id));
        }
        TokenizedText {
            text: text.to_string(),
            spans,
            features,
        }
    }

    pub(crate) fn features(&self) -> &[String] {
        &self.features
    }

    pub(crate) fn len(&self) -> usize {
        self.features.len()
    }

    /// Rebuild the text with the spans of inactive features removed.
    pub(crate) fn render(&self, active: &[bool]) -> String {
        let mut out = String::with_capacity(self.text.len());
        let mut cursor = 0;
        for &(start, end, id) in &self.spans {
            if !active[id] {
                out.push_str(&self.text[cursor..start]);
                cursor = end;
            }
        }
        out.push_str(&self.text[cursor..]);
        out
    }
}

/// Score texts and check the probability matrix has one row per text.
pub(crate) fn score(proba_fn: &ProbaFn, texts: &[String]) -> Result<Array2<f32>> {
    let proba = proba_fn(texts)?;
    if proba.nrows() != texts.len() || proba.ncols() == 0 {
        return Err(PolarityError::Validation(format!(
            "probability function returned a {}x{} matrix for {} texts",
            proba.nrows(),
            proba.ncols(),
            texts.len()
        )));
    }
    Ok(proba)
}

/// Resolve the class to explain for one probability row.
pub(crate) fn resolve_class(row: ArrayView1<f32>, target: Option<usize>) -> Result<usize> {
    match target {
        Some(c) if c < row.len() => Ok(c),
        Some(c) => Err(PolarityError::Validation(format!(
            "target class {} out of range for {} classes",
            c,
            row.len()
        ))),
        None => {
            let mut best = 0;
            for (i, p) in row.iter().enumerate() {
                if *p > row[best] {
                    best = i;
                }
            }
            Ok(best)
        }
    }
}

/// Keep the `k` strongest weights by absolute value. Ties keep token order.
pub(crate) fn top_k(features: &[String], weights: &[f32], k: usize) -> Explanation {
    let mut ranked: Vec<FeatureWeight> = features
        .iter()
        .zip(weights.iter())
        .map(|(f, &w)| FeatureWeight {
            feature: f.clone(),
            weight: w,
        })
        .collect();
    ranked.sort_by(|a, b| {
        b.weight
            .abs()
            .partial_cmp(&a.weight.abs())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    ranked.truncate(k);
    ranked
}
