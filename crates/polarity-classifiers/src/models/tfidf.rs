//! Weighted term-frequency vectorizer for the classical families.
//!
//! Mirrors the usual TF-IDF defaults: tokens of two or more word characters,
//! smoothed inverse document frequency `ln((1 + n) / (1 + df)) + 1`, raw term
//! counts, and l2-normalized rows. Input is expected to be cleaned already.

use ndarray::Array2;
use rayon::prelude::*;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;

use crate::error::{PolarityError, Result};

fn token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b\w\w+\b").expect("valid token pattern"))
}

fn tokens(doc: &str) -> impl Iterator<Item = &str> {
    token_regex().find_iter(doc).map(|m| m.as_str())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TfidfVectorizer {
    max_features: usize,
    vocabulary: HashMap<String, usize>,
    idf: Vec<f32>,
}

impl TfidfVectorizer {
    pub fn new(max_features: usize) -> Self {
        TfidfVectorizer {
            max_features,
            vocabulary: HashMap::new(),
            idf: Vec::new(),
        }
    }

    /// Number of features produced by `transform`.
    pub fn n_features(&self) -> usize {
        self.idf.len()
    }

    pub fn vocabulary(&self) -> &HashMap<String, usize> {
        &self.vocabulary
    }

    /// Learn the vocabulary and idf weights.
    ///
    /// When the corpus has more distinct terms than `max_features`, the most
    /// frequent terms across the corpus are kept (ties broken alphabetically).
    /// Feature columns are ordered alphabetically.
    pub fn fit(&mut self, docs: &[String]) -> Result<()> {
        let mut term_counts: HashMap<&str, usize> = HashMap::new();
        let mut doc_freq: HashMap<&str, usize> = HashMap::new();

        for doc in docs {
            let mut seen: HashMap<&str, ()> = HashMap::new();
            for tok in tokens(doc) {
                *term_counts.entry(tok).or_insert(0) += 1;
                if seen.insert(tok, ()).is_none() {
                    *doc_freq.entry(tok).or_insert(0) += 1;
                }
            }
        }

        if term_counts.is_empty() {
            return Err(PolarityError::Validation(
                "empty vocabulary; training texts contain no terms after cleaning".to_string(),
            ));
        }

        let mut ranked: Vec<(&str, usize)> = term_counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        ranked.truncate(self.max_features.max(1));

        let mut kept: Vec<&str> = ranked.into_iter().map(|(t, _)| t).collect();
        kept.sort_unstable();

        let n_docs = docs.len() as f32;
        self.idf = kept
            .iter()
            .map(|t| {
                let df = doc_freq.get(t).copied().unwrap_or(0) as f32;
                ((1.0 + n_docs) / (1.0 + df)).ln() + 1.0
            })
            .collect();
        self.vocabulary = kept
            .into_iter()
            .enumerate()
            .map(|(i, t)| (t.to_string(), i))
            .collect();

        log::debug!("TF-IDF vocabulary fitted with {} terms", self.idf.len());
        Ok(())
    }

    fn transform_one(&self, doc: &str) -> Vec<f32> {
        let mut row = vec![0.0f32; self.idf.len()];
        for tok in tokens(doc) {
            if let Some(&j) = self.vocabulary.get(tok) {
                row[j] += 1.0;
            }
        }
        for (v, idf) in row.iter_mut().zip(self.idf.iter()) {
            *v *= idf;
        }
        let norm = row.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            row.iter_mut().for_each(|v| *v /= norm);
        }
        row
    }

    /// Vectorize documents into a dense `(n_docs, n_features)` matrix.
    pub fn transform(&self, docs: &[String]) -> Result<Array2<f32>> {
        let rows: Vec<Vec<f32>> = docs.par_iter().map(|d| self.transform_one(d)).collect();
        let flat: Vec<f32> = rows.into_iter().flatten().collect();
        Array2::from_shape_vec((docs.len(), self.idf.len()), flat)
            .map_err(|e| PolarityError::Backend(format!("TF-IDF shape error: {}", e)))
    }

    pub fn fit_transform(&mut self, docs: &[String]) -> Result<Array2<f32>> {
        self.fit(docs)?;
        self.transform(docs)
    }
}
