//! Additive token attributions by permutation sampling of Shapley values.
//!
//! For each sampled ordering of a text's words, words are switched on one at a
//! time starting from the fully masked text; each word is credited with the
//! change in the explained class probability when it joins. Averaged over
//! orderings, the attributions of a text sum exactly to
//! `f(text) - f(masked text)`.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::Result;
use crate::explain::{
    resolve_class, score, top_k, ExplainerConfig, Explanation, ProbaFn, TokenizedText,
};

/// Attributions for one text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenAttributions {
    pub features: Vec<String>,
    pub values: Vec<f32>,
    /// Explained class.
    pub class_index: usize,
    /// Probability of the explained class for the fully masked text.
    pub base_value: f32,
    /// Probability of the explained class for the full text.
    pub full_value: f32,
}

pub struct AttributionExplainer {
    config: ExplainerConfig,
}

impl AttributionExplainer {
    pub fn new(config: ExplainerConfig) -> Self {
        AttributionExplainer { config }
    }

    /// Compute per-word attributions for every text in the batch.
    ///
    /// All coalitions of the batch are rendered up front, deduplicated, and
    /// scored with a single call to `proba_fn`.
    pub fn attributions(
        &self,
        texts: &[String],
        proba_fn: &ProbaFn,
    ) -> Result<Vec<TokenAttributions>> {
        let n_perm = self.config.num_permutations.max(1);
        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);

        let mut unique: Vec<String> = Vec::new();
        let mut slot: HashMap<String, usize> = HashMap::new();
        let mut intern = |s: String, unique: &mut Vec<String>| -> usize {
            *slot.entry(s.clone()).or_insert_with(|| {
                unique.push(s);
                unique.len() - 1
            })
        };

        struct Plan {
            tokens: TokenizedText,
            full: usize,
            // (permutation, slot of each prefix coalition, from empty to full)
            walks: Vec<(Vec<usize>, Vec<usize>)>,
        }

        let mut plans = Vec::with_capacity(texts.len());
        for text in texts {
            let tokens = TokenizedText::new(text);
            let d = tokens.len();
            let full = intern(tokens.render(&vec![true; d]), &mut unique);
            let mut walks = Vec::new();
            if d > 0 {
                for _ in 0..n_perm {
                    let mut order: Vec<usize> = (0..d).collect();
                    order.shuffle(&mut rng);
                    let mut active = vec![false; d];
                    let mut slots = Vec::with_capacity(d + 1);
                    slots.push(intern(tokens.render(&active), &mut unique));
                    for &f in &order {
                        active[f] = true;
                        slots.push(intern(tokens.render(&active), &mut unique));
                    }
                    walks.push((order, slots));
                }
            }
            plans.push(Plan {
                tokens,
                full,
                walks,
            });
        }

        let proba = score(proba_fn, &unique)?;
        log::debug!(
            "Attribution sampling scored {} unique coalitions for {} texts",
            unique.len(),
            texts.len()
        );

        let mut out = Vec::with_capacity(plans.len());
        for plan in plans {
            let class = resolve_class(proba.row(plan.full), self.config.target_class)?;
            let d = plan.tokens.len();
            let mut values = vec![0.0f64; d];
            let base_slot = plan.walks.first().map(|(_, s)| s[0]).unwrap_or(plan.full);
            for (order, slots) in &plan.walks {
                for (step, &f) in order.iter().enumerate() {
                    let before = proba[(slots[step], class)] as f64;
                    let after = proba[(slots[step + 1], class)] as f64;
                    values[f] += after - before;
                }
            }
            let n_walks = plan.walks.len().max(1) as f64;
            out.push(TokenAttributions {
                features: plan.tokens.features().to_vec(),
                values: values.iter().map(|v| (v / n_walks) as f32).collect(),
                class_index: class,
                base_value: proba[(base_slot, class)],
                full_value: proba[(plan.full, class)],
            });
        }
        Ok(out)
    }

    /// Signed attributions for one text, strongest first.
    pub fn explain(&self, text: &str, proba_fn: &ProbaFn) -> Result<Explanation> {
        let batch = self.attributions(&[text.to_string()], proba_fn)?;
        Ok(batch
            .first()
            .map(|a| top_k(&a.features, &a.values, self.config.num_features))
            .unwrap_or_default())
    }

    /// Rank words by mean absolute attribution across a batch.
    ///
    /// Words absent from a text count as zero for that text, so the mean runs over
    /// the whole batch.
    pub fn feature_importance(&self, texts: &[String], proba_fn: &ProbaFn) -> Result<Explanation> {
        let batch = self.attributions(texts, proba_fn)?;
        let mut order: Vec<String> = Vec::new();
        let mut totals: HashMap<String, f64> = HashMap::new();
        for attr in &batch {
            for (f, v) in attr.features.iter().zip(attr.values.iter()) {
                let entry = totals.entry(f.clone()).or_insert_with(|| {
                    order.push(f.clone());
                    0.0
                });
                *entry += v.abs() as f64;
            }
        }
        let n = batch.len().max(1) as f64;
        let means: Vec<f32> = order
            .iter()
            .map(|f| (totals.get(f).copied().unwrap_or(0.0) / n) as f32)
            .collect();
        Ok(top_k(&order, &means, self.config.num_features))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::sentiment_model::binary_proba;
    use ndarray::Array2;

    fn keyword_model(texts: &[String]) -> Result<Array2<f32>> {
        let p: Vec<f32> = texts
            .iter()
            .map(|t| {
                let mut score: f32 = 0.5;
                if t.contains("love") {
                    score += 0.3;
                }
                if t.contains("hate") {
                    score -= 0.3;
                }
                if t.contains("love") && t.contains("really") {
                    score += 0.1;
                }
                score
            })
            .collect();
        Ok(binary_proba(&p))
    }

    #[test]
    fn test_attributions_are_additive() {
        let explainer = AttributionExplainer::new(ExplainerConfig {
            num_permutations: 8,
            seed: 5,
            ..Default::default()
        });
        let texts = vec!["I really love this".to_string()];
        let attrs = explainer.attributions(&texts, &keyword_model).unwrap();
        let a = &attrs[0];
        let total: f32 = a.values.iter().sum();
        assert!((total - (a.full_value - a.base_value)).abs() < 1e-5);
        assert_eq!(a.class_index, 1);
    }

    #[test]
    fn test_explain_respects_num_features_and_substrings() {
        let explainer = AttributionExplainer::new(ExplainerConfig {
            num_features: 2,
            ..Default::default()
        });
        let text = "I hate waiting, I hate queues";
        let exp = explainer.explain(text, &keyword_model).unwrap();
        assert!(exp.len() <= 2);
        assert_eq!(exp[0].feature, "hate");
        for fw in &exp {
            assert!(text.contains(fw.feature.as_str()));
        }
    }

    #[test]
    fn test_feature_importance_is_mean_absolute() {
        let explainer = AttributionExplainer::new(ExplainerConfig::default());
        let texts = vec!["love it".to_string(), "hate it".to_string()];
        let ranking = explainer.feature_importance(&texts, &keyword_model).unwrap();
        assert!(ranking.iter().all(|fw| fw.weight >= 0.0));
        let love = ranking.iter().find(|fw| fw.feature == "love").unwrap();
        assert!((love.weight - 0.15).abs() < 1e-5);
    }
}
