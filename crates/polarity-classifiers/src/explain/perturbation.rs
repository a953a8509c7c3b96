//! Local surrogate explanations from token-deletion sampling.
//!
//! The original text is perturbed by switching off random subsets of its words.
//! Each perturbation is scored by the probability function and weighted by an
//! exponential kernel over its cosine distance to the original. A ridge
//! regression fitted on the binary presence vectors then gives each word a
//! signed weight toward the explained class.

use ndarray::{Array1, Array2};
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::error::{PolarityError, Result};
use crate::explain::{resolve_class, score, top_k, ExplainerConfig, Explanation, ProbaFn, TokenizedText};

pub struct PerturbationExplainer {
    config: ExplainerConfig,
}

impl PerturbationExplainer {
    pub fn new(config: ExplainerConfig) -> Self {
        PerturbationExplainer { config }
    }

    /// Draw presence masks; the first row is always the unperturbed text.
    fn sample_masks(&self, n_features: usize) -> Vec<Vec<bool>> {
        let n_samples = self.config.num_samples.max(2);
        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        let mut masks = Vec::with_capacity(n_samples);
        masks.push(vec![true; n_features]);
        for _ in 1..n_samples {
            let n_removed = rng.gen_range(1..=n_features);
            let mut mask = vec![true; n_features];
            for i in sample(&mut rng, n_features, n_removed).iter() {
                mask[i] = false;
            }
            masks.push(mask);
        }
        masks
    }

    fn kernel(&self, mask: &[bool]) -> f64 {
        let active = mask.iter().filter(|&&m| m).count() as f64;
        let total = mask.len() as f64;
        // Cosine similarity between a binary mask and the all-ones vector.
        let cosine = if active == 0.0 {
            0.0
        } else {
            (active / total).sqrt()
        };
        let distance = (1.0 - cosine) * 100.0;
        let width = self.config.kernel_width as f64;
        (-(distance * distance) / (width * width)).exp().sqrt()
    }

    /// Explain one text.
    ///
    /// # Arguments
    ///
    /// * `text` - The raw input text
    /// * `proba_fn` - Probability function of the model being explained
    ///
    /// # Returns
    ///
    /// At most `num_features` words of `text`, ordered by absolute weight. Positive
    /// weights push toward the explained class.
    pub fn explain(&self, text: &str, proba_fn: &ProbaFn) -> Result<Explanation> {
        let tokens = TokenizedText::new(text);
        let d = tokens.len();
        if d == 0 || self.config.num_features == 0 {
            return Ok(Vec::new());
        }

        let masks = self.sample_masks(d);
        let texts: Vec<String> = masks.iter().map(|m| tokens.render(m)).collect();
        let proba = score(proba_fn, &texts)?;
        let class = resolve_class(proba.row(0), self.config.target_class)?;

        let n = masks.len();
        let mut x = Array2::<f64>::zeros((n, d));
        for (i, mask) in masks.iter().enumerate() {
            for (j, &on) in mask.iter().enumerate() {
                if on {
                    x[(i, j)] = 1.0;
                }
            }
        }
        let y: Array1<f64> = proba.column(class).mapv(|p| p as f64);
        let w: Array1<f64> = masks.iter().map(|m| self.kernel(m)).collect();

        let coef = weighted_ridge(&x, &y, &w, self.config.ridge_alpha)?;
        let weights: Vec<f32> = coef.iter().map(|&c| c as f32).collect();

        log::debug!(
            "Perturbation explanation over {} words from {} samples (class {})",
            d,
            n,
            class
        );
        Ok(top_k(tokens.features(), &weights, self.config.num_features))
    }
}

/// Weighted ridge regression with an unpenalized intercept.
///
/// Centers `x` and `y` on their weighted means, then solves
/// `(Xᵀ W X + αI) β = Xᵀ W y` by Cholesky factorization.
pub fn weighted_ridge(
    x: &Array2<f64>,
    y: &Array1<f64>,
    w: &Array1<f64>,
    alpha: f64,
) -> Result<Array1<f64>> {
    let (n, d) = x.dim();
    if y.len() != n || w.len() != n {
        return Err(PolarityError::Validation(
            "ridge inputs must have one row per sample".to_string(),
        ));
    }
    let w_sum: f64 = w.sum();
    if w_sum <= 0.0 {
        return Err(PolarityError::Validation(
            "ridge sample weights sum to zero".to_string(),
        ));
    }

    let x_mean = x.t().dot(w) / w_sum;
    let y_mean = y.dot(w) / w_sum;
    let xc = x - &x_mean;
    let yc = y - y_mean;

    let xw = &xc * &w.view().insert_axis(ndarray::Axis(1));
    let mut a = xw.t().dot(&xc);
    for i in 0..d {
        a[(i, i)] += alpha;
    }
    let b = xw.t().dot(&yc);

    solve_spd(a, b)
}

/// Solve `A x = b` for a symmetric positive-definite `A`.
fn solve_spd(a: Array2<f64>, b: Array1<f64>) -> Result<Array1<f64>> {
    let d = b.len();
    let mut l = Array2::<f64>::zeros((d, d));
    for i in 0..d {
        for j in 0..=i {
            let mut sum = a[(i, j)];
            for k in 0..j {
                sum -= l[(i, k)] * l[(j, k)];
            }
            if i == j {
                if sum <= 0.0 {
                    return Err(PolarityError::Backend(
                        "surrogate system is not positive definite".to_string(),
                    ));
                }
                l[(i, i)] = sum.sqrt();
            } else {
                l[(i, j)] = sum / l[(j, j)];
            }
        }
    }

    let mut z = Array1::<f64>::zeros(d);
    for i in 0..d {
        let mut sum = b[i];
        for k in 0..i {
            sum -= l[(i, k)] * z[k];
        }
        z[i] = sum / l[(i, i)];
    }
    let mut out = Array1::<f64>::zeros(d);
    for i in (0..d).rev() {
        let mut sum = z[i];
        for k in (i + 1)..d {
            sum -= l[(k, i)] * out[k];
        }
        out[i] = sum / l[(i, i)];
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::sentiment_model::binary_proba;

    fn keyword_model(texts: &[String]) -> Result<Array2<f32>> {
        let p: Vec<f32> = texts
            .iter()
            .map(|t| {
                let t = t.to_lowercase();
                let mut score = 0.5;
                if t.contains("great") {
                    score += 0.4;
                }
                if t.contains("awful") {
                    score -= 0.4;
                }
                score
            })
            .collect();
        Ok(binary_proba(&p))
    }

    #[test]
    fn test_ridge_recovers_linear_weights() {
        let x = ndarray::arr2(&[[1.0, 0.0], [0.0, 1.0], [1.0, 1.0], [0.0, 0.0], [1.0, 1.0]]);
        let y = x.column(0).mapv(|v| 2.0 * v) - x.column(1).mapv(|v| v) + 0.5;
        let w = Array1::from_elem(5, 1.0);
        let coef = weighted_ridge(&x, &y, &w, 1e-8).unwrap();
        assert!((coef[0] - 2.0).abs() < 1e-4);
        assert!((coef[1] + 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_keyword_dominates_explanation() {
        let explainer = PerturbationExplainer::new(ExplainerConfig {
            num_features: 3,
            num_samples: 300,
            seed: 11,
            ..Default::default()
        });
        let text = "what a great day at the park";
        let exp = explainer.explain(text, &keyword_model).unwrap();
        assert!(exp.len() <= 3);
        assert_eq!(exp[0].feature, "great");
        assert!(exp[0].weight > 0.0);
        for fw in &exp {
            assert!(text.contains(fw.feature.as_str()));
        }
    }

    #[test]
    fn test_seeded_runs_are_reproducible() {
        let explainer = PerturbationExplainer::new(ExplainerConfig {
            seed: 3,
            ..Default::default()
        });
        let a = explainer.explain("awful food but great view", &keyword_model).unwrap();
        let b = explainer.explain("awful food but great view", &keyword_model).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_empty_text_has_empty_explanation() {
        let explainer = PerturbationExplainer::new(ExplainerConfig::default());
        assert!(explainer.explain("!!! ...", &keyword_model).unwrap().is_empty());
    }
}
