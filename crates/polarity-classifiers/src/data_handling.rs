//! Labeled corpus types and helpers for loading and splitting sentiment datasets.
//!
//! Datasets are CSV or TSV files with a text column and a label column. Several
//! files concatenate in order into one corpus, which is then split into disjoint
//! train and test subsets by a fixed ratio with a seeded shuffle.
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::error::{PolarityError, Result};

/// Binary sentiment label. Ordering follows the class index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Sentiment {
    Negative,
    Positive,
}

impl Sentiment {
    pub const ALL: [Sentiment; 2] = [Sentiment::Negative, Sentiment::Positive];

    /// Class index used as the column in probability matrices.
    pub fn index(self) -> usize {
        match self {
            Sentiment::Negative => 0,
            Sentiment::Positive => 1,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Sentiment::Negative),
            1 => Some(Sentiment::Positive),
            _ => None,
        }
    }

    /// Target value for sigmoid/log-likelihood style losses.
    pub fn as_f32(self) -> f32 {
        self.index() as f32
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Sentiment::Negative => write!(f, "Negative"),
            Sentiment::Positive => write!(f, "Positive"),
        }
    }
}

impl FromStr for Sentiment {
    type Err = PolarityError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "0" | "-1" | "neg" | "negative" => Ok(Sentiment::Negative),
            "1" | "pos" | "positive" => Ok(Sentiment::Positive),
            other => Err(PolarityError::Validation(format!(
                "unrecognized sentiment label '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabeledExample {
    pub text: String,
    pub label: Sentiment,
}

impl LabeledExample {
    pub fn new(text: impl Into<String>, label: Sentiment) -> Self {
        Self {
            text: text.into(),
            label,
        }
    }
}

/// Column layout of a dataset file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetColumns {
    pub text_column: String,
    pub label_column: String,
}

impl Default for DatasetColumns {
    fn default() -> Self {
        Self {
            text_column: "text".to_string(),
            label_column: "label".to_string(),
        }
    }
}

/// Disjoint train/test partition of a corpus.
#[derive(Debug, Clone)]
pub struct TrainTestSplit {
    pub train: Vec<LabeledExample>,
    pub test: Vec<LabeledExample>,
}

impl TrainTestSplit {
    /// Split texts and labels into parallel vectors for the model contract.
    pub fn columns(examples: &[LabeledExample]) -> (Vec<String>, Vec<Sentiment>) {
        examples
            .iter()
            .map(|e| (e.text.clone(), e.label))
            .unzip()
    }

    /// Fail unless both sides of the split hold at least one example.
    pub fn validate(&self) -> Result<()> {
        if self.train.is_empty() || self.test.is_empty() {
            return Err(PolarityError::Validation(format!(
                "split produced {} training and {} held-out examples; both must be non-empty",
                self.train.len(),
                self.test.len()
            )));
        }
        Ok(())
    }
}

/// Shuffle the corpus with a seeded RNG and cut it at `train_ratio`.
///
/// # Arguments
///
/// * `examples` - The ordered corpus
/// * `train_ratio` - Fraction of examples assigned to the training side, in `(0, 1)`
/// * `seed` - Seed for the shuffle, so a given corpus always splits the same way
///
/// # Returns
///
/// The train/test partition. Sides may be empty for tiny corpora; call
/// [`TrainTestSplit::validate`] before training.
pub fn train_test_split(
    examples: &[LabeledExample],
    train_ratio: f64,
    seed: u64,
) -> Result<TrainTestSplit> {
    if !(train_ratio > 0.0 && train_ratio < 1.0) {
        return Err(PolarityError::Validation(format!(
            "split ratio must lie strictly between 0 and 1, got {}",
            train_ratio
        )));
    }

    let mut order: Vec<usize> = (0..examples.len()).collect();
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    order.shuffle(&mut rng);

    let n_train = ((examples.len() as f64) * train_ratio + 1e-9).floor() as usize;
    let (train_idx, test_idx) = order.split_at(n_train.min(examples.len()));

    Ok(TrainTestSplit {
        train: train_idx.iter().map(|&i| examples[i].clone()).collect(),
        test: test_idx.iter().map(|&i| examples[i].clone()).collect(),
    })
}

fn is_missing(cell: &str) -> bool {
    let trimmed = cell.trim();
    trimmed.is_empty() || trimmed.eq_ignore_ascii_case("nan") || trimmed.eq_ignore_ascii_case("null")
}

/// Load one CSV or TSV dataset. The delimiter is chosen from the file extension.
pub fn load_labeled_file<P: AsRef<Path>>(
    path: P,
    columns: &DatasetColumns,
) -> Result<Vec<LabeledExample>> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(PolarityError::NotFound(path.to_path_buf()));
    }

    let delimiter = match path
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_lowercase())
        .as_deref()
    {
        Some("tsv") => b'\t',
        Some("csv") => b',',
        _ => {
            return Err(PolarityError::Validation(format!(
                "dataset must have a .tsv or .csv extension: {}",
                path.display()
            )))
        }
    };

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_path(path)?;

    let headers = reader.headers()?.clone();
    let find = |name: &str| {
        headers.iter().position(|h| h.trim() == name).ok_or_else(|| {
            PolarityError::Validation(format!(
                "column '{}' not found in {}",
                name,
                path.display()
            ))
        })
    };
    let text_idx = find(&columns.text_column)?;
    let label_idx = find(&columns.label_column)?;

    let mut examples = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record?;
        let label_cell = record.get(label_idx).unwrap_or("");
        if is_missing(label_cell) {
            log::warn!(
                "Skipping row {} of {}: missing label",
                row + 1,
                path.display()
            );
            continue;
        }
        let label: Sentiment = label_cell.parse().map_err(|e: PolarityError| {
            PolarityError::Validation(format!("{} (row {} of {})", e, row + 1, path.display()))
        })?;
        let text = record
            .get(text_idx)
            .filter(|cell| !is_missing(cell))
            .unwrap_or("")
            .to_string();
        examples.push(LabeledExample { text, label });
    }

    log::debug!("Loaded {} examples from {}", examples.len(), path.display());
    Ok(examples)
}

/// Load and concatenate several datasets in the order given.
pub fn load_datasets<P: AsRef<Path>>(
    paths: &[P],
    columns: &DatasetColumns,
) -> Result<Vec<LabeledExample>> {
    if paths.is_empty() {
        return Err(PolarityError::Validation(
            "at least one dataset file is required".to_string(),
        ));
    }
    let mut corpus = Vec::new();
    for path in paths {
        corpus.extend(load_labeled_file(path, columns)?);
    }
    Ok(corpus)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corpus(n: usize) -> Vec<LabeledExample> {
        (0..n)
            .map(|i| {
                let label = if i % 2 == 0 {
                    Sentiment::Positive
                } else {
                    Sentiment::Negative
                };
                LabeledExample::new(format!("example {}", i), label)
            })
            .collect()
    }

    #[test]
    fn test_split_is_disjoint_and_sized() {
        let data = corpus(20);
        let split = train_test_split(&data, 0.8, 7).unwrap();
        assert_eq!(split.train.len(), 16);
        assert_eq!(split.test.len(), 4);
        for t in &split.test {
            assert!(!split.train.contains(t));
        }
    }

    #[test]
    fn test_split_is_reproducible() {
        let data = corpus(30);
        let a = train_test_split(&data, 0.7, 42).unwrap();
        let b = train_test_split(&data, 0.7, 42).unwrap();
        assert_eq!(a.test, b.test);
    }

    #[test]
    fn test_split_rejects_bad_ratio() {
        assert!(train_test_split(&corpus(4), 1.0, 0).is_err());
        assert!(train_test_split(&corpus(4), 0.0, 0).is_err());
    }

    #[test]
    fn test_tiny_split_fails_validation() {
        let split = train_test_split(&corpus(1), 0.8, 0).unwrap();
        assert!(matches!(split.validate(), Err(PolarityError::Validation(_))));
    }

    #[test]
    fn test_label_parsing() {
        assert_eq!("1".parse::<Sentiment>().unwrap(), Sentiment::Positive);
        assert_eq!("Negative".parse::<Sentiment>().unwrap(), Sentiment::Negative);
        assert_eq!(" pos ".parse::<Sentiment>().unwrap(), Sentiment::Positive);
        assert!("neutral".parse::<Sentiment>().is_err());
    }
}
