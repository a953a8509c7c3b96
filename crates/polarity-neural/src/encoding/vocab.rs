//! Word-level vocabulary for the recurrent model.
//!
//! Index 0 is reserved for padding and index 1 for out-of-vocabulary words. The
//! remaining slots go to the most frequent words of the training corpus, ties
//! broken lexicographically so that the same corpus always yields the same
//! vocabulary.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use polarity_classifiers::models::utils::{read_json, write_json};
use polarity_classifiers::preprocessing::tokenize;

pub const PAD_TOKEN: &str = "<pad>";
pub const OOV_TOKEN: &str = "<oov>";
pub const PAD_ID: u32 = 0;
pub const OOV_ID: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct Vocabulary {
    tokens: Vec<String>,
    index: HashMap<String, u32>,
}

impl From<Vec<String>> for Vocabulary {
    fn from(tokens: Vec<String>) -> Self {
        let index = tokens
            .iter()
            .enumerate()
            .map(|(i, t)| (t.clone(), i as u32))
            .collect();
        Vocabulary { tokens, index }
    }
}

impl From<Vocabulary> for Vec<String> {
    fn from(vocab: Vocabulary) -> Self {
        vocab.tokens
    }
}

/// Padded id matrix for one batch, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct PaddedIds {
    pub ids: Vec<u32>,
    /// True length of each row, at least 1.
    pub lengths: Vec<usize>,
    /// Row width: the longest row in the batch.
    pub width: usize,
}

impl Vocabulary {
    /// Build from cleaned texts, keeping at most `max_size` entries including the
    /// two reserved ones.
    pub fn build<S: AsRef<str>>(cleaned_texts: &[S], max_size: usize) -> Self {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for text in cleaned_texts {
            for word in tokenize(text.as_ref()) {
                *counts.entry(word).or_insert(0) += 1;
            }
        }

        let mut ranked: Vec<(&str, usize)> = counts
            .into_iter()
            .filter(|(w, _)| *w != PAD_TOKEN && *w != OOV_TOKEN)
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

        let mut tokens = vec![PAD_TOKEN.to_string(), OOV_TOKEN.to_string()];
        tokens.extend(
            ranked
                .into_iter()
                .take(max_size.saturating_sub(2))
                .map(|(w, _)| w.to_string()),
        );
        log::debug!("Built vocabulary with {} entries", tokens.len());
        Vocabulary::from(tokens)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn id(&self, word: &str) -> u32 {
        self.index.get(word).copied().unwrap_or(OOV_ID)
    }

    /// Map a cleaned text to ids, truncated to `max_len`. A text without words
    /// encodes as a single padding id so every sequence has length >= 1.
    pub fn encode(&self, cleaned: &str, max_len: usize) -> Vec<u32> {
        let ids: Vec<u32> = tokenize(cleaned)
            .take(max_len.max(1))
            .map(|w| self.id(w))
            .collect();
        if ids.is_empty() {
            vec![PAD_ID]
        } else {
            ids
        }
    }

    /// Encode and right-pad a batch to its longest row.
    pub fn encode_batch<S: AsRef<str>>(&self, cleaned: &[S], max_len: usize) -> PaddedIds {
        let rows: Vec<Vec<u32>> = cleaned
            .iter()
            .map(|t| self.encode(t.as_ref(), max_len))
            .collect();
        let width = rows.iter().map(|r| r.len()).max().unwrap_or(1);
        let lengths = rows.iter().map(|r| r.len()).collect();
        let mut ids = Vec::with_capacity(rows.len() * width);
        for mut row in rows {
            row.resize(width, PAD_ID);
            ids.extend(row);
        }
        PaddedIds {
            ids,
            lengths,
            width,
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        write_json(path, self)?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(read_json(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frequency_order_with_lexicographic_ties() {
        let texts = ["b a c", "a b", "a d"];
        let vocab = Vocabulary::build(&texts, 10);
        // a:3, b:2, then c and d tie at 1.
        assert_eq!(vocab.tokens, vec!["<pad>", "<oov>", "a", "b", "c", "d"]);
        assert_eq!(vocab.id("a"), 2);
        assert_eq!(vocab.id("zzz"), OOV_ID);
    }

    #[test]
    fn test_max_size_includes_reserved_ids() {
        let vocab = Vocabulary::build(&["x y z", "x y", "x"], 3);
        assert_eq!(vocab.len(), 3);
        assert_eq!(vocab.id("x"), 2);
        assert_eq!(vocab.id("y"), OOV_ID);
    }

    #[test]
    fn test_encode_truncates_and_pads() {
        let vocab = Vocabulary::build(&["good movie", "bad movie"], 10);
        assert_eq!(vocab.encode("", 5), vec![PAD_ID]);
        assert_eq!(vocab.encode("movie movie movie", 2).len(), 2);

        let batch = vocab.encode_batch(&["good", "bad movie unknown", ""], 8);
        assert_eq!(batch.width, 3);
        assert_eq!(batch.lengths, vec![1, 3, 1]);
        assert_eq!(batch.ids.len(), 9);
        assert_eq!(batch.ids[1..3], [PAD_ID, PAD_ID]);
        assert_eq!(batch.ids[5], OOV_ID);
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vocab.json");
        let vocab = Vocabulary::build(&["one two two"], 100);
        vocab.save(&path).unwrap();
        assert_eq!(Vocabulary::load(&path).unwrap(), vocab);
    }
}
