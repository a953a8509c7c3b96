//! Subword tokenizers for the transformer model.
//!
//! A fresh model gets a WordPiece vocabulary grown from its training corpus:
//! the special tokens, every character seen (both as a word start and as a
//! `##` continuation, so no word ever falls back to `[UNK]` wholesale), then the
//! most frequent whole words.

use ahash::AHashMap;
use anyhow::{anyhow, Result};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use tokenizers::models::wordpiece::WordPiece;
use tokenizers::normalizers::BertNormalizer;
use tokenizers::pre_tokenizers::bert::BertPreTokenizer;
use tokenizers::processors::bert::BertProcessing;
use tokenizers::{PaddingParams, PaddingStrategy, Tokenizer, TruncationParams};

use polarity_classifiers::preprocessing::tokenize;

pub const PAD: &str = "[PAD]";
pub const UNK: &str = "[UNK]";
pub const CLS: &str = "[CLS]";
pub const SEP: &str = "[SEP]";
pub const MASK: &str = "[MASK]";
pub const SPECIAL_TOKENS: [&str; 5] = [PAD, UNK, CLS, SEP, MASK];

/// One encoded batch, padded to its longest sequence.
#[derive(Debug, Clone)]
pub struct EncodedText {
    pub ids: Vec<u32>,
    pub attention_mask: Vec<u32>,
    pub lengths: Vec<usize>,
    pub width: usize,
}

/// Grow a WordPiece vocabulary of at most `vocab_size` entries from cleaned texts.
///
/// Special tokens and single characters are always kept, so the result can
/// exceed `vocab_size` on corpora with very many distinct characters.
pub fn build_vocab<S: AsRef<str>>(cleaned_texts: &[S], vocab_size: usize) -> Vec<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    let mut chars: BTreeSet<char> = BTreeSet::new();
    for text in cleaned_texts {
        for word in tokenize(text.as_ref()) {
            *counts.entry(word).or_insert(0) += 1;
            chars.extend(word.chars());
        }
    }

    let mut vocab: Vec<String> = SPECIAL_TOKENS.iter().map(|t| t.to_string()).collect();
    for c in &chars {
        vocab.push(c.to_string());
        vocab.push(format!("##{}", c));
    }

    let mut words: Vec<(&str, usize)> = counts
        .into_iter()
        .filter(|(w, _)| w.chars().count() > 1)
        .collect();
    words.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    for (word, _) in words {
        if vocab.len() >= vocab_size {
            break;
        }
        vocab.push(word.to_string());
    }
    vocab
}

fn token_id(tokenizer: &Tokenizer, token: &str) -> Result<u32> {
    tokenizer
        .token_to_id(token)
        .ok_or_else(|| anyhow!("tokenizer has no {} token", token))
}

/// Batch padding and truncation to `max_length` tokens, specials included.
fn configure(tokenizer: &mut Tokenizer, max_length: usize) -> Result<()> {
    let pad_id = tokenizer.token_to_id(PAD).unwrap_or(0);
    tokenizer
        .with_truncation(Some(TruncationParams {
            max_length,
            ..Default::default()
        }))
        .map_err(anyhow::Error::msg)?;
    tokenizer.with_padding(Some(PaddingParams {
        strategy: PaddingStrategy::BatchLongest,
        pad_id,
        pad_token: PAD.to_string(),
        ..Default::default()
    }));
    Ok(())
}

/// Build a BERT-style tokenizer (lowercasing normalizer, whitespace and
/// punctuation splitting, `[CLS] .. [SEP]` framing) over a corpus vocabulary.
pub fn train_tokenizer<S: AsRef<str>>(
    cleaned_texts: &[S],
    vocab_size: usize,
    max_length: usize,
) -> Result<Tokenizer> {
    let vocab: AHashMap<String, u32> = build_vocab(cleaned_texts, vocab_size)
        .into_iter()
        .enumerate()
        .map(|(i, t)| (t, i as u32))
        .collect();
    let n_tokens = vocab.len();

    let wordpiece = WordPiece::builder()
        .vocab(vocab)
        .unk_token(UNK.to_string())
        .build()
        .map_err(anyhow::Error::msg)?;
    let mut tokenizer = Tokenizer::new(wordpiece);
    let cls_id = token_id(&tokenizer, CLS)?;
    let sep_id = token_id(&tokenizer, SEP)?;
    tokenizer
        .with_normalizer(Some(BertNormalizer::default()))
        .with_pre_tokenizer(Some(BertPreTokenizer))
        .with_post_processor(Some(BertProcessing::new(
            (SEP.to_string(), sep_id),
            (CLS.to_string(), cls_id),
        )));
    configure(&mut tokenizer, max_length)?;
    log::info!("Built WordPiece tokenizer with {} tokens", n_tokens);
    Ok(tokenizer)
}

/// Load a serialized tokenizer and apply this model's padding and truncation.
pub fn load_tokenizer<P: AsRef<Path>>(path: P, max_length: usize) -> Result<Tokenizer> {
    let path = path.as_ref();
    let mut tokenizer = Tokenizer::from_file(path)
        .map_err(|e| anyhow!("failed to load tokenizer {:?}: {}", path, e))?;
    configure(&mut tokenizer, max_length)?;
    Ok(tokenizer)
}

pub fn save_tokenizer<P: AsRef<Path>>(tokenizer: &Tokenizer, path: P) -> Result<()> {
    tokenizer
        .save(path.as_ref(), false)
        .map_err(anyhow::Error::msg)?;
    Ok(())
}

/// Encode a batch with special tokens, padded to its longest row.
pub fn encode_batch(tokenizer: &Tokenizer, texts: &[String]) -> Result<EncodedText> {
    let encodings = tokenizer
        .encode_batch(texts.to_vec(), true)
        .map_err(anyhow::Error::msg)?;
    let width = encodings.iter().map(|e| e.get_ids().len()).max().unwrap_or(0);
    let mut ids = Vec::with_capacity(encodings.len() * width);
    let mut attention_mask = Vec::with_capacity(encodings.len() * width);
    let mut lengths = Vec::with_capacity(encodings.len());
    for encoding in &encodings {
        let mut row = encoding.get_ids().to_vec();
        let mut mask = encoding.get_attention_mask().to_vec();
        lengths.push(mask.iter().filter(|&&m| m == 1).count());
        // Tokenizers loaded without padding settings still get rectangular rows.
        row.resize(width, 0);
        mask.resize(width, 0);
        ids.extend(row);
        attention_mask.extend(mask);
    }
    Ok(EncodedText {
        ids,
        attention_mask,
        lengths,
        width,
    })
}
