//! polarity-neural: candle-backed sentiment models.
//!
//! - [`models::lstm_model`]: word embeddings and stacked LSTM layers.
//! - [`models::bert_model`]: a BERT encoder with a `[CLS]` classification head,
//!   trained from scratch or fine-tuned from a pretrained checkpoint.
//!
//! Both implement the `SentimentModel` contract from `polarity-classifiers`.
pub mod encoding;
pub mod models;
pub mod utils;

pub use candle_core::Device;
