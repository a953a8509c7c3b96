//! polarity-classifiers: the shared sentiment model contract and classical models.
//!
//! This crate provides the `SentimentModel` trait every family implements, the text
//! preprocessor, dataset loading and splitting, support-weighted evaluation metrics,
//! the classical TF-IDF pipelines (GBDT, optional logistic regression behind the
//! `linfa` feature), and the model-agnostic explainers.
pub mod config;
pub mod data_handling;
pub mod error;
pub mod explain;
pub mod metrics;
pub mod models;
pub mod preprocessing;

pub use error::{PolarityError, Result};
