pub mod gbdt;
#[cfg(feature = "linfa")]
pub mod logistic;
pub mod tfidf;
pub mod utils;

pub mod factory;
pub mod sentiment_model;
