//! Error types shared by every model family.
//!
//! All fallible operations of the model contract return [`Result<T>`], which uses
//! [`PolarityError`] as the error type.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// A [`Result`](std::result::Result) alias using [`PolarityError`] as the error type.
pub type Result<T> = std::result::Result<T, PolarityError>;

#[derive(Error, Debug)]
pub enum PolarityError {
    /// Malformed or mismatched input, or not enough data for a split.
    #[error("validation error: {0}")]
    Validation(String),

    /// Inference attempted with no learned parameters present.
    #[error("model '{0}' has not been trained or loaded")]
    NotTrained(String),

    /// Persistence load with no prior save.
    #[error("no saved model found at {}", .0.display())]
    NotFound(PathBuf),

    #[error("unknown model type: {0}")]
    UnknownModelType(String),

    /// Anything raised inside a training run.
    #[error("training failed: {0}")]
    TrainingFailed(String),

    /// Failure reported by an underlying model backend (candle, gbdt, tokenizers).
    #[error("{0}")]
    Backend(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

/// Coarse error category surfaced to callers alongside the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    ValidationError,
    NotTrained,
    NotFound,
    UnknownModelType,
    TrainingFailed,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            ErrorKind::ValidationError => "ValidationError",
            ErrorKind::NotTrained => "NotTrained",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::UnknownModelType => "UnknownModelType",
            ErrorKind::TrainingFailed => "TrainingFailed",
            ErrorKind::Internal => "Internal",
        };
        write!(f, "{}", s)
    }
}

impl PolarityError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PolarityError::Validation(_) => ErrorKind::ValidationError,
            PolarityError::NotTrained(_) => ErrorKind::NotTrained,
            PolarityError::NotFound(_) => ErrorKind::NotFound,
            PolarityError::UnknownModelType(_) => ErrorKind::UnknownModelType,
            PolarityError::TrainingFailed(_) => ErrorKind::TrainingFailed,
            PolarityError::Backend(_)
            | PolarityError::Io(_)
            | PolarityError::Json(_)
            | PolarityError::Csv(_) => ErrorKind::Internal,
        }
    }

    /// Wrap any error raised while a training run was in progress.
    ///
    /// Errors that already belong to the taxonomy (validation problems detected before
    /// any parameter was touched) are passed through unchanged.
    pub fn into_training_failure(self) -> Self {
        match self {
            e @ (PolarityError::Validation(_)
            | PolarityError::UnknownModelType(_)
            | PolarityError::TrainingFailed(_)) => e,
            other => PolarityError::TrainingFailed(other.to_string()),
        }
    }

    pub fn backend(err: impl fmt::Display) -> Self {
        PolarityError::Backend(err.to_string())
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

/// Structured failure handed to the outer layers instead of a raw error chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
}

impl fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Check that a text batch and its labels line up.
pub fn ensure_same_len(texts: usize, labels: usize) -> Result<()> {
    if texts != labels {
        return Err(PolarityError::Validation(format!(
            "got {} texts but {} labels",
            texts, labels
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_match_variants() {
        assert_eq!(
            PolarityError::UnknownModelType("svm".into()).kind(),
            ErrorKind::UnknownModelType
        );
        assert_eq!(
            PolarityError::NotFound(PathBuf::from("/tmp/x")).kind(),
            ErrorKind::NotFound
        );
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk");
        assert_eq!(PolarityError::from(io).kind(), ErrorKind::Internal);
    }

    #[test]
    fn training_failure_wraps_backend_errors_only() {
        let wrapped = PolarityError::Backend("nan loss".into()).into_training_failure();
        assert_eq!(wrapped.kind(), ErrorKind::TrainingFailed);
        assert!(wrapped.to_string().contains("nan loss"));

        let kept = PolarityError::Validation("empty".into()).into_training_failure();
        assert_eq!(kept.kind(), ErrorKind::ValidationError);
    }

    #[test]
    fn report_carries_kind_and_message() {
        let report = PolarityError::NotTrained("lstm".into()).report();
        assert_eq!(report.kind, ErrorKind::NotTrained);
        assert_eq!(report.to_string(), "NotTrained: model 'lstm' has not been trained or loaded");
    }

    #[test]
    fn ensure_same_len_rejects_mismatch() {
        assert!(ensure_same_len(3, 3).is_ok());
        assert!(matches!(ensure_same_len(3, 2), Err(PolarityError::Validation(_))));
    }
}
