//! Error taxonomy for the ingestion and query paths.
//!
//! Every per-file error is scoped to that file: the pipeline records it on the
//! file's [`FileRecord`](crate::models::FileRecord) and moves on. Only
//! [`IndexError`] is surfaced to callers as a hard failure, because an index
//! write that did not commit must never look like a success.

use thiserror::Error;

use crate::models::Modality;

/// Content extraction errors.
#[derive(Error, Debug)]
pub enum ExtractError {
    /// The file type has no extraction strategy. The file is tracked with
    /// zero index entries.
    #[error("unsupported file type: {0}")]
    UnsupportedType(String),

    /// The file is corrupt, truncated, or otherwise unreadable as its type.
    #[error("extraction failed: {0}")]
    Extraction(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Embedding provider errors.
#[derive(Error, Debug, Clone)]
pub enum EmbedError {
    /// The model behind a modality could not be initialized. Every call for
    /// that modality fails the same way for the life of the process.
    #[error("model unavailable for {modality}: {reason}")]
    ModelUnavailable { modality: Modality, reason: String },

    /// Inference failed for one input.
    #[error("embedding failed: {0}")]
    Embedding(String),
}

impl EmbedError {
    pub fn is_model_unavailable(&self) -> bool {
        matches!(self, EmbedError::ModelUnavailable { .. })
    }
}

/// Vector index errors.
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("index io error: {0}")]
    Io(#[from] sqlx::Error),

    #[error("index serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("vector dimension mismatch for {modality}: expected {expected}, got {actual}")]
    Dimension {
        modality: Modality,
        expected: usize,
        actual: usize,
    },
}

/// Intent parser errors. Always non-fatal for search.
#[derive(Error, Debug)]
pub enum IntentError {
    #[error("intent parser unavailable: {0}")]
    Unavailable(String),

    #[error("malformed intent response: {0}")]
    Malformed(String),
}

/// Top-level error for pipeline and facade operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Embed(#[from] EmbedError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Intent(#[from] IntentError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("watcher error: {0}")]
    Watch(String),

    #[error("path is outside the watch root: {0}")]
    OutsideRoot(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_type_display() {
        let err = ExtractError::UnsupportedType("mp4".to_string());
        assert_eq!(err.to_string(), "unsupported file type: mp4");
    }

    #[test]
    fn model_unavailable_names_modality() {
        let err = EmbedError::ModelUnavailable {
            modality: Modality::Image,
            reason: "weights missing".to_string(),
        };
        assert!(err.is_model_unavailable());
        assert_eq!(
            err.to_string(),
            "model unavailable for image: weights missing"
        );
    }

    #[test]
    fn index_error_converts_into_top_level() {
        let err: Error = IndexError::Dimension {
            modality: Modality::Text,
            expected: 384,
            actual: 12,
        }
        .into();
        assert!(matches!(err, Error::Index(_)));
        assert!(err.to_string().contains("expected 384"));
    }
}
