//! Centralized error types for the rollout engine.
//!
//! Uses thiserror for ergonomic error handling with context.

use thiserror::Error;

/// Main error type for sampling and rollout operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum OrganError {
    /// Invalid configuration detected before any model call.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Token id outside the vocabulary range (data corruption, never mapped to unknown).
    #[error("Unknown token id {id} (vocabulary size {vocab_size})")]
    UnknownTokenId { id: u32, vocab_size: usize },

    /// Persisted vocabulary is malformed.
    #[error("Invalid vocabulary: {0}")]
    InvalidVocabulary(String),

    /// Row-aligned structures diverged.
    #[error("Shape mismatch in {context}: expected {expected} rows, got {actual}")]
    ShapeMismatch {
        context: &'static str,
        expected: usize,
        actual: usize,
    },

    /// The model produced a distribution that cannot be sampled.
    #[error("Unusable next-token distribution for row {row}")]
    InvalidDistribution { row: usize },

    /// Corpus file is malformed.
    #[error("Corpus error: {0}")]
    Corpus(String),

    /// IO error wrapper.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML deserialization error.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Candle tensor library error.
    #[error("Candle error: {0}")]
    Candle(#[from] candle_core::Error),

    /// Failure reported by an external collaborator (metric scorer), passed through as is.
    #[error(transparent)]
    External(#[from] anyhow::Error),
}

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, OrganError>;

impl OrganError {
    /// Configuration errors are raised eagerly, before any model invocation.
    pub fn is_config_error(&self) -> bool {
        matches!(self, OrganError::InvalidConfig(_))
    }

    /// Errors that indicate corrupted row bookkeeping or ids.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            OrganError::UnknownTokenId { .. } | OrganError::ShapeMismatch { .. }
        )
    }
}
