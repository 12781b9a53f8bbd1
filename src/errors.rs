// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types surfaced by the deduplication engine.

use std::path::PathBuf;
use thiserror::Error;

/// Errors returned by [`crate::engine::DedupEngine`].
///
/// Only [`DedupError::ProviderFailure`] is expected at runtime once inputs are
/// valid. Corrupt cache entries never show up here; they are rebuilt.
#[derive(Debug, Error)]
pub enum DedupError {
    /// Rejected before any computation (empty query, empty section name, missing file).
    #[error("invalid input: {0}")]
    InputValidation(String),

    /// Target document resolves outside the permitted workspace root.
    #[error("path outside workspace not allowed: {}", .0.display())]
    OutsideWorkspace(PathBuf),

    /// The embedding provider failed or broke its contract. Never retried.
    #[error("embedding provider failed: {0}")]
    ProviderFailure(String),

    #[error(transparent)]
    Similarity(#[from] SimilarityError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl DedupError {
    /// Wraps an `anyhow` error from a provider, keeping the full context chain.
    pub fn provider(err: anyhow::Error) -> Self {
        DedupError::ProviderFailure(format!("{:#}", err))
    }
}

/// Cosine similarity is undefined for these inputs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SimilarityError {
    #[error("cannot compare empty vectors")]
    Empty,

    #[error("vector dimension mismatch: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },

    #[error("cosine similarity is undefined for a zero vector")]
    ZeroVector,

    #[error("vector contains a non-finite component")]
    NonFinite,
}

pub type DedupResult<T> = std::result::Result<T, DedupError>;
