//! In-memory similarity index over chunk embeddings and its on-disk form.

mod persist;
mod store;

use std::path::PathBuf;

use crate::embedding::EmbeddingClientError;
use thiserror::Error;

pub use persist::{DOCSTORE_FILE, INDEX_FILE, reap_expired, spawn_reaper};
pub use store::{ScoredChunk, SimilarityIndex};

/// Errors raised while building, querying, or persisting an index.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Embedding provider failed while vectorizing chunks.
    #[error(transparent)]
    Embedding(#[from] EmbeddingClientError),
    /// A vector's length differs from the index dimension.
    #[error("vector dimension {actual} does not match index dimension {expected}")]
    DimensionMismatch {
        /// Dimension of the index.
        expected: usize,
        /// Dimension of the offending vector.
        actual: usize,
    },
    /// Provider returned a different number of vectors than chunks.
    #[error("expected {expected} vectors, received {actual}")]
    CountMismatch {
        /// Number of chunks submitted.
        expected: usize,
        /// Number of vectors returned.
        actual: usize,
    },
    /// Persisted index directory does not exist.
    #[error("Index not found at: {}", .0.display())]
    NotFound(PathBuf),
    /// Persisted index was built with another embedding model.
    #[error("index was built with embedding model {found}, expected {expected}")]
    ModelMismatch {
        /// Model requested by the caller.
        expected: String,
        /// Model recorded in the index.
        found: String,
    },
    /// Persisted files are inconsistent or truncated.
    #[error("index data is corrupt: {0}")]
    Corrupt(String),
    /// Filesystem access failed.
    #[error("index file access failed: {0}")]
    Io(#[from] std::io::Error),
    /// Document store could not be (de)serialized.
    #[error("index metadata is invalid: {0}")]
    Serialization(#[from] serde_json::Error),
}
