//! Error taxonomy for the retrieval pipeline.
//!
//! Every variant carries the path, document, or config field needed to act
//! on it. Callers decide recovery by variant: [`Error::CorruptIndex`] and
//! [`Error::IndexNotFound`] trigger a rebuild, transient embedding failures
//! (see [`Error::is_transient`]) are retried, everything else is fatal.

use std::path::PathBuf;

/// Result alias used across docqa.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid chunking, retrieval, or provider settings.
    #[error("invalid configuration for `{field}`: {reason}")]
    Config { field: &'static str, reason: String },

    #[error(
        "no eligible documents (.md/.txt with text) found in {}; add documents to this directory and retry",
        dir.display()
    )]
    NoDocumentsFound { dir: PathBuf },

    #[error("embedding failed: {reason}")]
    Embedding { reason: String, transient: bool },

    #[error("embedding model `{model}` is unavailable: {reason}")]
    ModelUnavailable { model: String, reason: String },

    #[error("persisted index at {} is corrupt: {reason}", path.display())]
    CorruptIndex { path: PathBuf, reason: String },

    #[error("no persisted index at {}", path.display())]
    IndexNotFound { path: PathBuf },

    /// Build was handed zero entries although documents were found. This
    /// indicates a chunking bug and must surface.
    #[error("index build received zero entries from {documents} document(s)")]
    EmptyCorpus { documents: usize },

    #[error("embedding dimensionality mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("index storage error: {0}")]
    Storage(String),
}

impl Error {
    pub fn config(field: &'static str, reason: impl Into<String>) -> Self {
        Error::Config {
            field,
            reason: reason.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::ModelUnavailable { .. } => true,
            Error::Embedding { transient, .. } => *transient,
            _ => false,
        }
    }
}
