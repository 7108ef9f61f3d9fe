//! Core data models used throughout docqa.
//!
//! Documents and chunks are transient: they are rebuilt from source files on
//! every index build. [`IndexEntry`] values and [`IndexMetadata`] are what
//! gets persisted.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A dense vector produced by an [`Embedder`](crate::embedding::Embedder).
pub type Embedding = Vec<f32>;

/// A source file loaded at scan time. Identity is the source path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Path relative to the document directory, `/`-separated.
    pub id: String,
    /// Path as it was read from disk.
    pub source_path: String,
    pub raw_text: String,
    /// Unix seconds. Informational only; staleness uses content hashes.
    pub modified_time: i64,
    /// SHA-256 of the raw file bytes, hex encoded.
    pub content_hash: String,
}

/// A contiguous token window of a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub text: String,
    /// First token of the window (inclusive).
    pub token_start: usize,
    /// One past the last token of the window.
    pub token_end: usize,
    pub sequence_index: usize,
}

/// The unit stored in a [`VectorIndex`](crate::index::VectorIndex).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub chunk: Chunk,
    pub embedding: Embedding,
}

/// Validated chunk window parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingParams {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl ChunkingParams {
    /// Requires `chunk_size > chunk_overlap`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::config("chunking.chunk_size", "must be > 0"));
        }
        if chunk_overlap >= chunk_size {
            return Err(Error::config(
                "chunking.chunk_overlap",
                format!(
                    "must be smaller than chunk_size ({} >= {})",
                    chunk_overlap, chunk_size
                ),
            ));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Distance between the starts of consecutive windows.
    pub fn stride(&self) -> usize {
        self.chunk_size - self.chunk_overlap
    }
}

/// The configuration a persisted index must match to be reused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSettings {
    pub embedding_model_id: String,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl IndexSettings {
    pub fn new(embedding_model_id: impl Into<String>, chunking: ChunkingParams) -> Self {
        Self {
            embedding_model_id: embedding_model_id.into(),
            chunk_size: chunking.chunk_size(),
            chunk_overlap: chunking.chunk_overlap(),
        }
    }
}

/// Describes how an index was built and from which corpus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub embedding_model_id: String,
    pub dims: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    /// Unix seconds.
    pub built_at: i64,
    /// Document id -> SHA-256 of the document's raw bytes.
    pub document_fingerprints: BTreeMap<String, String>,
    /// Document id -> source path at build time, for attribution.
    pub source_paths: BTreeMap<String, String>,
}

impl IndexMetadata {
    /// True when the corpus or configuration no longer matches this index.
    ///
    /// Any added, removed, or content-modified document is a mismatch, as is
    /// a change of chunk size, overlap, or embedding model. Modification
    /// times are never consulted.
    pub fn is_stale(
        &self,
        current_fingerprints: &BTreeMap<String, String>,
        current: &IndexSettings,
    ) -> bool {
        self.settings() != *current || &self.document_fingerprints != current_fingerprints
    }

    /// The configuration this index was built with.
    pub fn settings(&self) -> IndexSettings {
        IndexSettings {
            embedding_model_id: self.embedding_model_id.clone(),
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
        }
    }
}

/// A ranked chunk with attribution, as returned to the answer generator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalResult {
    pub chunk: Chunk,
    pub score: f32,
    pub source_path: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> IndexMetadata {
        let mut fingerprints = BTreeMap::new();
        fingerprints.insert("auth.md".to_string(), "aaa".to_string());
        fingerprints.insert("limits.md".to_string(), "bbb".to_string());
        IndexMetadata {
            embedding_model_id: "hash:feature-hash-v1".to_string(),
            dims: 384,
            chunk_size: 512,
            chunk_overlap: 50,
            built_at: 0,
            document_fingerprints: fingerprints,
            source_paths: BTreeMap::new(),
        }
    }

    #[test]
    fn test_chunking_params_validation() {
        assert!(ChunkingParams::new(512, 50).is_ok());
        assert!(ChunkingParams::new(1, 0).is_ok());
        assert!(matches!(
            ChunkingParams::new(0, 0),
            Err(Error::Config { field: "chunking.chunk_size", .. })
        ));
        assert!(matches!(
            ChunkingParams::new(50, 50),
            Err(Error::Config { field: "chunking.chunk_overlap", .. })
        ));
        assert!(ChunkingParams::new(10, 20).is_err());
        assert_eq!(ChunkingParams::new(512, 50).unwrap().stride(), 462);
    }

    #[test]
    fn test_fresh_when_everything_matches() {
        let meta = metadata();
        let settings = meta.settings();
        assert!(!meta.is_stale(&meta.document_fingerprints.clone(), &settings));
    }

    #[test]
    fn test_stale_on_corpus_changes() {
        let meta = metadata();
        let settings = meta.settings();

        let mut modified = meta.document_fingerprints.clone();
        modified.insert("auth.md".to_string(), "changed".to_string());
        assert!(meta.is_stale(&modified, &settings));

        let mut added = meta.document_fingerprints.clone();
        added.insert("new.md".to_string(), "ccc".to_string());
        assert!(meta.is_stale(&added, &settings));

        let mut removed = meta.document_fingerprints.clone();
        removed.remove("limits.md");
        assert!(meta.is_stale(&removed, &settings));
    }

    #[test]
    fn test_stale_on_config_changes() {
        let meta = metadata();
        let fingerprints = meta.document_fingerprints.clone();

        let mut settings = meta.settings();
        settings.chunk_size = 256;
        assert!(meta.is_stale(&fingerprints, &settings));

        let mut settings = meta.settings();
        settings.chunk_overlap = 0;
        assert!(meta.is_stale(&fingerprints, &settings));

        let mut settings = meta.settings();
        settings.embedding_model_id = "local:all-minilm-l6-v2".to_string();
        assert!(meta.is_stale(&fingerprints, &settings));
    }
}
