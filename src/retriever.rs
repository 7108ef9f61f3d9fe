//! Build, load, and query the vector index.
//!
//! A [`Retriever`] ties together document discovery, chunking, the
//! configured [`Embedder`], and persistence. It owns no index: callers get a
//! [`VectorIndex`] from [`Retriever::load_or_build`] and pass it by
//! reference to [`Retriever::retrieve`], which never mutates it.
//!
//! # Load-or-build decision
//!
//! ```text
//! force_rebuild ──────────────────────────────▶ build
//! load ─▶ IndexNotFound ──────────────────────▶ build
//!      ─▶ CorruptIndex ─▶ discard ────────────▶ build
//!      ─▶ ok ─▶ stale? (fingerprints, config) ─▶ build
//!                     └─ fresh ───────────────▶ use as is
//! ```

use serde::Serialize;
use std::path::{Path, PathBuf};

use docqa_core::chunk::chunk_document;
use docqa_core::embedding::{is_blank, Embedder};
use docqa_core::index::VectorIndex;
use docqa_core::models::{
    ChunkingParams, Document, IndexEntry, IndexMetadata, IndexSettings, RetrievalResult,
};
use docqa_core::{Error, Result};

use crate::config::Config;
use crate::connector_fs::{fingerprints, scan_documents, ScanOptions};
use crate::embedding::create_embedder;
use crate::store;

pub struct Retriever {
    embedder: Box<dyn Embedder>,
    chunking: ChunkingParams,
    index_path: PathBuf,
    scan: ScanOptions,
}

/// What [`Retriever::status`] found on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexState {
    Missing,
    Corrupt,
    Fresh,
    Stale,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexStatus {
    pub path: PathBuf,
    pub state: IndexState,
    /// Why a persisted index could not be read.
    pub reason: Option<String>,
    pub entries: usize,
    pub documents: usize,
    pub metadata: Option<IndexMetadata>,
}

impl Retriever {
    pub fn new(
        embedder: Box<dyn Embedder>,
        chunking: ChunkingParams,
        storage_dir: &Path,
        scan: ScanOptions,
    ) -> Self {
        Self {
            embedder,
            chunking,
            index_path: store::index_path(storage_dir),
            scan,
        }
    }

    /// Construct the embedder and retriever described by `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        Ok(Self::new(
            embedder,
            config.chunking.params()?,
            &config.storage.dir,
            ScanOptions::from_config(&config.documents),
        ))
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    /// The configuration a persisted index must match to be reused.
    pub fn settings(&self) -> IndexSettings {
        IndexSettings::new(self.embedder.model_id(), self.chunking)
    }

    /// Scan, chunk, embed, and persist a complete new index.
    ///
    /// # Errors
    ///
    /// [`Error::NoDocumentsFound`] if the document directory is missing or
    /// holds no eligible file with at least one token. Embedding and
    /// storage failures propagate.
    pub async fn build_index(&self) -> Result<VectorIndex> {
        let documents = scan_documents(&self.scan)?;
        self.build_from(documents).await
    }

    /// Load the persisted index, rebuilding when it is missing, corrupt, or
    /// stale, or when `force_rebuild` is set.
    pub async fn load_or_build(&self, force_rebuild: bool) -> Result<VectorIndex> {
        if force_rebuild {
            tracing::info!("rebuild requested");
            return self.build_index().await;
        }

        let index = match store::load(&self.index_path, self.embedder.dims()).await {
            Ok(index) => index,
            Err(Error::IndexNotFound { path }) => {
                tracing::info!(path = %path.display(), "no persisted index; building");
                return self.build_index().await;
            }
            Err(Error::CorruptIndex { path, reason }) => {
                tracing::warn!(
                    path = %path.display(),
                    reason = %reason,
                    "persisted index is corrupt; discarding and rebuilding"
                );
                store::discard(&path)?;
                return self.build_index().await;
            }
            Err(e) => return Err(e),
        };

        let documents = scan_documents(&self.scan)?;
        if index
            .metadata()
            .is_stale(&fingerprints(&documents), &self.settings())
        {
            tracing::info!(
                path = %self.index_path.display(),
                "persisted index is stale; rebuilding"
            );
            return self.build_from(documents).await;
        }

        tracing::info!(
            path = %self.index_path.display(),
            entries = index.len(),
            "using persisted index"
        );
        Ok(index)
    }

    /// The `top_k` chunks most relevant to `question`, best first.
    ///
    /// A blank question matches nothing and returns no results.
    pub async fn retrieve(
        &self,
        question: &str,
        index: &VectorIndex,
        top_k: usize,
    ) -> Result<Vec<RetrievalResult>> {
        if top_k == 0 {
            return Err(Error::config("retrieval.top_k", "must be >= 1"));
        }
        if is_blank(question) {
            tracing::debug!("blank question; nothing to retrieve");
            return Ok(Vec::new());
        }

        let query = self
            .embedder
            .embed(&[question.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Embedding {
                reason: "embedder returned no vector for the question".to_string(),
                transient: false,
            })?;

        let hits = index.search(&query, top_k)?;
        Ok(hits
            .into_iter()
            .map(|(chunk, score)| RetrievalResult {
                source_path: index
                    .source_path(&chunk.document_id)
                    .unwrap_or(chunk.document_id.as_str())
                    .to_string(),
                chunk: chunk.clone(),
                score,
            })
            .collect())
    }

    /// Describe the persisted index without building anything.
    pub async fn status(&self) -> Result<IndexStatus> {
        let mut status = IndexStatus {
            path: self.index_path.clone(),
            state: IndexState::Missing,
            reason: None,
            entries: 0,
            documents: 0,
            metadata: None,
        };

        let index = match store::load(&self.index_path, self.embedder.dims()).await {
            Ok(index) => index,
            Err(Error::IndexNotFound { .. }) => return Ok(status),
            Err(Error::CorruptIndex { reason, .. }) => {
                status.state = IndexState::Corrupt;
                status.reason = Some(reason);
                return Ok(status);
            }
            Err(e) => return Err(e),
        };

        let stale = match scan_documents(&self.scan) {
            Ok(documents) => index
                .metadata()
                .is_stale(&fingerprints(&documents), &self.settings()),
            Err(Error::NoDocumentsFound { .. }) => true,
            Err(e) => return Err(e),
        };

        status.state = if stale {
            IndexState::Stale
        } else {
            IndexState::Fresh
        };
        status.entries = index.len();
        status.documents = index.document_count();
        status.metadata = Some(index.metadata().clone());
        Ok(status)
    }

    async fn build_from(&self, documents: Vec<Document>) -> Result<VectorIndex> {
        let document_fingerprints = fingerprints(&documents);
        let source_paths = documents
            .iter()
            .map(|d| (d.id.clone(), d.source_path.clone()))
            .collect();

        let mut chunks = Vec::new();
        let mut indexed_documents = 0usize;
        for document in &documents {
            let doc_chunks = chunk_document(document, self.chunking);
            if doc_chunks.is_empty() {
                tracing::warn!(document = %document.id, "document has no text; skipping");
                continue;
            }
            indexed_documents += 1;
            chunks.extend(doc_chunks);
        }

        if indexed_documents == 0 {
            return Err(Error::NoDocumentsFound {
                dir: self.scan.dir.clone(),
            });
        }

        tracing::info!(
            documents = indexed_documents,
            chunks = chunks.len(),
            model = %self.embedder.model_id(),
            "embedding chunks"
        );

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = self.embedder.embed(&texts).await?;
        if embeddings.len() != chunks.len() {
            return Err(Error::Embedding {
                reason: format!(
                    "embedder returned {} vectors for {} chunks",
                    embeddings.len(),
                    chunks.len()
                ),
                transient: false,
            });
        }

        let entries: Vec<IndexEntry> = chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| IndexEntry { chunk, embedding })
            .collect();

        let metadata = IndexMetadata {
            embedding_model_id: self.embedder.model_id().to_string(),
            dims: self.embedder.dims(),
            chunk_size: self.chunking.chunk_size(),
            chunk_overlap: self.chunking.chunk_overlap(),
            built_at: chrono::Utc::now().timestamp(),
            document_fingerprints,
            source_paths,
        };

        let index = VectorIndex::build(entries, metadata)?;
        store::save(&index, &self.index_path).await?;

        tracing::info!(
            path = %self.index_path.display(),
            entries = index.len(),
            "index built"
        );
        Ok(index)
    }
}
