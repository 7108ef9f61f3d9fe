//! In-memory vector index with k-nearest-neighbour search.
//!
//! A [`VectorIndex`] owns a complete set of [`IndexEntry`] values plus the
//! [`IndexMetadata`] describing how they were built. It is immutable once
//! built: a rebuild produces a new index that replaces the old one, so any
//! number of readers may query it concurrently.
//!
//! # Ranking
//!
//! 1. Score every candidate with [`cosine_similarity`] against the query.
//! 2. Sort by score (desc), then `document_id` (asc), then
//!    `sequence_index` (asc).
//! 3. Truncate to `k`. Asking for more than the index holds returns every
//!    entry, ranked.
//!
//! Candidate selection goes through the [`NeighborSearch`] trait. The
//! default [`LinearScan`] scores every entry, which is fine for hundreds to
//! low thousands of chunks; an approximate strategy can be plugged in with
//! [`VectorIndex::with_strategy`].

use std::cmp::Ordering;
use std::fmt;

use crate::embedding::cosine_similarity;
use crate::error::{Error, Result};
use crate::models::{Chunk, IndexEntry, IndexMetadata};

/// Strategy for selecting the `k` best entries for a query vector.
pub trait NeighborSearch: Send + Sync {
    /// Return `(entry position, cosine score)` pairs for at least the `k`
    /// best-scoring entries (or all entries when fewer exist). The index
    /// applies the final ordering and truncation.
    fn candidates(&self, entries: &[IndexEntry], query: &[f32], k: usize) -> Vec<(usize, f32)>;
}

/// Exhaustive scan over every entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearScan;

impl NeighborSearch for LinearScan {
    fn candidates(&self, entries: &[IndexEntry], query: &[f32], _k: usize) -> Vec<(usize, f32)> {
        entries
            .iter()
            .enumerate()
            .map(|(i, entry)| (i, cosine_similarity(query, &entry.embedding)))
            .collect()
    }
}

pub struct VectorIndex {
    entries: Vec<IndexEntry>,
    metadata: IndexMetadata,
    strategy: Box<dyn NeighborSearch>,
}

impl VectorIndex {
    /// Build an index from a complete set of entries.
    ///
    /// # Errors
    ///
    /// - [`Error::EmptyCorpus`] if `entries` is empty.
    /// - [`Error::DimensionMismatch`] if any embedding's length differs
    ///   from `metadata.dims`.
    pub fn build(entries: Vec<IndexEntry>, metadata: IndexMetadata) -> Result<Self> {
        if entries.is_empty() {
            return Err(Error::EmptyCorpus {
                documents: metadata.document_fingerprints.len(),
            });
        }
        if let Some(bad) = entries.iter().find(|e| e.embedding.len() != metadata.dims) {
            return Err(Error::DimensionMismatch {
                expected: metadata.dims,
                actual: bad.embedding.len(),
            });
        }

        Ok(Self {
            entries,
            metadata,
            strategy: Box::new(LinearScan),
        })
    }

    /// Replace the neighbour-search strategy.
    pub fn with_strategy(mut self, strategy: Box<dyn NeighborSearch>) -> Self {
        self.strategy = strategy;
        self
    }

    /// The `k` entries most similar to `query`, best first.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if `k == 0`.
    /// - [`Error::DimensionMismatch`] if the query length differs from the
    ///   index dimensionality.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(&Chunk, f32)>> {
        if k == 0 {
            return Err(Error::config("retrieval.top_k", "must be >= 1"));
        }
        if query.len() != self.metadata.dims {
            return Err(Error::DimensionMismatch {
                expected: self.metadata.dims,
                actual: query.len(),
            });
        }

        let mut scored: Vec<(&Chunk, f32)> = self
            .strategy
            .candidates(&self.entries, query, k)
            .into_iter()
            .filter_map(|(i, score)| self.entries.get(i).map(|e| (&e.chunk, score)))
            .collect();

        scored.sort_by(|a, b| rank_order(a.0, a.1, b.0, b.1));
        scored.truncate(k);

        Ok(scored)
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn metadata(&self) -> &IndexMetadata {
        &self.metadata
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of distinct documents with at least one entry.
    pub fn document_count(&self) -> usize {
        let mut ids: Vec<&str> = self
            .entries
            .iter()
            .map(|e| e.chunk.document_id.as_str())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids.len()
    }

    /// Source path recorded for a document at build time.
    pub fn source_path(&self, document_id: &str) -> Option<&str> {
        self.metadata
            .source_paths
            .get(document_id)
            .map(String::as_str)
    }
}

impl PartialEq for VectorIndex {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries && self.metadata == other.metadata
    }
}

impl fmt::Debug for VectorIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VectorIndex")
            .field("entries", &self.entries.len())
            .field("metadata", &self.metadata)
            .finish()
    }
}

fn rank_order(a: &Chunk, a_score: f32, b: &Chunk, b_score: f32) -> Ordering {
    b_score
        .total_cmp(&a_score)
        .then_with(|| a.document_id.cmp(&b.document_id))
        .then_with(|| a.sequence_index.cmp(&b.sequence_index))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::chunk::chunk_id;

    fn entry(doc: &str, seq: usize, embedding: Vec<f32>) -> IndexEntry {
        IndexEntry {
            chunk: Chunk {
                id: chunk_id(doc, seq),
                document_id: doc.to_string(),
                text: format!("{} chunk {}", doc, seq),
                token_start: seq * 10,
                token_end: seq * 10 + 10,
                sequence_index: seq,
            },
            embedding,
        }
    }

    fn metadata(dims: usize, docs: &[&str]) -> IndexMetadata {
        IndexMetadata {
            embedding_model_id: "test".to_string(),
            dims,
            chunk_size: 10,
            chunk_overlap: 0,
            built_at: 0,
            document_fingerprints: docs
                .iter()
                .map(|d| (d.to_string(), format!("hash-{}", d)))
                .collect(),
            source_paths: docs
                .iter()
                .map(|d| (d.to_string(), format!("docs/{}", d)))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    fn sample_index() -> VectorIndex {
        let entries = vec![
            entry("a.md", 0, vec![1.0, 0.0, 0.0]),
            entry("a.md", 1, vec![0.7, 0.7, 0.0]),
            entry("b.md", 0, vec![0.0, 1.0, 0.0]),
            entry("c.md", 0, vec![0.0, 0.0, 2.0]),
            entry("c.md", 1, vec![-1.0, 0.0, 0.0]),
        ];
        VectorIndex::build(entries, metadata(3, &["a.md", "b.md", "c.md"])).unwrap()
    }

    #[test]
    fn test_build_empty_is_error() {
        let err = VectorIndex::build(Vec::new(), metadata(3, &["a.md"])).unwrap_err();
        assert!(matches!(err, Error::EmptyCorpus { documents: 1 }));
    }

    #[test]
    fn test_build_rejects_mixed_dims() {
        let entries = vec![entry("a.md", 0, vec![1.0, 0.0]), entry("a.md", 1, vec![1.0])];
        let err = VectorIndex::build(entries, metadata(2, &["a.md"])).unwrap_err();
        assert!(matches!(
            err,
            Error::DimensionMismatch {
                expected: 2,
                actual: 1
            }
        ));
    }

    #[test]
    fn test_scores_non_increasing() {
        let index = sample_index();
        let hits = index.search(&[0.5, 0.4, 0.1], 5).unwrap();
        assert_eq!(hits.len(), 5);
        for pair in hits.windows(2) {
            assert!(pair[0].1 >= pair[1].1, "{} < {}", pair[0].1, pair[1].1);
        }
    }

    #[test]
    fn test_identical_vector_ranks_first_with_score_one() {
        let index = sample_index();
        let hits = index.search(&[0.0, 1.0, 0.0], 2).unwrap();
        assert_eq!(hits[0].0.document_id, "b.md");
        assert!((hits[0].1 - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_unnormalised_stored_vector_still_scores_one() {
        let index = sample_index();
        let hits = index.search(&[0.0, 0.0, 1.0], 1).unwrap();
        assert_eq!(hits[0].0.document_id, "c.md");
        assert!((hits[0].1 - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_ties_broken_by_document_then_sequence() {
        let entries = vec![
            entry("z.md", 0, vec![1.0, 0.0]),
            entry("m.md", 2, vec![1.0, 0.0]),
            entry("m.md", 1, vec![1.0, 0.0]),
            entry("a.md", 5, vec![1.0, 0.0]),
        ];
        let index =
            VectorIndex::build(entries, metadata(2, &["z.md", "m.md", "a.md"])).unwrap();
        let order: Vec<(String, usize)> = index
            .search(&[1.0, 0.0], 4)
            .unwrap()
            .into_iter()
            .map(|(c, _)| (c.document_id.clone(), c.sequence_index))
            .collect();
        assert_eq!(
            order,
            vec![
                ("a.md".to_string(), 5),
                ("m.md".to_string(), 1),
                ("m.md".to_string(), 2),
                ("z.md".to_string(), 0),
            ]
        );
    }

    #[test]
    fn test_k_larger_than_index_returns_all() {
        let index = sample_index();
        let hits = index.search(&[1.0, 0.0, 0.0], 100).unwrap();
        assert_eq!(hits.len(), index.len());
        assert_eq!(hits[0].0.document_id, "a.md");
        assert_eq!(hits.last().unwrap().0.document_id, "c.md");
        assert_eq!(hits.last().unwrap().0.sequence_index, 1);
    }

    #[test]
    fn test_k_zero_is_config_error() {
        let index = sample_index();
        assert!(matches!(
            index.search(&[1.0, 0.0, 0.0], 0),
            Err(Error::Config { field: "retrieval.top_k", .. })
        ));
    }

    #[test]
    fn test_query_dims_checked() {
        let index = sample_index();
        assert!(matches!(
            index.search(&[1.0, 0.0], 1),
            Err(Error::DimensionMismatch {
                expected: 3,
                actual: 2
            })
        ));
    }

    #[test]
    fn test_document_count_and_source_path() {
        let index = sample_index();
        assert_eq!(index.document_count(), 3);
        assert_eq!(index.source_path("b.md"), Some("docs/b.md"));
        assert_eq!(index.source_path("missing.md"), None);
    }

    struct FirstOnly;

    impl NeighborSearch for FirstOnly {
        fn candidates(&self, entries: &[IndexEntry], query: &[f32], _k: usize) -> Vec<(usize, f32)> {
            entries
                .first()
                .map(|e| vec![(0, cosine_similarity(query, &e.embedding))])
                .unwrap_or_default()
        }
    }

    #[test]
    fn test_custom_strategy_is_used() {
        let index = sample_index().with_strategy(Box::new(FirstOnly));
        let hits = index.search(&[0.0, 1.0, 0.0], 3).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.document_id, "a.md");
        assert_eq!(hits[0].0.sequence_index, 0);
    }
}
