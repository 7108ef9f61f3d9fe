//! Embedding capability trait and vector utilities.
//!
//! Defines the [`Embedder`] trait that all embedding backends implement,
//! the deterministic offline [`HashEmbedder`], and pure helper functions
//! for vector serialization and similarity computation.
//!
//! Network and model-backed embedders (OpenAI, Ollama, fastembed) live in
//! the `docqa` app crate and are selected from configuration at startup.
//!
//! # Blank and malformed input
//!
//! Every implementation follows the same input contract:
//! - A text that is empty after trimming embeds to the all-zero vector of
//!   [`Embedder::dims`] length. Its cosine similarity with anything is `0.0`.
//! - A text containing a NUL character is malformed and fails with
//!   [`Error::Embedding`].

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::models::Embedding;

/// A swappable embedding capability.
///
/// `embed` returns one vector per input, in input order. Implementations
/// may batch internally, but the vector for a text never depends on which
/// other texts share its batch. Repeated calls with the same text and
/// configuration return identical vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Identifier recorded in index metadata (e.g. `"openai:text-embedding-3-small"`).
    fn model_id(&self) -> &str;
    /// Output dimensionality (e.g. `384`).
    fn dims(&self) -> usize;
    /// Embed a batch of texts.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>>;
}

/// Reject input no backend can embed faithfully.
pub fn validate_text(index: usize, text: &str) -> Result<()> {
    if text.contains('\0') {
        return Err(Error::Embedding {
            reason: format!("input text #{} contains a NUL character", index),
            transient: false,
        });
    }
    Ok(())
}

/// Whether `text` takes the zero-vector sentinel path.
pub fn is_blank(text: &str) -> bool {
    text.trim().is_empty()
}

/// The sentinel vector for blank input.
pub fn zero_vector(dims: usize) -> Embedding {
    vec![0.0; dims]
}

/// Default dimensionality of the hash embedder.
pub const HASH_EMBEDDER_DIMS: usize = 384;

/// Deterministic, offline feature-hashing embedder.
///
/// Each lowercased alphanumeric token is hashed with SHA-256; the first
/// eight digest bytes pick a bucket and the ninth byte picks a sign. The
/// bucket counts are L2-normalised. Texts sharing vocabulary score high
/// under cosine similarity, which is enough for lexical retrieval with no
/// model download.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    model_id: String,
    dims: usize,
}

impl HashEmbedder {
    pub fn new(model: &str, dims: usize) -> Result<Self> {
        if dims == 0 {
            return Err(Error::config("embedding.dims", "must be > 0"));
        }
        Ok(Self {
            model_id: format!("hash:{}", model),
            dims,
        })
    }

    /// Embed one text synchronously.
    pub fn embed_one(&self, text: &str) -> Embedding {
        let mut vector = zero_vector(self.dims);
        for token in hash_tokens(text) {
            let digest = Sha256::digest(token.as_bytes());
            let mut bucket_bytes = [0u8; 8];
            bucket_bytes.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(bucket_bytes) % self.dims as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        normalize_l2(vector)
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        texts
            .iter()
            .enumerate()
            .map(|(i, text)| {
                validate_text(i, text)?;
                Ok(self.embed_one(text))
            })
            .collect()
    }
}

fn hash_tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

/// Scale a vector to unit length. Zero vectors are returned unchanged.
pub fn normalize_l2(mut v: Vec<f32>) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 1e-9 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// Each `f32` is stored as 4 bytes in little-endian order, producing
/// a BLOB of `vec.len() × 4` bytes.
///
/// # Example
///
/// ```rust
/// use docqa_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12); // 3 × 4 bytes
/// assert_eq!(blob_to_vec(&blob), Some(v));
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
///
/// Reverses [`vec_to_blob`]. Returns `None` when the length is not a
/// multiple of 4.
pub fn blob_to_vec(blob: &[u8]) -> Option<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return None;
    }
    Some(
        blob.chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect(),
    )
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`:
/// - `1.0` = identical direction
/// - `0.0` = orthogonal (unrelated)
/// - `-1.0` = opposite direction
///
/// Stored vectors are not assumed to be normalised. Returns `0.0` for
/// empty vectors, vectors of different lengths, or zero vectors.
///
/// # Formula
///
/// ```text
///            a · b
/// cos(θ) = ─────────
///          ‖a‖ × ‖b‖
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    (dot / denom).clamp(-1.0, 1.0)
}
