//! Sliding-window token chunker.
//!
//! Splits a [`Document`] into overlapping [`Chunk`]s of at most
//! `chunk_size` tokens. Consecutive windows start `chunk_size - overlap`
//! tokens apart, so neighbouring chunks share `overlap` tokens.
//!
//! Each chunk receives a deterministic UUID derived from its document ID
//! and sequence index, so re-chunking the same document yields identical
//! chunks.
//!
//! # Algorithm
//!
//! 1. Tokenize the text into whitespace-delimited words, keeping byte spans.
//! 2. Emit the window `[start, min(start + chunk_size, n))`.
//! 3. Stop once a window reaches the final token; otherwise advance
//!    `start` by the stride and repeat.
//! 4. The final window may be shorter than `chunk_size`; nothing is padded.
//!
//! A document with no tokens produces no chunks.
//!
//! # Example
//!
//! ```rust
//! use docqa_core::chunk::chunk_document;
//! use docqa_core::models::{ChunkingParams, Document};
//!
//! let doc = Document {
//!     id: "notes.md".into(),
//!     source_path: "docs/notes.md".into(),
//!     raw_text: "one two three four five".into(),
//!     modified_time: 0,
//!     content_hash: String::new(),
//! };
//! let chunks = chunk_document(&doc, ChunkingParams::new(3, 1).unwrap());
//! assert_eq!(chunks.len(), 2);
//! assert_eq!(chunks[0].text, "one two three");
//! assert_eq!(chunks[1].text, "three four five");
//! ```

use uuid::Uuid;

use crate::models::{Chunk, ChunkingParams, Document};

/// Byte spans `[start, end)` of every whitespace-delimited token in `text`.
///
/// This is the unit `chunk_size` is measured in.
pub fn token_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start: Option<usize> = None;

    for (i, c) in text.char_indices() {
        if c.is_whitespace() {
            if let Some(s) = start.take() {
                spans.push((s, i));
            }
        } else if start.is_none() {
            start = Some(i);
        }
    }
    if let Some(s) = start {
        spans.push((s, text.len()));
    }

    spans
}

/// Split a document into overlapping token windows.
///
/// # Guarantees
///
/// - Empty (or whitespace-only) documents yield an empty vector.
/// - Documents of at most `chunk_size` tokens yield exactly one chunk.
/// - The windows cover `[0, total_tokens)` without gaps.
/// - `sequence_index` runs `0, 1, 2, …` and chunk IDs are deterministic.
pub fn chunk_document(document: &Document, params: ChunkingParams) -> Vec<Chunk> {
    let text = document.raw_text.as_str();
    let spans = token_spans(text);
    let total = spans.len();

    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < total {
        let end = (start + params.chunk_size()).min(total);
        let byte_start = spans[start].0;
        let byte_end = spans[end - 1].1;

        chunks.push(make_chunk(
            &document.id,
            chunks.len(),
            &text[byte_start..byte_end],
            start,
            end,
        ));

        if end == total {
            break;
        }
        start += params.stride();
    }

    chunks
}

/// Deterministic chunk ID: UUID v5 over `"{document_id}#{sequence_index}"`.
pub fn chunk_id(document_id: &str, sequence_index: usize) -> String {
    let name = format!("{}#{}", document_id, sequence_index);
    Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes()).to_string()
}

fn make_chunk(
    document_id: &str,
    sequence_index: usize,
    text: &str,
    token_start: usize,
    token_end: usize,
) -> Chunk {
    Chunk {
        id: chunk_id(document_id, sequence_index),
        document_id: document_id.to_string(),
        text: text.to_string(),
        token_start,
        token_end,
        sequence_index,
    }
}
