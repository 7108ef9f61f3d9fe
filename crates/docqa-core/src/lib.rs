//! # docqa core
//!
//! Pure retrieval logic for docqa: data models, token-window chunking, the
//! embedding capability trait, the in-memory vector index with staleness
//! checks, and the error taxonomy shared by every layer.
//!
//! This crate performs no filesystem, database, or network I/O. Discovery,
//! persistence, and concrete embedding backends live in the `docqa` app
//! crate.
//!
//! ```text
//! Document ─▶ chunk ─▶ Chunk ─▶ Embedder ─▶ IndexEntry ─▶ VectorIndex
//!                                   ▲                         │
//!                         question ─┘                         ▼
//!                                                     ranked (Chunk, score)
//! ```

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod index;
pub mod models;

pub use error::{Error, Result};
