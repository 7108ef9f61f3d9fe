//! # docqa
//!
//! Retrieval-augmented question answering over a local documentation folder.
//!
//! docqa scans a directory of `.md`/`.txt` files, splits them into
//! overlapping token windows, embeds every window, and persists the result
//! as a vector index. A question is embedded the same way, matched against
//! the index by cosine similarity, and the best passages are handed to an
//! answer generator.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────────┐   ┌───────────────┐
//! │  docs/    │──▶│ Chunk+Embed  │──▶│ index.sqlite  │
//! │ .md .txt  │   │  (Retriever) │   │ (atomic swap) │
//! └───────────┘   └──────────────┘   └───────┬───────┘
//!                                            │ load / stale check
//!                                            ▼
//!                 question ──▶ embed ──▶ VectorIndex::search ──▶ AnswerGenerator
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docqa query "How do I authenticate?"
//! docqa query "What is the API rate limit?" --verbose
//! docqa rebuild
//! docqa status
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`connector_fs`] | Document discovery and content fingerprints |
//! | [`embedding`] | Embedding providers (hash, OpenAI, Ollama, fastembed) |
//! | [`store`] | Index persistence |
//! | [`retriever`] | Build, load-or-build, retrieve, status |
//! | [`answer`] | Answer generators |
//! | [`query`] | The `query` command |
//! | [`index_cmd`] | The `rebuild` and `status` commands |
//!
//! Pure logic (chunking, the vector index, the error taxonomy) lives in the
//! `docqa-core` crate.

pub mod answer;
pub mod config;
pub mod connector_fs;
pub mod db;
pub mod embedding;
pub mod index_cmd;
pub mod query;
pub mod retriever;
pub mod store;
