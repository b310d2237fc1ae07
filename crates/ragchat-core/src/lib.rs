//! # ragchat core
//!
//! Runtime-agnostic logic for ragchat: data models, chunking, capability
//! traits for embedding, generation and re-ranking, index abstractions,
//! reciprocal-rank fusion, conversation memory, prompt assembly, and the
//! two orchestrated operations (index build and chat turn).
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem I/O. Concrete
//! providers and the SQLite-backed indexes live in the `ragchat` app crate.
//!
//! ```text
//! build:  Document ─▶ chunk ─▶ embed (batched) ─▶ VectorIndex (+ LexicalIndex)
//! turn:   query ─▶ memory.read ─▶ retrieve (vector | hybrid+RRF) ─▶ rerank
//!               ─▶ prompt (budgeted) ─▶ generate ─▶ memory.append
//! ```

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod fusion;
pub mod generation;
pub mod memory;
pub mod models;
pub mod pipeline;
pub mod prompt;
pub mod rerank;
pub mod retrieve;
pub mod store;
pub mod text;

pub use error::{ProviderError, RagError};
