//! # ragchat
//!
//! A provider-agnostic retrieval-augmented chat pipeline over local
//! documents and web pages.
//!
//! The pipeline itself (chunking, retrieval with reciprocal-rank fusion,
//! re-ranking, conversation memory, prompt assembly) lives in
//! [`ragchat_core`]. This crate supplies the native pieces around it:
//! configuration, the SQLite-backed indexes, HTTP provider adapters, the
//! document loader, and the CLI commands.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌────────────┐
//! │   Loader    │──▶│ IndexBuilder │──▶│   SQLite   │
//! │ files/URLs  │   │ chunk+embed  │   │ FTS5 + Vec │
//! └─────────────┘   └──────────────┘   └─────┬──────┘
//!                                            │
//!                     ┌──────────────────────┘
//!                     ▼
//!              ┌──────────────┐   ┌────────────┐
//!              │ ChatPipeline │──▶│ Generation │
//!              │ retrieve+RRF │   │  provider  │
//!              └──────────────┘   └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! ragchat init                       # create database
//! ragchat build                      # load, chunk, embed, index
//! ragchat search "deployment" --mode hybrid
//! ragchat chat                       # interactive session
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`loader`] | Filesystem and URL document loading |
//! | [`extract`] | PDF and DOCX text extraction |
//! | [`embedding`] | OpenAI, Ollama, and Gemini embedders |
//! | [`generation`] | OpenAI, Ollama, and Gemini chat generation |
//! | [`rerank`] | Re-ranker selection and the Cohere adapter |
//! | [`retry`] | Backoff and HTTP error classification |
//! | [`sqlite_store`] | SQLite vector and lexical index |
//! | [`sqlite_memory`] | Persisted conversation memory |
//! | [`ingest`] | Index build and swap |
//! | [`chat`] | Chat turns, `ask`, and `history` |
//! | [`search`] | Retrieval-only search |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod chat;
pub mod config;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod generation;
pub mod ingest;
pub mod loader;
pub mod logging;
pub mod migrate;
pub mod rerank;
pub mod retry;
pub mod search;
pub mod sqlite_memory;
pub mod sqlite_store;
