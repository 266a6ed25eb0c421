//! # Alcove
//!
//! **A local-first personal knowledge base with grounded answers.**
//!
//! Alcove organizes a user's content into **spaces**: named containers of
//! text messages and uploaded files. Saved content is text-extracted,
//! embedded, and indexed into a per-user approximate-nearest-neighbor
//! structure; natural-language questions are answered by retrieving the
//! most relevant items and prompting a language model grounded in exactly
//! that content, with source attribution preserved.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌───────────┐   ┌──────────┐   ┌─────────────┐
//! │ save_*     │──▶│ Extractor │──▶│ Embedder │──▶│ VectorIndex │
//! │ (CLI/API)  │   │ pdf/docx/ │   │ hashing/ │   │ HNSW + maps │
//! └────────────┘   │ plain/ocr │   │ remote   │   │ + snapshot  │
//!                  └───────────┘   └──────────┘   └──────┬──────┘
//!                        │                               │
//!                        ▼                               ▼
//!                  ┌───────────┐                  ┌─────────────┐
//!                  │  SQLite   │◀─────────────────│ QueryEngine │──▶ LLM
//!                  │ metadata  │     hydrate      │  (ask)      │
//!                  └───────────┘                  └─────────────┘
//! ```
//!
//! ## Data Flow
//!
//! 1. **Ingestion** ([`content`]): a save call inserts the item as
//!    `pending`, extracts text for files ([`extract`]), embeds it
//!    ([`embedding`]), adds the vector to the per-user index ([`index`]),
//!    and flips the item to `ready`. Failures compensate: intrinsic ones
//!    mark the item `failed`, transient ones remove every trace.
//! 2. **Query** ([`query`]): the question is embedded, the index is
//!    searched scoped to the space, hits are hydrated from the metadata
//!    store ([`store`]), context is assembled under a character budget,
//!    and the grounded prompt goes to the configured LLM ([`llm`]). The
//!    answered [`models::Query`] is persisted append-only.
//! 3. **Search** ([`search`]): the same retrieval without the LLM step,
//!    scoped to a space or across all of a user's spaces.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Core types: `Space`, `Item`, `Query`, `SearchHit` |
//! | [`error`] | The closed error set the engine surfaces |
//! | [`context`] | Per-user wiring: database, index, embedder, LLM |
//! | [`extract`] | File-to-text extraction (plain, pdf, docx, image OCR) |
//! | [`embedding`] | Embedding backends, caching, normalization |
//! | [`index`] | Persistent per-user vector index with space filtering |
//! | [`store`] | SQLite metadata store (spaces, items, queries) |
//! | [`content`] | Item ingestion pipeline with compensating cleanup |
//! | [`spaces`] | Space CRUD with cascading delete |
//! | [`query`] | RAG query engine and query history |
//! | [`search`] | Scoped and global semantic search |
//! | [`admin`] | Index compaction and full reindex |
//! | [`llm`] | Chat-completion clients (OpenAI-compatible, Ollama) |
//! | [`deadline`] | Per-operation deadline plumbing |
//!
//! ## Storage Layout
//!
//! One directory per user under the configured data root:
//!
//! ```text
//! <data_root>/<user_id>/
//! ├── kb.sqlite                          # metadata database
//! ├── index.bin                          # vector-index snapshot (checksummed)
//! └── files/<space_id>/<item_id>.<ext>   # uploaded bytes
//! ```

pub mod admin;
pub mod config;
pub mod content;
pub mod context;
pub mod db;
pub mod deadline;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod index;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod query;
pub mod search;
pub mod spaces;
pub mod store;
pub mod vector;

pub use error::{Error, Result};
