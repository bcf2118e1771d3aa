//! # Code RAG
//!
//! An ingestion pipeline that turns a GitHub repository into a searchable
//! vector collection for retrieval-augmented generation.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌───────────┐   ┌────────────┐   ┌──────────┐
//! │  Walker   │──▶│ Documents │──▶│ Split +    │──▶│  Embed   │
//! │ GitHub API│   │ metadata  │   │ Extract    │   │          │
//! └───────────┘   └───────────┘   └────────────┘   └────┬─────┘
//!                                                      ▼
//!                                    ┌──────────────────────────┐
//!                                    │ VectorDbHandle           │
//!                                    │ Milvus / in-memory store │
//!                                    └──────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Typed errors for the walker and vector store |
//! | [`models`] | File records, repository graph, nodes |
//! | [`walker`] | Concurrent GitHub contents traversal |
//! | [`rate_limit`] | Minimum-interval limiter between outbound calls |
//! | [`document`] | Metadata-enriched documents per file |
//! | [`chunk`] | Token-bounded text splitter |
//! | [`llm`] | Chat-completion client |
//! | [`extract`] | Title and question extractors |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`rerank`] | Cross-encoder reranking |
//! | [`store`] | `VectorStore` trait with Milvus and in-memory backends |
//! | [`vectordb`] | High-level vector database handle |
//! | [`ingest`] | Pipeline driver and `walk`/`build`/`extract`/`ingest` commands |
//! | [`collections`] | Collection administration commands |
//! | [`search`] | Query command |

pub mod chunk;
pub mod collections;
pub mod config;
pub mod document;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod rate_limit;
pub mod rerank;
pub mod search;
pub mod store;
pub mod vectordb;
pub mod walker;
