//! # repo-retrieval
//!
//! Ingests source-code repositories into a vector store and answers
//! natural-language queries with a hybrid of BM25 and vector search.
//!
//! ## Architecture
//!
//! Ingestion:
//!
//! ```text
//!   {path, text}[] ──► Token windows ──► Batched embeddings ──► Metadata fit
//!                      (≤ 4000 tokens)   (S per call, T per    (≤ 40 KiB per
//!                                         input)                record)
//!                                                                  │
//!                         ┌────────────────────────────────────────┤
//!                         ▼                                        ▼
//!               Upsert in batches of 64                 <workdir>/.bm25.jsonl
//!               (repository namespace,
//!                mirrored to default)
//! ```
//!
//! Retrieval:
//!
//! ```text
//!                     ┌─────────────┐
//!                     │  Query text │──── result cache (10s)
//!                     └──────┬──────┘
//!               ┌────────────┴────────────┐
//!               ▼                         ▼
//!      ┌────────────────┐       ┌──────────────────┐
//!      │ BM25 (top 40)  │       │ Embedding (60s   │
//!      │ repo only      │       │ cache) + vector  │
//!      │ absent = empty │       │ top 40 / 80      │
//!      └───────┬────────┘       └────────┬─────────┘
//!              └────────────┬────────────┘
//!                           ▼
//!                ┌────────────────────┐
//!                │ RRF, k = 60        │
//!                │ absent rank = 999  │
//!                │ keep top 20        │
//!                └─────────┬──────────┘
//!                          ▼
//!              [{path, start, end, text?}]
//! ```
//!
//! ## Module Overview
//!
//! - [`config`] - Environment-based configuration for the provider, vector store and retrieval constants
//! - [`error`] - Error taxonomy and stage-tagged ingestion failures
//! - [`models`] - Chunks, vector metadata, retrieval results, request/response types
//! - [`chunking`] - Token-window chunking with deterministic chunk ids
//! - [`cache`] - TTL cache for query embeddings and results
//! - [`ingest`] - Chunk → embed → fit → upsert pipeline, plus bounded bulk ingestion
//! - [`llm::embeddings`] - Batched embedding via OpenAI-compatible or Ollama APIs
//! - [`search::bm25`] - Per-repository BM25 ranking powered by tantivy
//! - [`search::vector`] - Namespaced vector indexes (in-memory or Pinecone)
//! - [`search::fusion`] - Reciprocal Rank Fusion
//! - [`search::hybrid`] - Query and skill retrieval with caching
//! - [`source`] - Local directory walk producing repository snapshots
//! - [`api`] - Axum HTTP handlers for search, skill search and ingestion
//! - [`state`] - Shared application state

pub mod api;
pub mod cache;
pub mod chunking;
pub mod config;
pub mod error;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod search;
pub mod source;
pub mod state;
