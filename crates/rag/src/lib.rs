//! ResuMatch retrieval pipeline
//!
//! Deterministic chunking, session-scoped vector indexes with an LRU
//! pool, and multi-query retrieval with overlap dedup and a bounded
//! context bundle.

pub mod chunker;
pub mod index;
pub mod retriever;

pub use chunker::{chunk_text, TextChunk};
pub use index::{cosine_similarity, IndexPool, ScoredChunk, VectorIndex};
pub use retriever::{context_bundle, retrieve, ContextBundle};
