//! Hierarchical knowledge memory.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │  KnowledgeMemory                                        │
//! │  add / add_bulk / retrieve / consolidate / stats        │
//! ├─────────────────────────────────────────────────────────┤
//! │  Tiers                                                  │
//! │  short_term ──(access ≥ 3 or confidence ≥ 0.9)──▶ long_term │
//! │  short_term ──(older than TTL)──▶ expired               │
//! ├─────────────────────────────────────────────────────────┤
//! │  EmbeddingProvider + VectorStore                        │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! Promotion is one-way: nothing moves a record back to short-term.

pub mod chunking;
mod engine;
mod record;
pub mod rerank;
mod scheduler;

pub use chunking::{ChunkStrategy, DocumentChunk, load_document};
pub use engine::KnowledgeMemory;
pub use record::{
    ConsolidationReport, KnowledgeType, MemoryMetadata, MemoryRecord, MemoryStats, MemoryTier,
    RetrievalFilter, RetrievalResult,
};
pub use scheduler::{ConsolidationScheduler, SchedulerStats};
