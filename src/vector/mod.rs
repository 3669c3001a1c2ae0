//! Vector storage for knowledge retrieval.
//!
//! The engine talks to any [`VectorStore`]; this module provides the
//! contract, the value types it exchanges, and two implementations:
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  KnowledgeMemory (embed, rerank, promote)    │
//! ├──────────────────────────────────────────────┤
//! │  VectorStore trait                           │
//! │  upsert / query / get / update / delete      │
//! ├──────────────────────┬───────────────────────┤
//! │ InMemoryVectorStore  │ external ANN service  │
//! └──────────────────────┴───────────────────────┘
//! ```

mod index;
mod store;
mod types;

pub use index::{InMemoryVectorStore, UnavailableVectorStore};
pub use store::{Condition, QueryHit, StoredEntry, VectorStore, WhereFilter};
pub use types::{Metadata, MetadataValue, Vector};
