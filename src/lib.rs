//! # HLCS: Hierarchical Layered Cognitive Strategy
//!
//! A strategic orchestration layer that routes natural-language queries
//! among several backends and refines the answer until it meets a quality
//! bar. It pairs two cores:
//!
//! - **Knowledge memory** ([`memory`]): short-term and long-term tiers over
//!   a vector store, with access tracking, recency reranking, promotion and
//!   expiry.
//! - **Orchestrator** ([`orchestrator`]): complexity classification,
//!   modality detection, routing among simple / complex / multimodal /
//!   agent / ensemble workflows, and a bounded refinement loop.
//!
//! Around them sit the [`episodic`] buffer of recent turns, the
//! [`services`] traits every external backend implements, and a local
//! ReAct [`agent`].
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use hlcs::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> HlcsResult<()> {
//!     hlcs::telemetry::init_tracing("hlcs=info");
//!     let config = HlcsConfig::from_env();
//!
//!     // Knowledge the complex workflow can draw on
//!     let memory = Arc::new(KnowledgeMemory::in_memory(config.memory.clone()));
//!     memory.add("Black holes form when massive stars collapse.", None).await?;
//!
//!     let tools = Arc::new(ToolClient::new("http://localhost:3000"));
//!     let orchestrator = Orchestrator::builder()
//!         .config(config.orchestrator.clone())
//!         .flags(config.flags.clone())
//!         .classifier(tools.clone())
//!         .responder(tools.clone())
//!         .language_model(tools)
//!         .retriever(memory)
//!         .build()?;
//!
//!     let response = orchestrator
//!         .process(QueryRequest::new("explain black holes in detail"))
//!         .await?;
//!     println!("[{}] {}", response.strategy, response.result);
//!
//!     // Recording the turn is the caller's job
//!     let buffer = EpisodicBuffer::open(config.buffer.clone()).await;
//!     buffer.add("explain black holes in detail", response.result, None, None, None).await;
//!     Ok(())
//! }
//! ```
//!
//! ## Error boundary
//!
//! [`Orchestrator::process`] only fails on an empty query. Classifier,
//! generator and evaluator failures (timeouts included) degrade the route
//! and are reported on the response. The memory engine and buffer fail on
//! bad input and corrupt state, but reads survive an unavailable backend.
//!
//! ## Thread Safety
//!
//! `KnowledgeMemory`, `EpisodicBuffer` and `Orchestrator` are `Send + Sync`
//! and meant to be shared behind an `Arc`. Both stores serialize their
//! writes internally.

pub mod agent;
pub mod config;
pub mod embedding;
pub mod episodic;
mod error;
pub mod flags;
pub mod memory;
pub mod orchestrator;
pub mod services;
pub mod telemetry;
pub mod vector;

pub use agent::{AgentConfig, AgentStats, AgentStrategy, ReactAgent};
pub use config::{BufferConfig, HlcsConfig, MemoryConfig, OrchestratorConfig};
pub use embedding::{EmbeddingProvider, HashingEmbedder, UnavailableEmbedder};
pub use episodic::{BufferReport, BufferStats, Episode, EpisodicBuffer};
pub use error::{HlcsError, HlcsResult};
pub use flags::{FeatureFlag, FeatureFlags, Rollout};
pub use memory::{
    ChunkStrategy, ConsolidationReport, ConsolidationScheduler, KnowledgeMemory, KnowledgeType,
    MemoryMetadata, MemoryRecord, MemoryStats, MemoryTier, RetrievalFilter, RetrievalResult,
};
pub use orchestrator::{
    Modality, OrchestrationResponse, Orchestrator, OrchestratorBuilder, QueryRequest, Strategy,
};
pub use vector::{InMemoryVectorStore, Vector, VectorStore};

// Re-export commonly used external types for convenience
pub use chrono::{DateTime, Utc};
pub use serde_json::{Value as JsonValue, json};

/// Prelude module for convenient imports.
///
/// ```ignore
/// use hlcs::prelude::*;
/// ```
pub mod prelude {
    pub use crate::agent::ReactAgent;
    pub use crate::config::{BufferConfig, HlcsConfig, MemoryConfig, OrchestratorConfig};
    pub use crate::episodic::{Episode, EpisodicBuffer};
    pub use crate::error::{HlcsError, HlcsResult};
    pub use crate::flags::FeatureFlags;
    pub use crate::memory::{
        KnowledgeMemory, KnowledgeType, MemoryMetadata, MemoryTier, RetrievalFilter,
        RetrievalResult,
    };
    pub use crate::orchestrator::{
        OrchestrationResponse, Orchestrator, QueryRequest, Strategy, StrategyAdvisor,
        WeightedConsensus,
    };
    pub use crate::services::{
        ComplexityClassifier, ContextRetriever, HeuristicEvaluator, KeywordClassifier,
        LanguageModel, QualityEvaluator, TemplateResponder,
    };
    #[cfg(feature = "http")]
    pub use crate::services::ToolClient;
    pub use chrono::{DateTime, Utc};
    pub use serde_json::{Value as JsonValue, json};
}
