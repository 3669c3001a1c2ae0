//! External collaborators of the orchestrator.
//!
//! Every backend the orchestrator consults sits behind one of these
//! object-safe traits, so a deployment can mix remote services, local
//! components and offline stand-ins freely:
//!
//! | Trait                  | Remote tool          | Local / fallback                |
//! |------------------------|----------------------|---------------------------------|
//! | `ComplexityClassifier` | `trm.classify`       | [`KeywordClassifier`]           |
//! | `TemplateResponder`    | `saul.respond`       |                                 |
//! | `LanguageModel`        | `llm.chat`           |                                 |
//! | `ContextRetriever`     | `rag.search`         | `KnowledgeMemory`               |
//! | `MediaAnalyzer`        | `vision.*`, `audio.*`|                                 |
//! | `QualityEvaluator`     |                      | [`HeuristicEvaluator`], [`LlmJudgeEvaluator`] |
//! | `AgentRunner`          |                      | `ReactAgent`                    |

mod classifier;
mod evaluator;
mod generator;
#[cfg(feature = "http")]
mod http;
mod synthesizer;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::HlcsResult;

pub use classifier::KeywordClassifier;
pub use evaluator::{HeuristicEvaluator, LlmJudgeEvaluator};
pub use generator::{GenerationRequest, Generator, GeneratorOutput};
#[cfg(feature = "http")]
pub use http::{ToolClient, ToolResult};
pub use synthesizer::{Candidate, RetrievalSynthesizer};

/// Scores how hard a query is, in [0, 1].
#[async_trait]
pub trait ComplexityClassifier: Send + Sync {
    async fn classify(&self, query: &str, context: Option<&JsonValue>) -> HlcsResult<f32>;

    fn name(&self) -> &str {
        "classifier"
    }
}

/// Fast direct responder for simple queries.
#[async_trait]
pub trait TemplateResponder: Send + Sync {
    async fn respond(&self, query: &str, context: Option<&JsonValue>) -> HlcsResult<String>;

    fn name(&self) -> &str {
        "responder"
    }
}

/// Opaque text generation: `generate(prompt) -> text`.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(&self, prompt: &str) -> HlcsResult<String>;

    fn name(&self) -> &str {
        "llm"
    }
}

/// Supplies context snippets for a query.
#[async_trait]
pub trait ContextRetriever: Send + Sync {
    async fn search(&self, query: &str, k: usize) -> HlcsResult<Vec<String>>;

    fn name(&self) -> &str {
        "retriever"
    }
}

/// Vision and audio analysis.
#[async_trait]
pub trait MediaAnalyzer: Send + Sync {
    /// Describe the image at `image_url`.
    async fn analyze_image(&self, image_url: &str, query: &str) -> HlcsResult<String>;

    /// Transcribe the audio at `audio_url`.
    async fn transcribe_audio(&self, audio_url: &str) -> HlcsResult<String>;
}

/// Judge output: a score in [0, 1] and the problems found.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub score: f32,
    #[serde(default)]
    pub issues: Vec<String>,
}

/// Scores a produced answer against the query that prompted it.
#[async_trait]
pub trait QualityEvaluator: Send + Sync {
    async fn evaluate(&self, answer: &str, query: &str) -> HlcsResult<QualityReport>;

    fn name(&self) -> &str {
        "evaluator"
    }
}

/// What the agent produced for one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentOutcome {
    pub answer: String,
    /// True when the multi-step tool-use strategy produced the answer.
    pub used_tools_strategy: bool,
    pub steps: usize,
    pub latency_ms: u64,
}

/// A local agent able to answer on its own, possibly with tools.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    async fn run(
        &self,
        query: &str,
        user_id: Option<&str>,
        session_id: Option<&str>,
    ) -> HlcsResult<AgentOutcome>;

    fn name(&self) -> &str {
        "agent"
    }
}
