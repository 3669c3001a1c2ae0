//! Configuration for the memory engine, episodic buffer and orchestrator.
//!
//! Every knob has a sensible default, so `HlcsConfig::default()` is a
//! working configuration. Adapters that read config files deserialize
//! these structs directly; `HlcsConfig::from_env` layers `HLCS_*`
//! environment overrides on top of the defaults.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::flags::FeatureFlags;

/// Knowledge memory engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Short-term records older than this (with too few accesses) expire.
    pub stm_ttl_hours: f64,

    /// Access count at which a short-term record is promoted.
    pub ltm_promotion_threshold: u32,

    /// Confidence at which consolidation promotes regardless of access count.
    pub high_confidence_promotion: f32,

    /// Window over which recency decays to its floor.
    pub recency_window_hours: f64,

    /// Lowest recency factor a record can receive.
    pub recency_floor: f32,

    /// Recency factor used when a timestamp cannot be parsed.
    pub invalid_timestamp_recency: f32,

    /// Retrieval fetches `top_k * candidate_multiplier` neighbours before reranking.
    pub candidate_multiplier: usize,

    /// Embedding width used by the default hashing embedder.
    pub embedding_dimensions: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            stm_ttl_hours: 24.0,
            ltm_promotion_threshold: 3,
            high_confidence_promotion: 0.9,
            recency_window_hours: 7.0 * 24.0,
            recency_floor: 0.5,
            invalid_timestamp_recency: 0.7,
            candidate_multiplier: 2,
            embedding_dimensions: 384,
        }
    }
}

/// Episodic buffer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Maximum number of episodes kept in memory.
    pub max_size: usize,

    /// Snapshot location; `None` keeps the buffer purely in memory.
    pub persist_path: Option<PathBuf>,

    /// Save automatically every `auto_save_every` insertions.
    pub auto_save: bool,

    pub auto_save_every: usize,

    /// Allow similarity search over attached query embeddings.
    pub enable_embeddings: bool,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            persist_path: None,
            auto_save: true,
            auto_save_every: 10,
            enable_embeddings: false,
        }
    }
}

impl BufferConfig {
    /// The conventional snapshot location under the user's data directory.
    pub fn default_persist_path() -> Option<PathBuf> {
        dirs::data_dir().map(|dir| dir.join("hlcs").join("episodic_buffer.json"))
    }

    /// Set the snapshot path.
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.persist_path = Some(path.into());
        self
    }

    /// Set the capacity.
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }
}

/// Orchestrator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Complexity above which the complex workflow is chosen.
    pub complexity_threshold: f32,

    /// Answers scoring below this are refined.
    pub quality_threshold: f32,

    /// Upper bound on refinement iterations.
    pub max_iterations: u32,

    /// Optimistic bump applied to the evaluated score after a refinement.
    pub refinement_increment: f32,

    /// Complexity at or above which the agent workflow is preferred.
    pub agent_complexity_threshold: f32,

    /// Complexity above which the multimodal workflow also retrieves context.
    pub multimodal_retrieval_threshold: f32,

    /// Deadline applied to every external call.
    pub call_timeout_ms: u64,

    /// Snippets retrieved by the complex and ensemble workflows.
    pub retrieval_k: usize,

    /// Snippets retrieved by the multimodal workflow.
    pub multimodal_retrieval_k: usize,

    /// Query words that route text requests to the agent.
    pub code_keywords: Vec<String>,

    /// Replace the workflow's baseline quality with the evaluator's score
    /// before the refinement loop runs.
    pub rescore_answers: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            complexity_threshold: 0.5,
            quality_threshold: 0.7,
            max_iterations: 3,
            refinement_increment: 0.15,
            agent_complexity_threshold: 0.7,
            multimodal_retrieval_threshold: 0.6,
            call_timeout_ms: 30_000,
            retrieval_k: 5,
            multimodal_retrieval_k: 3,
            code_keywords: [
                "create",
                "implement",
                "build",
                "develop",
                "code",
                "script",
                "function",
                "class",
                "api",
                "endpoint",
                "database",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            rescore_answers: false,
        }
    }
}

impl OrchestratorConfig {
    /// Per-call deadline as a [`Duration`].
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

/// Top-level configuration handed to the components at construction time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HlcsConfig {
    pub memory: MemoryConfig,
    pub buffer: BufferConfig,
    pub orchestrator: OrchestratorConfig,
    pub flags: FeatureFlags,
}

impl HlcsConfig {
    /// Defaults overridden by `HLCS_*` process environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each `HLCS_*` key.
    ///
    /// Unparseable values are ignored with a warning.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        override_with(&lookup, "HLCS_STM_TTL_HOURS", &mut config.memory.stm_ttl_hours);
        override_with(
            &lookup,
            "HLCS_LTM_PROMOTION_THRESHOLD",
            &mut config.memory.ltm_promotion_threshold,
        );
        override_with(
            &lookup,
            "HLCS_EMBEDDING_DIMENSIONS",
            &mut config.memory.embedding_dimensions,
        );

        override_with(&lookup, "HLCS_BUFFER_MAX_SIZE", &mut config.buffer.max_size);
        override_with(&lookup, "HLCS_BUFFER_AUTO_SAVE", &mut config.buffer.auto_save);
        if let Some(path) = lookup("HLCS_BUFFER_PATH") {
            config.buffer.persist_path = Some(PathBuf::from(path));
        }

        let orch = &mut config.orchestrator;
        override_with(&lookup, "HLCS_COMPLEXITY_THRESHOLD", &mut orch.complexity_threshold);
        override_with(&lookup, "HLCS_QUALITY_THRESHOLD", &mut orch.quality_threshold);
        override_with(&lookup, "HLCS_MAX_ITERATIONS", &mut orch.max_iterations);
        override_with(&lookup, "HLCS_REFINEMENT_INCREMENT", &mut orch.refinement_increment);
        override_with(&lookup, "HLCS_CALL_TIMEOUT_MS", &mut orch.call_timeout_ms);
        override_with(&lookup, "HLCS_RESCORE_ANSWERS", &mut orch.rescore_answers);

        config.flags.apply_env(&lookup);
        config
    }
}

fn override_with<T, F>(lookup: &F, key: &str, slot: &mut T)
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup(key) {
        match raw.trim().parse::<T>() {
            Ok(value) => *slot = value,
            Err(_) => warn!(key, value = %raw, "Ignoring unparseable config override"),
        }
    }
}
