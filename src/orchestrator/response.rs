//! Request and response values at the orchestrator boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::state::{Modality, OrchestrationState, Strategy, ToolCallRecord};

/// One query plus its optional media and identity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub audio_url: Option<String>,
    #[serde(default)]
    pub context: Option<JsonValue>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    /// Route text queries to the local agent regardless of complexity.
    #[serde(default)]
    pub force_agent: bool,
}

impl QueryRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn with_image(mut self, url: impl Into<String>) -> Self {
        self.image_url = Some(url.into());
        self
    }

    pub fn with_audio(mut self, url: impl Into<String>) -> Self {
        self.audio_url = Some(url.into());
        self
    }

    pub fn with_context(mut self, context: JsonValue) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn force_agent(mut self) -> Self {
        self.force_agent = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub has_image: bool,
    pub has_audio: bool,
    pub research_done: bool,
    pub vision_done: bool,
    pub audio_done: bool,
    pub tool_calls: Vec<ToolCallRecord>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Routing and consensus details, when those layers ran.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, JsonValue>,
}

/// The structured result of one orchestrated request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationResponse {
    pub request_id: String,
    pub result: String,
    pub quality_score: f32,
    pub complexity: f32,
    pub strategy: Strategy,
    pub modality: Modality,
    pub iterations: u32,
    pub processing_time_ms: u64,
    pub metadata: ResponseMetadata,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl OrchestrationResponse {
    /// Close `state` and turn it into a response.
    pub(crate) fn finalize(mut state: OrchestrationState) -> Self {
        let finished_at = Utc::now();
        state.finished_at = Some(finished_at);
        let processing_time_ms = state.processing_time_ms();

        Self {
            request_id: state.request_id,
            result: state.final_result,
            quality_score: state.quality_score,
            complexity: state.complexity,
            strategy: state.strategy,
            modality: state.modality,
            iterations: state.iterations,
            processing_time_ms,
            metadata: ResponseMetadata {
                has_image: state.has_image,
                has_audio: state.has_audio,
                research_done: state.research_done,
                vision_done: state.vision_result.is_some(),
                audio_done: state.audio_result.is_some(),
                tool_calls: state.tool_calls,
                started_at: state.started_at,
                finished_at,
                extra: state.extra,
            },
            errors: state.errors,
            warnings: state.warnings,
        }
    }

    /// True when any step failed or degraded.
    pub fn is_degraded(&self) -> bool {
        !self.errors.is_empty() || !self.warnings.is_empty()
    }

    /// Names of the external calls made, in order.
    pub fn call_names(&self) -> Vec<&str> {
        self.metadata.tool_calls.iter().map(|c| c.name.as_str()).collect()
    }
}
