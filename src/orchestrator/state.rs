//! Per-request state carried through the decision loop.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{trace, warn};

/// The workflow that produced (or is producing) the answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Simple,
    Complex,
    Multimodal,
    Agent,
    Ensemble,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Simple => "simple",
            Strategy::Complex => "complex",
            Strategy::Multimodal => "multimodal",
            Strategy::Agent => "agent",
            Strategy::Ensemble => "ensemble",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Text,
    Multimodal,
}

impl Modality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::Text => "text",
            Modality::Multimodal => "multimodal",
        }
    }
}

/// Where a request is in the decision loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Classifying,
    ModalityDetection,
    Routing,
    Executing,
    Evaluating,
    Refining,
    Finalizing,
}

/// Telemetry for one external call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub name: String,
    pub latency_ms: f64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Everything one request accumulates before it is finalized.
#[derive(Debug, Clone)]
pub struct OrchestrationState {
    pub request_id: String,
    pub query: String,
    pub phase: Phase,
    pub complexity: f32,
    /// False when complexity is the fallback default.
    pub classified: bool,
    pub strategy: Strategy,
    pub modality: Modality,
    pub has_image: bool,
    pub has_audio: bool,
    pub research_results: Vec<String>,
    pub research_done: bool,
    pub vision_result: Option<String>,
    pub audio_result: Option<String>,
    pub final_result: String,
    pub quality_score: f32,
    pub iterations: u32,
    pub tool_calls: Vec<ToolCallRecord>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub extra: serde_json::Map<String, JsonValue>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl OrchestrationState {
    pub fn new(request_id: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            query: query.into(),
            phase: Phase::Classifying,
            complexity: 0.0,
            classified: false,
            strategy: Strategy::Simple,
            modality: Modality::Text,
            has_image: false,
            has_audio: false,
            research_results: Vec::new(),
            research_done: false,
            vision_result: None,
            audio_result: None,
            final_result: String::new(),
            quality_score: 0.0,
            iterations: 0,
            tool_calls: Vec::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
            extra: serde_json::Map::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn enter(&mut self, phase: Phase) {
        trace!(request_id = %self.request_id, from = ?self.phase, to = ?phase, "Phase change");
        self.phase = phase;
    }

    /// Record a degradation the caller should know about.
    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!(request_id = %self.request_id, "{}", message);
        self.warnings.push(message);
    }

    pub fn error(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!(request_id = %self.request_id, error = %message, "Request step failed");
        self.errors.push(message);
    }

    pub fn record(&mut self, call: ToolCallRecord) {
        self.tool_calls.push(call);
    }

    /// Set the answer together with its baseline quality.
    pub fn answer(&mut self, text: impl Into<String>, quality: f32) {
        self.final_result = text.into();
        self.quality_score = quality.clamp(0.0, 1.0);
    }

    pub fn processing_time_ms(&self) -> u64 {
        let end = self.finished_at.unwrap_or_else(Utc::now);
        (end - self.started_at).num_milliseconds().max(0) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_wire_names() {
        assert_eq!(serde_json::to_string(&Strategy::Multimodal).unwrap(), "\"multimodal\"");
        assert_eq!(Strategy::Agent.to_string(), "agent");
        assert_eq!(Modality::Text.as_str(), "text");
    }

    #[test]
    fn test_answer_clamps_quality() {
        let mut state = OrchestrationState::new("r", "q");
        state.answer("x", 1.4);
        assert_eq!(state.quality_score, 1.0);
        state.warn("degraded");
        state.error("broken");
        assert_eq!(state.warnings, vec!["degraded"]);
        assert_eq!(state.errors, vec!["broken"]);
    }
}
