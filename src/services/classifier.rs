//! Offline complexity heuristic.

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use super::ComplexityClassifier;
use crate::embedding::tokenize;
use crate::error::HlcsResult;

const DEFAULT_MARKERS: &[&str] = &[
    "explain",
    "detail",
    "detailed",
    "compare",
    "analyze",
    "analyse",
    "why",
    "design",
    "architecture",
    "difference",
    "tradeoffs",
    "step",
    "implement",
];

/// Scores queries by length and the presence of depth markers.
///
/// `score = min(words / 40, 0.5) + 0.2 * markers`, clamped to [0, 1].
/// Stands in when no classifier service is reachable.
#[derive(Debug, Clone)]
pub struct KeywordClassifier {
    markers: Vec<String>,
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self {
            markers: DEFAULT_MARKERS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl KeywordClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_markers<I, S>(markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            markers: markers.into_iter().map(Into::into).collect(),
        }
    }

    pub fn score(&self, query: &str) -> f32 {
        let tokens = tokenize(query);
        let length = (tokens.len() as f32 / 40.0).min(0.5);
        let hits = tokens
            .iter()
            .filter(|t| self.markers.iter().any(|m| m == *t))
            .count();
        (length + 0.2 * hits as f32).clamp(0.0, 1.0)
    }
}

#[async_trait]
impl ComplexityClassifier for KeywordClassifier {
    async fn classify(&self, query: &str, _context: Option<&JsonValue>) -> HlcsResult<f32> {
        Ok(self.score(query))
    }

    fn name(&self) -> &str {
        "keyword_classifier"
    }
}
