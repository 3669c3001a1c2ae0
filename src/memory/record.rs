//! The memory record model and its flat metadata encoding.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::HlcsError;
use crate::vector::{Metadata, MetadataValue, WhereFilter};

/// Kind of knowledge a record holds. Fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnowledgeType {
    /// Specific events: "user asked about X yesterday".
    Episodic,
    /// Facts and concepts.
    Semantic,
    /// How-to knowledge.
    Procedural,
}

impl KnowledgeType {
    pub const ALL: [KnowledgeType; 3] = [
        KnowledgeType::Episodic,
        KnowledgeType::Semantic,
        KnowledgeType::Procedural,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            KnowledgeType::Episodic => "episodic",
            KnowledgeType::Semantic => "semantic",
            KnowledgeType::Procedural => "procedural",
        }
    }
}

impl fmt::Display for KnowledgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KnowledgeType {
    type Err = HlcsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "episodic" => Ok(KnowledgeType::Episodic),
            "semantic" => Ok(KnowledgeType::Semantic),
            "procedural" => Ok(KnowledgeType::Procedural),
            other => Err(HlcsError::invalid(format!("unknown knowledge type '{other}'"))),
        }
    }
}

/// Storage tier. Records only ever move `ShortTerm -> LongTerm`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryTier {
    ShortTerm,
    LongTerm,
}

impl MemoryTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryTier::ShortTerm => "short_term",
            MemoryTier::LongTerm => "long_term",
        }
    }
}

impl fmt::Display for MemoryTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemoryTier {
    type Err = HlcsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "short_term" => Ok(MemoryTier::ShortTerm),
            "long_term" => Ok(MemoryTier::LongTerm),
            other => Err(HlcsError::invalid(format!("unknown memory tier '{other}'"))),
        }
    }
}

// Metadata field names as stored in the vector store.
pub(crate) const KNOWLEDGE_TYPE: &str = "knowledge_type";
pub(crate) const MEMORY_TIER: &str = "memory_tier";
pub(crate) const CONFIDENCE: &str = "confidence_score";
pub(crate) const ACCESS_COUNT: &str = "access_count";
pub(crate) const TAGS: &str = "tags";
pub(crate) const SOURCE: &str = "source";
pub(crate) const TIMESTAMP: &str = "timestamp";

/// Caller-supplied attributes for a new record.
///
/// # Example
///
/// ```ignore
/// let meta = MemoryMetadata::new(KnowledgeType::Procedural)
///     .with_confidence(0.8)
///     .with_tags(["deploy", "k8s"]);
/// memory.add("Roll out with kubectl apply", Some(meta)).await?;
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryMetadata {
    pub knowledge_type: KnowledgeType,
    pub memory_tier: MemoryTier,
    pub confidence: f32,
    #[serde(default)]
    pub tags: Vec<String>,
    pub source: String,
    /// Creation time; `None` means "now".
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Default for MemoryMetadata {
    fn default() -> Self {
        Self {
            knowledge_type: KnowledgeType::Semantic,
            memory_tier: MemoryTier::ShortTerm,
            confidence: 1.0,
            tags: Vec::new(),
            source: "system".to_string(),
            timestamp: None,
        }
    }
}

impl MemoryMetadata {
    pub fn new(knowledge_type: KnowledgeType) -> Self {
        Self {
            knowledge_type,
            ..Self::default()
        }
    }

    pub fn with_tier(mut self, tier: MemoryTier) -> Self {
        self.memory_tier = tier;
        self
    }

    /// Clamped to [0, 1].
    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Encode as flat store metadata with `access_count = 0`.
    pub(crate) fn to_store_metadata(&self, now: DateTime<Utc>) -> Metadata {
        let timestamp = self.timestamp.unwrap_or(now);
        let mut m = Metadata::new();
        m.insert(KNOWLEDGE_TYPE.into(), self.knowledge_type.as_str().into());
        m.insert(MEMORY_TIER.into(), self.memory_tier.as_str().into());
        m.insert(CONFIDENCE.into(), self.confidence.clamp(0.0, 1.0).into());
        m.insert(ACCESS_COUNT.into(), 0u32.into());
        m.insert(TAGS.into(), encode_tags(&self.tags).into());
        m.insert(SOURCE.into(), self.source.clone().into());
        m.insert(
            TIMESTAMP.into(),
            timestamp.to_rfc3339_opts(SecondsFormat::Micros, true).into(),
        );
        m
    }
}

fn encode_tags(tags: &[String]) -> String {
    serde_json::to_string(tags).unwrap_or_else(|_| "[]".to_string())
}

fn decode_tags(value: Option<&MetadataValue>) -> Vec<String> {
    value
        .and_then(MetadataValue::as_str)
        .and_then(|raw| serde_json::from_str(raw).ok())
        .unwrap_or_default()
}

/// A stored knowledge item as seen by callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: String,
    pub content: String,
    pub knowledge_type: KnowledgeType,
    pub memory_tier: MemoryTier,
    pub confidence_score: f32,
    pub access_count: u32,
    pub tags: Vec<String>,
    pub source: String,
    /// Creation time as stored (RFC 3339). Kept raw: records written by
    /// other tools may carry timestamps that do not parse.
    pub timestamp: String,
}

impl MemoryRecord {
    /// Decode a record from store metadata, tolerating missing fields.
    pub(crate) fn from_store(id: &str, document: &str, metadata: &Metadata) -> Self {
        let text = |key: &str| metadata.get(key).and_then(MetadataValue::as_str);

        Self {
            id: id.to_string(),
            content: document.to_string(),
            knowledge_type: text(KNOWLEDGE_TYPE)
                .and_then(|s| s.parse().ok())
                .unwrap_or(KnowledgeType::Semantic),
            memory_tier: text(MEMORY_TIER)
                .and_then(|s| s.parse().ok())
                .unwrap_or(MemoryTier::ShortTerm),
            confidence_score: metadata
                .get(CONFIDENCE)
                .and_then(MetadataValue::as_f64)
                .unwrap_or(0.0) as f32,
            access_count: metadata
                .get(ACCESS_COUNT)
                .and_then(MetadataValue::as_i64)
                .unwrap_or(0)
                .max(0) as u32,
            tags: decode_tags(metadata.get(TAGS)),
            source: text(SOURCE).unwrap_or("system").to_string(),
            timestamp: text(TIMESTAMP).unwrap_or_default().to_string(),
        }
    }

    /// Parsed creation time, if the stored timestamp is valid RFC 3339.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.timestamp)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }

    /// Age in hours relative to `now`, if the timestamp parses.
    pub fn age_hours(&self, now: DateTime<Utc>) -> Option<f64> {
        self.created_at()
            .map(|t| (now - t).num_milliseconds() as f64 / 3_600_000.0)
    }

    pub fn has_any_tag(&self, wanted: &[String]) -> bool {
        self.tags.iter().any(|t| wanted.contains(t))
    }
}

/// A record scored against one query. Not persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub record: MemoryRecord,
    /// Vector similarity before reranking, `1 - distance / 2`.
    pub similarity: f32,
    /// Final ranking score.
    pub score: f32,
}

impl RetrievalResult {
    pub fn content(&self) -> &str {
        &self.record.content
    }

    pub fn id(&self) -> &str {
        &self.record.id
    }
}

/// Retrieval and browse filters.
///
/// Type, tier and confidence are pushed down to the store; tags are
/// matched afterwards (any-match) because the store cannot filter on
/// list-valued fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalFilter {
    pub knowledge_type: Option<KnowledgeType>,
    pub memory_tier: Option<MemoryTier>,
    pub min_confidence: Option<f32>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub source: Option<String>,
}

impl RetrievalFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn knowledge_type(mut self, kt: KnowledgeType) -> Self {
        self.knowledge_type = Some(kt);
        self
    }

    pub fn tier(mut self, tier: MemoryTier) -> Self {
        self.memory_tier = Some(tier);
        self
    }

    pub fn min_confidence(mut self, min: f32) -> Self {
        self.min_confidence = Some(min);
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// The store-side part of the filter, `None` when nothing to push down.
    pub(crate) fn to_where(&self) -> Option<WhereFilter> {
        let mut filter = WhereFilter::new();
        if let Some(kt) = self.knowledge_type {
            filter = filter.eq(KNOWLEDGE_TYPE, kt.as_str());
        }
        if let Some(tier) = self.memory_tier {
            filter = filter.eq(MEMORY_TIER, tier.as_str());
        }
        if let Some(min) = self.min_confidence.filter(|m| *m > 0.0) {
            filter = filter.gte(CONFIDENCE, min as f64);
        }
        if let Some(source) = &self.source {
            filter = filter.eq(SOURCE, source.as_str());
        }
        (!filter.is_empty()).then_some(filter)
    }

    pub(crate) fn accepts_tags(&self, record: &MemoryRecord) -> bool {
        self.tags.is_empty() || record.has_any_tag(&self.tags)
    }
}

/// Outcome of a consolidation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsolidationReport {
    pub promoted: usize,
    pub expired: usize,
}

/// Record counts by tier and knowledge type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub total: usize,
    pub short_term: usize,
    pub long_term: usize,
    pub episodic: usize,
    pub semantic: usize,
    pub procedural: usize,
    pub store: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_metadata_roundtrip_through_store_encoding() {
        let ts = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let meta = MemoryMetadata::new(KnowledgeType::Procedural)
            .with_confidence(0.8)
            .with_tags(["ops", "deploy"])
            .with_source("runbook.md")
            .with_timestamp(ts);

        let stored = meta.to_store_metadata(Utc::now());
        assert_eq!(
            stored.get(TAGS).and_then(MetadataValue::as_str),
            Some(r#"["ops","deploy"]"#)
        );

        let record = MemoryRecord::from_store("mem_1", "kubectl apply", &stored);
        assert_eq!(record.knowledge_type, KnowledgeType::Procedural);
        assert_eq!(record.memory_tier, MemoryTier::ShortTerm);
        assert_eq!(record.access_count, 0);
        assert_eq!(record.tags, vec!["ops", "deploy"]);
        assert_eq!(record.source, "runbook.md");
        assert_eq!(record.created_at(), Some(ts));
        assert!((record.confidence_score - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_decode_tolerates_garbage() {
        let mut m = Metadata::new();
        m.insert(TAGS.into(), "not json".into());
        m.insert(TIMESTAMP.into(), "yesterday".into());
        m.insert(MEMORY_TIER.into(), "mid_term".into());

        let record = MemoryRecord::from_store("x", "doc", &m);
        assert!(record.tags.is_empty());
        assert_eq!(record.memory_tier, MemoryTier::ShortTerm);
        assert_eq!(record.created_at(), None);
    }

    #[test]
    fn test_filter_pushdown() {
        assert!(RetrievalFilter::new().to_where().is_none());
        assert!(RetrievalFilter::new().min_confidence(0.0).to_where().is_none());
        // tags alone are client-side only
        assert!(RetrievalFilter::new().tags(["a"]).to_where().is_none());

        let f = RetrievalFilter::new()
            .knowledge_type(KnowledgeType::Semantic)
            .tier(MemoryTier::LongTerm)
            .min_confidence(0.5)
            .to_where()
            .unwrap();
        assert_eq!(f.conditions().len(), 3);
    }

    #[test]
    fn test_parse_enums() {
        assert_eq!("long_term".parse::<MemoryTier>().unwrap(), MemoryTier::LongTerm);
        assert!("nope".parse::<KnowledgeType>().is_err());
    }
}
