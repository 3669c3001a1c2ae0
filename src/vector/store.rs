//! The vector store contract.
//!
//! A vector store persists `(id, vector, document, metadata)` tuples and
//! answers nearest-neighbour queries under a metadata filter. The engine
//! only depends on this trait; the nearest-neighbour algorithm lives
//! behind it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::types::{Metadata, MetadataValue, Vector};
use crate::error::HlcsResult;

/// A single predicate in a [`WhereFilter`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    Eq(MetadataValue),
    /// Numeric field greater than or equal to the bound.
    Gte(f64),
}

impl Condition {
    fn matches(&self, value: Option<&MetadataValue>) -> bool {
        match (self, value) {
            (Condition::Eq(expected), Some(actual)) => expected == actual,
            (Condition::Gte(bound), Some(actual)) => {
                actual.as_f64().is_some_and(|v| v >= *bound)
            }
            (_, None) => false,
        }
    }
}

/// Conjunction of field predicates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WhereFilter {
    conditions: Vec<(String, Condition)>,
}

impl WhereFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.conditions
            .push((field.into(), Condition::Eq(value.into())));
        self
    }

    pub fn gte(mut self, field: impl Into<String>, bound: f64) -> Self {
        self.conditions.push((field.into(), Condition::Gte(bound)));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn conditions(&self) -> &[(String, Condition)] {
        &self.conditions
    }

    /// True when every predicate holds for `metadata`.
    pub fn matches(&self, metadata: &Metadata) -> bool {
        self.conditions
            .iter()
            .all(|(field, cond)| cond.matches(metadata.get(field)))
    }
}

/// A stored tuple.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEntry {
    pub id: String,
    pub vector: Vector,
    pub document: String,
    pub metadata: Metadata,
}

/// One nearest-neighbour answer; `distance` is cosine distance in [0, 2].
#[derive(Debug, Clone, PartialEq)]
pub struct QueryHit {
    pub id: String,
    pub document: String,
    pub metadata: Metadata,
    pub distance: f32,
}

/// Storage backend for embeddings with metadata filtering.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or replace one entry.
    async fn upsert(
        &self,
        id: &str,
        vector: Vector,
        document: &str,
        metadata: Metadata,
    ) -> HlcsResult<()>;

    /// Insert or replace many entries.
    async fn upsert_batch(&self, entries: Vec<StoredEntry>) -> HlcsResult<()> {
        for entry in entries {
            self.upsert(&entry.id, entry.vector, &entry.document, entry.metadata)
                .await?;
        }
        Ok(())
    }

    /// The `k` nearest entries to `vector` matching `filter`, nearest first.
    async fn query(
        &self,
        vector: &Vector,
        k: usize,
        filter: Option<&WhereFilter>,
    ) -> HlcsResult<Vec<QueryHit>>;

    /// Entries by id and/or filter; `None` for both returns everything.
    async fn get(
        &self,
        ids: Option<&[String]>,
        filter: Option<&WhereFilter>,
    ) -> HlcsResult<Vec<StoredEntry>>;

    /// Merge `metadata` into an existing entry's metadata.
    async fn update(&self, id: &str, metadata: Metadata) -> HlcsResult<()>;

    /// Remove entries; returns how many existed.
    async fn delete(&self, ids: &[String]) -> HlcsResult<usize>;

    async fn count(&self) -> HlcsResult<usize>;

    fn name(&self) -> &str;

    fn is_available(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(tier: &str, confidence: f64) -> Metadata {
        let mut m = Metadata::new();
        m.insert("memory_tier".into(), tier.into());
        m.insert("confidence_score".into(), confidence.into());
        m
    }

    #[test]
    fn test_where_filter_conjunction() {
        let filter = WhereFilter::new()
            .eq("memory_tier", "short_term")
            .gte("confidence_score", 0.5);

        assert!(filter.matches(&meta("short_term", 0.5)));
        assert!(!filter.matches(&meta("short_term", 0.4)));
        assert!(!filter.matches(&meta("long_term", 0.9)));
    }

    #[test]
    fn test_missing_field_fails_predicate() {
        let filter = WhereFilter::new().eq("knowledge_type", "semantic");
        assert!(!filter.matches(&Metadata::new()));
        assert!(WhereFilter::new().matches(&Metadata::new()));
    }
}
