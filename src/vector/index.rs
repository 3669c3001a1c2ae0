//! Vector store implementations.
//!
//! - [`InMemoryVectorStore`]: exact flat scan over a `DashMap`, always
//!   available, used when no external nearest-neighbour service is wired in.
//! - [`UnavailableVectorStore`]: null object; every call fails with
//!   `Storage`, so callers exercise their degraded paths.

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::trace;

use super::store::{QueryHit, StoredEntry, VectorStore, WhereFilter};
use super::types::{Metadata, Vector};
use crate::error::{HlcsError, HlcsResult};

/// Flat in-process vector store.
///
/// Query cost is O(n); fine for the knowledge volumes a single
/// orchestrator instance holds locally.
#[derive(Debug, Default)]
pub struct InMemoryVectorStore {
    entries: DashMap<String, StoredEntry>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn passes(filter: Option<&WhereFilter>, metadata: &Metadata) -> bool {
        filter.is_none_or(|f| f.matches(metadata))
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(
        &self,
        id: &str,
        vector: Vector,
        document: &str,
        metadata: Metadata,
    ) -> HlcsResult<()> {
        self.entries.insert(
            id.to_string(),
            StoredEntry {
                id: id.to_string(),
                vector,
                document: document.to_string(),
                metadata,
            },
        );
        Ok(())
    }

    async fn upsert_batch(&self, entries: Vec<StoredEntry>) -> HlcsResult<()> {
        for entry in entries {
            self.entries.insert(entry.id.clone(), entry);
        }
        Ok(())
    }

    async fn query(
        &self,
        vector: &Vector,
        k: usize,
        filter: Option<&WhereFilter>,
    ) -> HlcsResult<Vec<QueryHit>> {
        let mut hits: Vec<QueryHit> = self
            .entries
            .iter()
            .filter(|entry| Self::passes(filter, &entry.metadata))
            .filter_map(|entry| {
                // incompatible dimensions are skipped, not an error
                let distance = vector.cosine_distance(&entry.vector)?;
                Some(QueryHit {
                    id: entry.id.clone(),
                    document: entry.document.clone(),
                    metadata: entry.metadata.clone(),
                    distance,
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(k);

        trace!(k, returned = hits.len(), "Flat vector query");
        Ok(hits)
    }

    async fn get(
        &self,
        ids: Option<&[String]>,
        filter: Option<&WhereFilter>,
    ) -> HlcsResult<Vec<StoredEntry>> {
        let mut entries: Vec<StoredEntry> = match ids {
            Some(ids) => ids
                .iter()
                .filter_map(|id| self.entries.get(id).map(|e| e.clone()))
                .filter(|e| Self::passes(filter, &e.metadata))
                .collect(),
            None => self
                .entries
                .iter()
                .filter(|e| Self::passes(filter, &e.metadata))
                .map(|e| e.clone())
                .collect(),
        };
        if ids.is_none() {
            entries.sort_by(|a, b| a.id.cmp(&b.id));
        }
        Ok(entries)
    }

    async fn update(&self, id: &str, metadata: Metadata) -> HlcsResult<()> {
        let mut entry = self
            .entries
            .get_mut(id)
            .ok_or_else(|| HlcsError::NotFound { id: id.to_string() })?;
        entry.metadata.extend(metadata);
        Ok(())
    }

    async fn delete(&self, ids: &[String]) -> HlcsResult<usize> {
        Ok(ids
            .iter()
            .filter(|id| self.entries.remove(id.as_str()).is_some())
            .count())
    }

    async fn count(&self) -> HlcsResult<usize> {
        Ok(self.entries.len())
    }

    fn name(&self) -> &str {
        "in-memory"
    }
}

/// A store that is never reachable.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableVectorStore;

impl UnavailableVectorStore {
    fn fail<T>() -> HlcsResult<T> {
        Err(HlcsError::Storage("vector store unavailable".into()))
    }
}

#[async_trait]
impl VectorStore for UnavailableVectorStore {
    async fn upsert(&self, _: &str, _: Vector, _: &str, _: Metadata) -> HlcsResult<()> {
        Self::fail()
    }

    async fn query(
        &self,
        _: &Vector,
        _: usize,
        _: Option<&WhereFilter>,
    ) -> HlcsResult<Vec<QueryHit>> {
        Self::fail()
    }

    async fn get(
        &self,
        _: Option<&[String]>,
        _: Option<&WhereFilter>,
    ) -> HlcsResult<Vec<StoredEntry>> {
        Self::fail()
    }

    async fn update(&self, _: &str, _: Metadata) -> HlcsResult<()> {
        Self::fail()
    }

    async fn delete(&self, _: &[String]) -> HlcsResult<usize> {
        Self::fail()
    }

    async fn count(&self) -> HlcsResult<usize> {
        Self::fail()
    }

    fn name(&self) -> &str {
        "unavailable"
    }

    fn is_available(&self) -> bool {
        false
    }
}
