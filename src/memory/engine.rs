//! The knowledge memory engine.
//!
//! Owns the backing vector store and layers tier-aware behaviour on top:
//!
//! - **Ingestion** embeds content once and stores it short-term by default.
//! - **Retrieval** fetches `top_k * 2` neighbours, post-filters tags, bumps
//!   access counts (promoting hot short-term records) and reranks by
//!   similarity, confidence and recency.
//! - **Consolidation** is an explicit maintenance pass that promotes
//!   frequently used or high-confidence records and expires stale ones.
//!
//! Reads never fail: if the embedder or the store is down, retrieval
//! degrades to content matching or an empty list. Writes propagate
//! `Storage` errors.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{Instrument, debug, info, trace, warn};
use uuid::Uuid;

use super::record::{
    ACCESS_COUNT, CONFIDENCE, ConsolidationReport, KnowledgeType, MEMORY_TIER, MemoryMetadata,
    MemoryRecord, MemoryStats, MemoryTier, RetrievalFilter, RetrievalResult,
};
use super::rerank::{distance_to_similarity, rerank};
use crate::config::MemoryConfig;
use crate::embedding::{EmbeddingProvider, HashingEmbedder, tokenize};
use crate::error::{HlcsError, HlcsResult};
use crate::services::ContextRetriever;
use crate::telemetry;
use crate::vector::{
    InMemoryVectorStore, Metadata, StoredEntry, VectorStore, WhereFilter,
};

/// Hierarchical knowledge store.
///
/// Cheap to share behind an `Arc`; all methods take `&self`. Writes are
/// serialized by an internal lock so read-modify-write access updates
/// never move a counter backwards.
pub struct KnowledgeMemory {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    config: MemoryConfig,
    writes: Mutex<()>,
}

impl std::fmt::Debug for KnowledgeMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KnowledgeMemory")
            .field("embedder", &self.embedder.model())
            .field("store", &self.store.name())
            .field("config", &self.config)
            .finish()
    }
}

impl KnowledgeMemory {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        config: MemoryConfig,
    ) -> Self {
        info!(
            embedder = embedder.model(),
            store = store.name(),
            "Knowledge memory initialized"
        );
        Self {
            embedder,
            store,
            config,
            writes: Mutex::new(()),
        }
    }

    /// Local engine: hashing embedder over an in-process store.
    pub fn in_memory(config: MemoryConfig) -> Self {
        let embedder = Arc::new(HashingEmbedder::new(config.embedding_dimensions));
        Self::new(embedder, Arc::new(InMemoryVectorStore::new()), config)
    }

    /// Use the given providers where present and available, substituting
    /// the hashing embedder and the in-process store otherwise.
    pub fn from_available(
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        store: Option<Arc<dyn VectorStore>>,
        config: MemoryConfig,
    ) -> Self {
        let embedder: Arc<dyn EmbeddingProvider> = match embedder {
            Some(e) if e.is_available() => e,
            _ => {
                warn!("Embedding model unavailable, using hashing embedder");
                Arc::new(HashingEmbedder::new(config.embedding_dimensions))
            }
        };
        let store: Arc<dyn VectorStore> = match store {
            Some(s) if s.is_available() => s,
            _ => {
                warn!("Vector store unavailable, using in-memory store");
                Arc::new(InMemoryVectorStore::new())
            }
        };
        Self::new(embedder, store, config)
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Store one piece of knowledge and return its id.
    ///
    /// Omitted metadata defaults to semantic, short-term, confidence 1.0.
    pub async fn add(&self, content: &str, metadata: Option<MemoryMetadata>) -> HlcsResult<String> {
        validate_content(content, 0)?;
        let metadata = metadata.unwrap_or_default();
        let vector = self.embedder.embed(content).await?;
        let id = new_id();
        let stored = metadata.to_store_metadata(Utc::now());

        let _guard = self.writes.lock().await;
        self.store
            .upsert(&id, vector, content, stored)
            .await
            .map_err(as_storage)?;

        debug!(
            memory_id = %id,
            knowledge_type = %metadata.knowledge_type,
            tier = %metadata.memory_tier,
            "Memory stored"
        );
        Ok(id)
    }

    /// Store many items with a single embedding call.
    ///
    /// `metadatas`, when given, must have one entry per content.
    pub async fn add_bulk(
        &self,
        contents: &[String],
        metadatas: Option<Vec<MemoryMetadata>>,
    ) -> HlcsResult<Vec<String>> {
        if let Some(metas) = &metadatas {
            if metas.len() != contents.len() {
                return Err(HlcsError::ArityMismatch {
                    expected: contents.len(),
                    actual: metas.len(),
                });
            }
        }
        for (i, content) in contents.iter().enumerate() {
            validate_content(content, i)?;
        }
        if contents.is_empty() {
            return Ok(Vec::new());
        }

        let vectors = self.embedder.embed_batch(contents).await?;
        if vectors.len() != contents.len() {
            return Err(HlcsError::upstream(
                "embedding",
                format!("expected {} vectors, got {}", contents.len(), vectors.len()),
            ));
        }

        let now = Utc::now();
        let metadatas =
            metadatas.unwrap_or_else(|| vec![MemoryMetadata::default(); contents.len()]);
        let entries: Vec<StoredEntry> = contents
            .iter()
            .zip(vectors)
            .zip(metadatas.iter())
            .map(|((content, vector), meta)| StoredEntry {
                id: new_id(),
                vector,
                document: content.clone(),
                metadata: meta.to_store_metadata(now),
            })
            .collect();
        let ids: Vec<String> = entries.iter().map(|e| e.id.clone()).collect();

        let _guard = self.writes.lock().await;
        self.store.upsert_batch(entries).await.map_err(as_storage)?;

        info!(count = ids.len(), "Bulk memories stored");
        Ok(ids)
    }

    /// The `top_k` most relevant records for `query`, best first.
    ///
    /// Every candidate of the `top_k * 2` fetch has its access count
    /// bumped (and may be promoted), including hits the tag filter then
    /// drops. Tags are matched after the fetch, so a selective tag filter
    /// can return fewer than `top_k` results.
    pub async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&RetrievalFilter>,
    ) -> Vec<RetrievalResult> {
        let span = telemetry::retrieval_span(top_k);
        async move {
            if query.trim().is_empty() || top_k == 0 {
                return Vec::new();
            }

            let filter = filter.cloned().unwrap_or_default();
            let pushdown = filter.to_where();
            let fetch = top_k.saturating_mul(self.config.candidate_multiplier.max(1));

            let candidates = match self.vector_candidates(query, fetch, pushdown.as_ref()).await {
                Ok(candidates) => candidates,
                Err(e) => {
                    warn!(error = %e, "Vector search unavailable, matching on content");
                    self.content_candidates(query, fetch, pushdown.as_ref()).await
                }
            };

            tracing::Span::current().record("candidates", candidates.len());

            let candidates: Vec<(MemoryRecord, f32)> = self
                .record_access(candidates)
                .await
                .into_iter()
                .filter(|(record, _)| filter.accepts_tags(record))
                .collect();
            let mut results = rerank(candidates, Utc::now(), &self.config);
            results.truncate(top_k);

            trace!(returned = results.len(), "Retrieval complete");
            results
        }
        .instrument(span)
        .await
    }

    async fn vector_candidates(
        &self,
        query: &str,
        fetch: usize,
        pushdown: Option<&WhereFilter>,
    ) -> HlcsResult<Vec<(MemoryRecord, f32)>> {
        let vector = self.embedder.embed(query).await?;
        let hits = self.store.query(&vector, fetch, pushdown).await?;
        Ok(hits
            .into_iter()
            .map(|hit| {
                let record = MemoryRecord::from_store(&hit.id, &hit.document, &hit.metadata);
                (record, distance_to_similarity(hit.distance))
            })
            .collect())
    }

    /// Degraded search: token overlap against stored documents.
    async fn content_candidates(
        &self,
        query: &str,
        fetch: usize,
        pushdown: Option<&WhereFilter>,
    ) -> Vec<(MemoryRecord, f32)> {
        let entries = match self.store.get(None, pushdown).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "Store unreadable, returning no results");
                return Vec::new();
            }
        };

        let needle = query.trim().to_lowercase();
        let query_tokens = tokenize(query);

        let mut matches: Vec<(MemoryRecord, f32)> = entries
            .into_iter()
            .filter_map(|entry| {
                let haystack = entry.document.to_lowercase();
                let similarity = if haystack.contains(&needle) {
                    0.5
                } else {
                    let doc_tokens = tokenize(&entry.document);
                    let shared = query_tokens
                        .iter()
                        .filter(|t| doc_tokens.contains(t))
                        .count();
                    0.5 * shared as f32 / query_tokens.len().max(1) as f32
                };
                (similarity > 0.0).then(|| {
                    (
                        MemoryRecord::from_store(&entry.id, &entry.document, &entry.metadata),
                        similarity,
                    )
                })
            })
            .collect();

        matches.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        matches.truncate(fetch);
        matches
    }

    /// Bump access counts and promote, persisting before returning.
    ///
    /// Counts are re-read under the write lock so concurrent retrievals
    /// never write a smaller value over a larger one.
    async fn record_access(
        &self,
        mut candidates: Vec<(MemoryRecord, f32)>,
    ) -> Vec<(MemoryRecord, f32)> {
        if candidates.is_empty() {
            return candidates;
        }

        let _guard = self.writes.lock().await;

        let ids: Vec<String> = candidates.iter().map(|(r, _)| r.id.clone()).collect();
        let current: HashMap<String, MemoryRecord> = match self.store.get(Some(&ids), None).await {
            Ok(entries) => entries
                .into_iter()
                .map(|e| {
                    let record = MemoryRecord::from_store(&e.id, &e.document, &e.metadata);
                    (e.id, record)
                })
                .collect(),
            Err(_) => HashMap::new(),
        };

        let threshold = self.config.ltm_promotion_threshold;
        for (record, _) in &mut candidates {
            if let Some(latest) = current.get(&record.id) {
                record.access_count = record.access_count.max(latest.access_count);
                if latest.memory_tier == MemoryTier::LongTerm {
                    record.memory_tier = MemoryTier::LongTerm;
                }
            }
            record.access_count = record.access_count.saturating_add(1);

            let mut patch = Metadata::new();
            patch.insert(ACCESS_COUNT.into(), record.access_count.into());
            if record.memory_tier == MemoryTier::ShortTerm && record.access_count >= threshold {
                record.memory_tier = MemoryTier::LongTerm;
                patch.insert(MEMORY_TIER.into(), MemoryTier::LongTerm.as_str().into());
                debug!(memory_id = %record.id, access_count = record.access_count, "Promoted to long-term");
            }

            if let Err(e) = self.store.update(&record.id, patch).await {
                warn!(memory_id = %record.id, error = %e, "Failed to persist access update");
            }
        }
        candidates
    }

    /// Browse by metadata only. No embedding, no access tracking, every
    /// result scored 1.0.
    pub async fn search_by_metadata(
        &self,
        filter: &RetrievalFilter,
        limit: usize,
    ) -> Vec<RetrievalResult> {
        let entries = match self.store.get(None, filter.to_where().as_ref()).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "Metadata search failed");
                return Vec::new();
            }
        };

        entries
            .iter()
            .map(|e| MemoryRecord::from_store(&e.id, &e.document, &e.metadata))
            .filter(|record| filter.accepts_tags(record))
            .take(limit)
            .map(|record| RetrievalResult {
                record,
                similarity: 1.0,
                score: 1.0,
            })
            .collect()
    }

    /// Promote and expire short-term records.
    ///
    /// A record is promoted if it reached the access threshold or has
    /// high confidence; otherwise it is deleted once older than the TTL.
    /// Records whose timestamp does not parse are left alone.
    pub async fn consolidate(&self) -> HlcsResult<ConsolidationReport> {
        let span = telemetry::consolidation_span();
        async move {
            let _guard = self.writes.lock().await;

            let short_term = WhereFilter::new().eq(MEMORY_TIER, MemoryTier::ShortTerm.as_str());
            let entries = match self.store.get(None, Some(&short_term)).await {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(error = %e, "Cannot read store, skipping consolidation");
                    return Ok(ConsolidationReport::default());
                }
            };

            let now = Utc::now();
            let mut report = ConsolidationReport::default();
            let mut expired_ids = Vec::new();

            for entry in &entries {
                let record = MemoryRecord::from_store(&entry.id, &entry.document, &entry.metadata);
                let promote = record.access_count >= self.config.ltm_promotion_threshold
                    || record.confidence_score >= self.config.high_confidence_promotion;

                if promote {
                    let mut patch = Metadata::new();
                    patch.insert(MEMORY_TIER.into(), MemoryTier::LongTerm.as_str().into());
                    self.store
                        .update(&record.id, patch)
                        .await
                        .map_err(as_storage)?;
                    report.promoted += 1;
                    debug!(memory_id = %record.id, "Promoted to long-term");
                    continue;
                }

                match record.age_hours(now) {
                    Some(hours) if hours > self.config.stm_ttl_hours => {
                        expired_ids.push(record.id.clone());
                    }
                    Some(_) => {}
                    None => warn!(memory_id = %record.id, "Unparseable timestamp, not expiring"),
                }
            }

            if !expired_ids.is_empty() {
                report.expired = self.store.delete(&expired_ids).await.map_err(as_storage)?;
            }

            let span = tracing::Span::current();
            span.record("promoted", report.promoted);
            span.record("expired", report.expired);
            info!(
                promoted = report.promoted,
                expired = report.expired,
                "Consolidation complete"
            );
            Ok(report)
        }
        .instrument(span)
        .await
    }

    /// Fetch one record without touching its access count.
    pub async fn get(&self, id: &str) -> Option<MemoryRecord> {
        let ids = [id.to_string()];
        match self.store.get(Some(&ids), None).await {
            Ok(entries) => entries
                .first()
                .map(|e| MemoryRecord::from_store(&e.id, &e.document, &e.metadata)),
            Err(e) => {
                warn!(memory_id = %id, error = %e, "Lookup failed");
                None
            }
        }
    }

    /// Explicitly correct a record's confidence, clamped to [0, 1].
    pub async fn correct_confidence(&self, id: &str, confidence: f32) -> HlcsResult<()> {
        let mut patch = Metadata::new();
        patch.insert(CONFIDENCE.into(), confidence.clamp(0.0, 1.0).into());

        let _guard = self.writes.lock().await;
        self.store.update(id, patch).await?;
        info!(memory_id = %id, confidence, "Confidence corrected");
        Ok(())
    }

    /// Permanently remove a record. Returns whether it existed.
    pub async fn delete(&self, id: &str) -> HlcsResult<bool> {
        let _guard = self.writes.lock().await;
        let removed = self
            .store
            .delete(&[id.to_string()])
            .await
            .map_err(as_storage)?;
        debug!(memory_id = %id, removed, "Memory deleted");
        Ok(removed > 0)
    }

    /// Remove every record. Returns how many were removed.
    pub async fn clear_all(&self) -> HlcsResult<usize> {
        let _guard = self.writes.lock().await;
        let ids: Vec<String> = self
            .store
            .get(None, None)
            .await
            .map_err(as_storage)?
            .into_iter()
            .map(|e| e.id)
            .collect();
        let removed = self.store.delete(&ids).await.map_err(as_storage)?;
        warn!(removed, "All memories cleared");
        Ok(removed)
    }

    pub async fn len(&self) -> usize {
        self.store.count().await.unwrap_or(0)
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Counts by tier and knowledge type.
    pub async fn stats(&self) -> MemoryStats {
        let mut stats = MemoryStats {
            store: self.store.name().to_string(),
            ..MemoryStats::default()
        };
        let entries = match self.store.get(None, None).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "Stats unavailable");
                return stats;
            }
        };

        for entry in &entries {
            let record = MemoryRecord::from_store(&entry.id, &entry.document, &entry.metadata);
            match record.memory_tier {
                MemoryTier::ShortTerm => stats.short_term += 1,
                MemoryTier::LongTerm => stats.long_term += 1,
            }
            match record.knowledge_type {
                KnowledgeType::Episodic => stats.episodic += 1,
                KnowledgeType::Semantic => stats.semantic += 1,
                KnowledgeType::Procedural => stats.procedural += 1,
            }
        }
        stats.total = entries.len();
        stats
    }
}

#[async_trait]
impl ContextRetriever for KnowledgeMemory {
    async fn search(&self, query: &str, k: usize) -> HlcsResult<Vec<String>> {
        Ok(self
            .retrieve(query, k, None)
            .await
            .into_iter()
            .map(|r| r.record.content)
            .collect())
    }

    fn name(&self) -> &str {
        "knowledge_memory"
    }
}

fn new_id() -> String {
    format!("mem_{}", Uuid::new_v4().simple())
}

fn validate_content(content: &str, index: usize) -> HlcsResult<()> {
    if content.trim().is_empty() {
        return Err(HlcsError::invalid(format!(
            "content at index {index} is empty"
        )));
    }
    Ok(())
}

fn as_storage(err: HlcsError) -> HlcsError {
    match err {
        HlcsError::Storage(_) | HlcsError::NotFound { .. } => err,
        other => HlcsError::Storage(other.to_string()),
    }
}
