//! Episodic buffer: a bounded log of query/answer turns.
//!
//! The buffer is a strict FIFO capped at `max_size`; inserting into a full
//! buffer evicts the oldest episode first. It is independent of the vector
//! store and persists as a whole-buffer JSON snapshot:
//!
//! ```json
//! { "episodes": [...], "stats": {...}, "saved_at": "2026-01-01T00:00:00Z" }
//! ```
//!
//! Snapshots are written to `<path>.tmp` and renamed into place, so the
//! file on disk is always either the previous or the new complete state.
//! Embeddings are never written; they live only in memory.

use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::BufferConfig;
use crate::error::{HlcsError, HlcsResult};
use crate::vector::Vector;

/// One interaction turn. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    /// First 12 hex chars of SHA-256(query, answer, timestamp).
    pub id: String,
    pub query: String,
    pub answer: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    #[serde(skip)]
    pub embedding: Option<Vector>,
}

impl Episode {
    pub fn new(query: impl Into<String>, answer: impl Into<String>) -> Self {
        let query = query.into();
        let answer = answer.into();
        let timestamp = Utc::now();
        Self {
            id: episode_id(&query, &answer, &timestamp),
            query,
            answer,
            timestamp,
            session_id: None,
            user_id: None,
            metadata: BTreeMap::new(),
            embedding: None,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_metadata(mut self, metadata: BTreeMap<String, serde_json::Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_embedding(mut self, embedding: Vector) -> Self {
        self.embedding = Some(embedding);
        self
    }
}

/// `<path>.tmp`, next to the target.
fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

fn episode_id(query: &str, answer: &str, timestamp: &DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(query.as_bytes());
    hasher.update(answer.as_bytes());
    hasher.update(timestamp.to_rfc3339_opts(SecondsFormat::Micros, true).as_bytes());
    let mut id = hex::encode(hasher.finalize());
    id.truncate(12);
    id
}

/// Persisted counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferStats {
    /// Episodes added since creation or the last `clear`.
    pub total_episodes: u64,
    pub saves: u64,
    pub loads: u64,
}

/// Counters plus current occupancy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BufferReport {
    #[serde(flatten)]
    pub stats: BufferStats,
    pub current_episodes: usize,
    pub max_size: usize,
    pub usage_percent: f64,
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    episodes: &'a [Episode],
    stats: BufferStats,
    saved_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct Snapshot {
    #[serde(default)]
    episodes: Vec<Episode>,
    #[serde(default)]
    stats: BufferStats,
    saved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct BufferState {
    episodes: VecDeque<Episode>,
    stats: BufferStats,
}

/// Bounded, optionally persisted FIFO of episodes.
#[derive(Debug)]
pub struct EpisodicBuffer {
    config: BufferConfig,
    state: RwLock<BufferState>,
    // serializes snapshot writes so two saves never share the temp file
    save_lock: Mutex<()>,
}

impl EpisodicBuffer {
    /// Empty buffer. `max_size` is raised to at least 1.
    pub fn new(mut config: BufferConfig) -> Self {
        config.max_size = config.max_size.max(1);
        config.auto_save_every = config.auto_save_every.max(1);
        Self {
            config,
            state: RwLock::new(BufferState::default()),
            save_lock: Mutex::new(()),
        }
    }

    /// Buffer pre-loaded from `persist_path` when that file exists.
    pub async fn open(config: BufferConfig) -> Self {
        let buffer = Self::new(config);
        if let Some(path) = buffer.config.persist_path.clone() {
            if fs::try_exists(&path).await.unwrap_or(false) {
                buffer.load(Some(&path)).await;
            }
        }
        buffer
    }

    pub fn config(&self) -> &BufferConfig {
        &self.config
    }

    /// Append a turn, evicting the oldest if full.
    pub async fn add(
        &self,
        query: impl Into<String>,
        answer: impl Into<String>,
        session_id: Option<&str>,
        user_id: Option<&str>,
        metadata: Option<BTreeMap<String, serde_json::Value>>,
    ) -> Episode {
        let mut episode = Episode::new(query, answer);
        episode.session_id = session_id.map(String::from);
        episode.user_id = user_id.map(String::from);
        if let Some(metadata) = metadata {
            episode.metadata = metadata;
        }
        self.push(episode).await
    }

    /// Append a turn together with its query embedding.
    pub async fn add_with_embedding(
        &self,
        query: impl Into<String>,
        answer: impl Into<String>,
        embedding: Vector,
    ) -> Episode {
        self.push(Episode::new(query, answer).with_embedding(embedding))
            .await
    }

    /// Append a prepared episode.
    pub async fn push(&self, episode: Episode) -> Episode {
        let total = {
            let mut state = self.state.write().await;
            while state.episodes.len() >= self.config.max_size {
                if let Some(evicted) = state.episodes.pop_front() {
                    debug!(episode_id = %evicted.id, "Evicted oldest episode");
                }
            }
            state.episodes.push_back(episode.clone());
            state.stats.total_episodes += 1;
            state.stats.total_episodes
        };

        debug!(episode_id = %episode.id, total, "Episode added");

        if self.config.auto_save
            && self.config.persist_path.is_some()
            && total % self.config.auto_save_every as u64 == 0
        {
            self.save(None).await;
        }
        episode
    }

    /// The `n` most recent episodes, newest first.
    pub async fn get_recent(&self, n: usize) -> Vec<Episode> {
        let state = self.state.read().await;
        state.episodes.iter().rev().take(n).cloned().collect()
    }

    /// Episodes of one session, oldest first.
    pub async fn get_by_session(&self, session_id: &str) -> Vec<Episode> {
        let state = self.state.read().await;
        state
            .episodes
            .iter()
            .filter(|e| e.session_id.as_deref() == Some(session_id))
            .cloned()
            .collect()
    }

    /// Episodes of one user, oldest first.
    pub async fn get_by_user(&self, user_id: &str) -> Vec<Episode> {
        let state = self.state.read().await;
        state
            .episodes
            .iter()
            .filter(|e| e.user_id.as_deref() == Some(user_id))
            .cloned()
            .collect()
    }

    /// Episodes whose embedding is most similar to `query_embedding`.
    ///
    /// With embeddings disabled this is [`EpisodicBuffer::get_recent`].
    /// Episodes without an embedding are skipped.
    pub async fn search_similar(&self, query_embedding: &Vector, top_k: usize) -> Vec<Episode> {
        if !self.config.enable_embeddings {
            warn!("Embeddings not enabled, returning recent episodes");
            return self.get_recent(top_k).await;
        }

        let state = self.state.read().await;
        let mut scored: Vec<(f32, &Episode)> = state
            .episodes
            .iter()
            .filter_map(|e| {
                let sim = e.embedding.as_ref()?.cosine_similarity(query_embedding)?;
                Some((sim, e))
            })
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.into_iter().take(top_k).map(|(_, e)| e.clone()).collect()
    }

    /// Write a snapshot to `path` (or the configured path).
    ///
    /// Never fails loudly: any error is logged and reported as `false`.
    pub async fn save(&self, path: Option<&Path>) -> bool {
        let Some(path) = self.resolve(path) else {
            warn!("No persist path configured, skipping save");
            return false;
        };

        match self.try_save(&path).await {
            Ok(count) => {
                info!(episodes = count, path = %path.display(), "Episodic buffer saved");
                true
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to save episodic buffer");
                false
            }
        }
    }

    async fn try_save(&self, path: &Path) -> HlcsResult<usize> {
        let _saving = self.save_lock.lock().await;

        let (json, count) = {
            let state = self.state.read().await;
            let episodes: Vec<Episode> = state.episodes.iter().cloned().collect();
            let snapshot = SnapshotRef {
                episodes: &episodes,
                stats: state.stats,
                saved_at: Utc::now(),
            };
            (serde_json::to_vec_pretty(&snapshot)?, episodes.len())
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| HlcsError::Storage(format!("Failed to create directory: {}", e)))?;
        }

        let temp_path = temp_path(path);
        fs::write(&temp_path, &json)
            .await
            .map_err(|e| HlcsError::Storage(format!("Failed to write temporary file: {}", e)))?;
        fs::rename(&temp_path, path)
            .await
            .map_err(|e| HlcsError::Storage(format!("Failed to rename file: {}", e)))?;

        self.state.write().await.stats.saves += 1;
        Ok(count)
    }

    /// Replace the buffer with the snapshot at `path` (or the configured
    /// path). Returns `false` if the file is missing or unreadable.
    pub async fn load(&self, path: Option<&Path>) -> bool {
        let Some(path) = self.resolve(path) else {
            warn!("No persist path configured, skipping load");
            return false;
        };
        match self.try_load(&path).await {
            Ok(_) => true,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to load episodic buffer");
                false
            }
        }
    }

    /// Like [`EpisodicBuffer::load`] but reports why a load failed.
    ///
    /// A snapshot larger than `max_size` keeps only its newest episodes.
    pub async fn try_load(&self, path: &Path) -> HlcsResult<usize> {
        let bytes = fs::read(path)
            .await
            .map_err(|e| HlcsError::Storage(format!("Failed to read {}: {}", path.display(), e)))?;
        let snapshot: Snapshot = serde_json::from_slice(&bytes)?;

        let mut episodes: VecDeque<Episode> = snapshot.episodes.into();
        while episodes.len() > self.config.max_size {
            episodes.pop_front();
        }
        let count = episodes.len();

        let mut state = self.state.write().await;
        state.episodes = episodes;
        state.stats = snapshot.stats;
        state.stats.loads += 1;

        info!(
            episodes = count,
            path = %path.display(),
            saved_at = ?snapshot.saved_at,
            "Episodic buffer loaded"
        );
        Ok(count)
    }

    /// Drop every episode. Irreversible.
    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.episodes.clear();
        state.stats.total_episodes = 0;
        warn!("Episodic buffer cleared");
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.episodes.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn stats(&self) -> BufferReport {
        let state = self.state.read().await;
        let current = state.episodes.len();
        BufferReport {
            stats: state.stats,
            current_episodes: current,
            max_size: self.config.max_size,
            usage_percent: (current as f64 / self.config.max_size as f64 * 10_000.0).round()
                / 100.0,
        }
    }

    fn resolve(&self, path: Option<&Path>) -> Option<PathBuf> {
        path.map(Path::to_path_buf)
            .or_else(|| self.config.persist_path.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn buffer(max: usize) -> EpisodicBuffer {
        EpisodicBuffer::new(BufferConfig::default().with_max_size(max))
    }

    #[tokio::test]
    async fn test_fifo_eviction() {
        let buf = buffer(3);
        for i in 0..5 {
            buf.add(format!("q{i}"), format!("a{i}"), None, None, None).await;
        }
        assert_eq!(buf.len().await, 3);

        let recent: Vec<String> = buf.get_recent(10).await.into_iter().map(|e| e.query).collect();
        assert_eq!(recent, vec!["q4", "q3", "q2"]);
    }

    #[tokio::test]
    async fn test_filters_preserve_order() {
        let buf = buffer(10);
        buf.add("a", "1", Some("s1"), Some("u1"), None).await;
        buf.add("b", "2", Some("s2"), Some("u1"), None).await;
        buf.add("c", "3", Some("s1"), Some("u2"), None).await;

        let s1: Vec<String> = buf.get_by_session("s1").await.into_iter().map(|e| e.query).collect();
        assert_eq!(s1, vec!["a", "c"]);
        assert_eq!(buf.get_by_user("u1").await.len(), 2);
        assert!(buf.get_by_user("nobody").await.is_empty());
    }

    #[tokio::test]
    async fn test_episode_id_is_short_hash() {
        let ep = Episode::new("what is rust", "a language");
        assert_eq!(ep.id.len(), 12);
        assert!(ep.id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn test_search_similar_falls_back_to_recent() {
        let buf = buffer(10);
        buf.add("first", "x", None, None, None).await;
        buf.add("second", "y", None, None, None).await;

        let q = Vector::new(vec![1.0, 0.0], "t");
        let found = buf.search_similar(&q, 1).await;
        assert_eq!(found[0].query, "second");
    }

    #[tokio::test]
    async fn test_search_similar_by_embedding() {
        let buf = EpisodicBuffer::new(BufferConfig {
            enable_embeddings: true,
            ..BufferConfig::default()
        });
        buf.add_with_embedding("east", "x", Vector::new(vec![1.0, 0.0], "t")).await;
        buf.add_with_embedding("north", "y", Vector::new(vec![0.0, 1.0], "t")).await;
        buf.add("no embedding", "z", None, None, None).await;

        let found = buf.search_similar(&Vector::new(vec![0.9, 0.1], "t"), 5).await;
        let queries: Vec<&str> = found.iter().map(|e| e.query.as_str()).collect();
        assert_eq!(queries, vec!["east", "north"]);
    }

    #[test]
    fn test_temp_path_appends_suffix() {
        assert_eq!(temp_path(Path::new("a/buffer.json")), PathBuf::from("a/buffer.json.tmp"));
        assert_eq!(temp_path(Path::new("buffer.tmp")), PathBuf::from("buffer.tmp.tmp"));
    }

    #[tokio::test]
    async fn test_save_load_roundtrip_drops_embeddings() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("buffer.json");

        let buf = buffer(10);
        buf.add("q1", "a1", Some("s"), None, None).await;
        buf.add_with_embedding("q2", "a2", Vector::new(vec![1.0], "t")).await;
        assert!(buf.save(Some(&path)).await);
        assert!(!temp_path(&path).exists());

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert!(raw.get("saved_at").is_some());
        assert_eq!(raw["stats"]["total_episodes"], 2);
        assert!(raw["episodes"][1].get("embedding").is_none());

        let fresh = buffer(10);
        assert!(fresh.load(Some(&path)).await);
        let original = buf.get_recent(10).await;
        let loaded = fresh.get_recent(10).await;
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].id, original[0].id);
        assert_eq!(loaded[0].embedding, None);
        assert_eq!(loaded[1].session_id.as_deref(), Some("s"));
        assert_eq!(fresh.stats().await.stats.loads, 1);
    }

    #[tokio::test]
    async fn test_save_without_path_is_false() {
        assert!(!buffer(5).save(None).await);
        assert!(!buffer(5).load(None).await);
    }

    #[tokio::test]
    async fn test_load_corrupt_reports_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, b"{ not json").unwrap();

        let buf = buffer(5);
        buf.add("keep", "me", None, None, None).await;
        assert!(matches!(
            buf.try_load(&path).await,
            Err(HlcsError::Serialization(_))
        ));
        assert!(!buf.load(Some(&path)).await);
        // failed load leaves the buffer untouched
        assert_eq!(buf.len().await, 1);
    }

    #[tokio::test]
    async fn test_auto_save_every_tenth() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("auto.json");
        let buf = EpisodicBuffer::new(BufferConfig::default().with_path(&path));

        for i in 0..9 {
            buf.add(format!("q{i}"), "a", None, None, None).await;
        }
        assert!(!path.exists());
        buf.add("q9", "a", None, None, None).await;
        assert!(path.exists());
        assert_eq!(buf.stats().await.stats.saves, 1);

        let reopened = EpisodicBuffer::open(BufferConfig::default().with_path(&path)).await;
        assert_eq!(reopened.len().await, 10);
    }

    #[tokio::test]
    async fn test_clear_and_stats() {
        let buf = buffer(4);
        buf.add("a", "b", None, None, None).await;
        let report = buf.stats().await;
        assert_eq!(report.current_episodes, 1);
        assert_eq!(report.usage_percent, 25.0);

        buf.clear().await;
        assert!(buf.is_empty().await);
        assert_eq!(buf.stats().await.stats.total_episodes, 0);
    }
}
