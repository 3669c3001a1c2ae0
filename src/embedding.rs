//! Embedding providers.
//!
//! The engine treats embedding as an opaque service behind
//! [`EmbeddingProvider`]. When no model is available the
//! [`HashingEmbedder`] stands in: a feature-hashing bag of words that is
//! deterministic for identical input, which is all retrieval needs to
//! keep working offline.

use async_trait::async_trait;

use crate::error::{HlcsError, HlcsResult};
use crate::vector::Vector;

/// Maps text to fixed-width vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> HlcsResult<Vector>;

    /// Embed many texts in one call. Providers with a batch endpoint
    /// should override this.
    async fn embed_batch(&self, texts: &[String]) -> HlcsResult<Vec<Vector>> {
        futures::future::try_join_all(texts.iter().map(|text| self.embed(text))).await
    }

    fn dimensions(&self) -> usize;

    fn model(&self) -> &str;

    fn is_available(&self) -> bool {
        true
    }
}

/// Deterministic feature-hashing embedder.
///
/// Tokens are lowercased alphanumeric runs; each token and each adjacent
/// token pair is hashed with FNV-1a into one of `dimensions` buckets with
/// a sign bit, then the vector is L2-normalised. Text with no
/// alphanumeric runs hashes its non-whitespace characters instead, so only
/// blank text maps to the zero vector.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
    model: String,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
            model: format!("hashing-{}", dimensions.max(1)),
        }
    }

    /// Synchronous embedding, shared by the async trait methods.
    pub fn embed_text(&self, text: &str) -> Vector {
        let mut data = vec![0.0f32; self.dimensions];
        let tokens = tokenize(text);

        for token in &tokens {
            self.accumulate(&mut data, token.as_bytes(), 1.0);
        }
        for pair in tokens.windows(2) {
            let joined = format!("{} {}", pair[0], pair[1]);
            self.accumulate(&mut data, joined.as_bytes(), 0.5);
        }
        if tokens.is_empty() {
            // Symbol-only text ("?!", "+++") still needs a non-zero vector.
            let symbols: Vec<char> = text.chars().filter(|c| !c.is_whitespace()).collect();
            let mut buf = [0u8; 4];
            for symbol in &symbols {
                self.accumulate(&mut data, symbol.encode_utf8(&mut buf).as_bytes(), 1.0);
            }
            for pair in symbols.windows(2) {
                let joined: String = pair.iter().collect();
                self.accumulate(&mut data, joined.as_bytes(), 0.5);
            }
        }

        let norm: f32 = data.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut data {
                *v /= norm;
            }
        }
        Vector::new(data, self.model.clone())
    }

    fn accumulate(&self, data: &mut [f32], bytes: &[u8], weight: f32) {
        let hash = fnv1a(bytes);
        let bucket = (hash % self.dimensions as u64) as usize;
        let sign = if (hash >> 63) & 1 == 0 { 1.0 } else { -1.0 };
        data[bucket] += sign * weight;
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(384)
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    async fn embed(&self, text: &str) -> HlcsResult<Vector> {
        Ok(self.embed_text(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> HlcsResult<Vec<Vector>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Null embedder: always fails, so reads take their degraded path.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableEmbedder;

#[async_trait]
impl EmbeddingProvider for UnavailableEmbedder {
    async fn embed(&self, _text: &str) -> HlcsResult<Vector> {
        Err(HlcsError::upstream("embedding", "no embedding model loaded"))
    }

    fn dimensions(&self) -> usize {
        0
    }

    fn model(&self) -> &str {
        "unavailable"
    }

    fn is_available(&self) -> bool {
        false
    }
}

pub(crate) fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    bytes.iter().fold(OFFSET, |hash, &b| (hash ^ b as u64).wrapping_mul(PRIME))
}
