//! In-memory vector index
//!
//! One `VectorIndex` holds the embedded chunks of a single document and
//! answers cosine-similarity queries. Indexes are session-scoped and
//! cheap to rebuild, so the `IndexPool` keeps a bounded LRU of them and
//! rebuilds transparently on miss.

use crate::chunker::TextChunk;
use resumatch_common::errors::{AppError, Result};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// A chunk with its retrieval score, higher is more similar
#[derive(Clone, Debug)]
pub struct ScoredChunk {
    pub chunk: TextChunk,
    pub score: f32,
}

struct Entry {
    chunk: TextChunk,
    vector: Vec<f32>,
}

/// Flat cosine-similarity index over one document's chunks
pub struct VectorIndex {
    entries: Vec<Entry>,
    dimension: usize,
    model_version: String,
}

impl VectorIndex {
    /// Build an index from chunks and their embeddings. Vector count and
    /// dimensions must be consistent; queries against a different model
    /// version are rejected rather than silently mis-scored.
    pub fn build(
        chunks: Vec<TextChunk>,
        vectors: Vec<Vec<f32>>,
        model_version: String,
    ) -> Result<Self> {
        if chunks.len() != vectors.len() {
            return Err(AppError::InvalidParameter {
                message: format!(
                    "chunk count {} does not match vector count {}",
                    chunks.len(),
                    vectors.len()
                ),
            });
        }

        let dimension = vectors.first().map(|v| v.len()).unwrap_or(0);
        if vectors.iter().any(|v| v.len() != dimension) {
            return Err(AppError::InvalidParameter {
                message: "all vectors in an index must share one dimension".to_string(),
            });
        }

        let entries = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| Entry { chunk, vector })
            .collect();

        resumatch_common::metrics::record_index_build();
        Ok(Self {
            entries,
            dimension,
            model_version,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn model_version(&self) -> &str {
        &self.model_version
    }

    /// Top-k most similar chunks for a query vector. `k` is clamped to
    /// the index size; ties break toward the earlier chunk.
    pub fn query(&self, query: &[f32], k: usize, query_model_version: &str) -> Result<Vec<ScoredChunk>> {
        if query_model_version != self.model_version {
            return Err(AppError::InvalidParameter {
                message: format!(
                    "query embedded with {} against index built with {}",
                    query_model_version, self.model_version
                ),
            });
        }
        if !self.entries.is_empty() && query.len() != self.dimension {
            return Err(AppError::InvalidParameter {
                message: format!(
                    "query dimension {} does not match index dimension {}",
                    query.len(),
                    self.dimension
                ),
            });
        }

        let mut scored: Vec<ScoredChunk> = self
            .entries
            .iter()
            .map(|entry| ScoredChunk {
                chunk: entry.chunk.clone(),
                score: cosine_similarity(query, &entry.vector),
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk.ordinal.cmp(&b.chunk.ordinal))
        });
        scored.truncate(k.min(self.entries.len()));
        Ok(scored)
    }
}

/// Cosine similarity; zero-magnitude vectors score 0.0
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

struct PoolInner {
    indexes: HashMap<String, Arc<VectorIndex>>,
    /// Least recently used first
    order: Vec<String>,
}

/// Bounded LRU pool of session indexes
pub struct IndexPool {
    inner: Mutex<PoolInner>,
    capacity: usize,
}

impl IndexPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(PoolInner {
                indexes: HashMap::new(),
                order: Vec::new(),
            }),
            capacity: capacity.max(1),
        }
    }

    /// Fetch the index for `key`, building it with `build` on a miss.
    /// Eviction is invisible to callers except as rebuild cost.
    pub async fn get_or_build<F, Fut>(&self, key: &str, build: F) -> Result<Arc<VectorIndex>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<VectorIndex>>,
    {
        {
            let mut inner = self.inner.lock().await;
            if let Some(index) = inner.indexes.get(key).cloned() {
                inner.order.retain(|k| k != key);
                inner.order.push(key.to_string());
                return Ok(index);
            }
        }

        // Built outside the lock; a racing builder for the same key just
        // does redundant work and the last insert wins
        let index = Arc::new(build().await?);

        let mut inner = self.inner.lock().await;
        inner.indexes.insert(key.to_string(), index.clone());
        inner.order.retain(|k| k != key);
        inner.order.push(key.to_string());

        while inner.indexes.len() > self.capacity {
            let evicted = inner.order.remove(0);
            inner.indexes.remove(&evicted);
            resumatch_common::metrics::record_index_eviction();
            debug!(key = %evicted, "Session index evicted");
        }

        Ok(index)
    }

    /// Drop the index cached under `key`, if present. The next
    /// `get_or_build` for the key rebuilds from scratch.
    pub async fn remove(&self, key: &str) {
        let mut inner = self.inner.lock().await;
        if inner.indexes.remove(key).is_some() {
            inner.order.retain(|k| k != key);
            debug!(key, "Session index invalidated");
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.indexes.len()
    }
}
