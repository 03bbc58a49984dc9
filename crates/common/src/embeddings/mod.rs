//! Embedding providers
//!
//! The `Embedder` trait is the provider seam: an HTTP-backed model
//! service for production, a deterministic lexical hasher as the
//! degraded fallback, and a seeded mock for tests. `CachingEmbedder`
//! wraps any provider with a process-wide LRU keyed by text hash and
//! model version, and `FallbackEmbedder` pairs a primary provider with
//! the lexical one so retrieval can proceed when the model service is
//! down.

use crate::config::EmbeddingConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

/// Trait for text embedding providers
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of texts, preserving input order
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Model version string, part of the job fingerprint
    fn model_version(&self) -> &str;

    /// Embedding dimension
    fn dimension(&self) -> usize;
}

/// HTTP embedding service client (OpenAI-compatible wire format)
pub struct HttpEmbedder {
    client: reqwest::Client,
    api_base: String,
    api_key: Option<String>,
    model: String,
    dimension: usize,
    max_retries: u32,
    batch_size: usize,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

impl HttpEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_base: config
                .api_base
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            dimension: config.dimension,
            max_retries: config.max_retries,
            batch_size: config.batch_size.max(1),
        })
    }

    async fn request_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.api_base);
        let body = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };

        let mut last_error: Option<AppError> = None;
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_millis(100 * 2u64.pow(attempt - 1));
                tokio::time::sleep(delay).await;
                debug!(attempt, "Retrying embedding request");
            }

            let mut request = self.client.post(&url).json(&body);
            if let Some(key) = &self.api_key {
                request = request.bearer_auth(key);
            }

            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    let parsed: EmbeddingResponse = response.json().await?;
                    let mut vectors = vec![Vec::new(); texts.len()];
                    for item in parsed.data {
                        if item.index >= vectors.len() {
                            return Err(AppError::EmbeddingUnavailable {
                                message: format!(
                                    "response index {} out of range for batch of {}",
                                    item.index,
                                    texts.len()
                                ),
                            });
                        }
                        vectors[item.index] = item.embedding;
                    }
                    if vectors.iter().any(|v| v.len() != self.dimension) {
                        return Err(AppError::EmbeddingUnavailable {
                            message: format!(
                                "embedding dimension mismatch, expected {}",
                                self.dimension
                            ),
                        });
                    }
                    return Ok(vectors);
                }
                Ok(response) => {
                    let status = response.status();
                    let text = response.text().await.unwrap_or_default();
                    last_error = Some(AppError::EmbeddingUnavailable {
                        message: format!("embedding service returned {status}: {text}"),
                    });
                }
                Err(e) => {
                    last_error = Some(AppError::EmbeddingUnavailable {
                        message: format!("embedding request failed: {e}"),
                    });
                }
            }
        }

        Err(last_error.unwrap_or(AppError::EmbeddingUnavailable {
            message: "embedding request failed".to_string(),
        }))
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let vectors = self.request_batch(&[text.to_string()]).await?;
        vectors
            .into_iter()
            .next()
            .ok_or_else(|| AppError::EmbeddingUnavailable {
                message: "empty embedding response".to_string(),
            })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            vectors.extend(self.request_batch(batch).await?);
        }
        Ok(vectors)
    }

    fn model_version(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Deterministic lexical embedder used when the model service is down.
///
/// Tokens are lowercased alphanumeric runs hashed into a fixed number of
/// buckets; the resulting term-frequency vector is L2-normalized so
/// cosine scoring still behaves. Coarse, but it keeps retrieval ordering
/// meaningful for overlapping vocabulary.
pub struct LexicalEmbedder {
    dimension: usize,
}

pub const LEXICAL_MODEL_VERSION: &str = "lexical-fallback";

impl LexicalEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let lowered = token.to_lowercase();
            let mut hasher = std::collections::hash_map::DefaultHasher::new();
            lowered.hash(&mut hasher);
            let bucket = (hasher.finish() % self.dimension as u64) as usize;
            vector[bucket] += 1.0;
        }

        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl Embedder for LexicalEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_one(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn model_version(&self) -> &str {
        LEXICAL_MODEL_VERSION
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Bounded LRU cache of embeddings keyed by text hash and model version
pub struct EmbeddingCache {
    inner: Mutex<CacheInner>,
    capacity: usize,
}

struct CacheInner {
    entries: HashMap<String, Vec<f32>>,
    order: VecDeque<String>,
}

impl EmbeddingCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                order: VecDeque::new(),
            }),
            capacity: capacity.max(1),
        }
    }

    fn key(model_version: &str, text: &str) -> String {
        let hash = hex::encode(Sha256::digest(text.as_bytes()));
        format!("embedding:{model_version}:{hash}")
    }

    pub fn get(&self, model_version: &str, text: &str) -> Option<Vec<f32>> {
        let key = Self::key(model_version, text);
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(vector) = inner.entries.get(&key).cloned() {
            // Refresh recency
            inner.order.retain(|k| k != &key);
            inner.order.push_back(key);
            Some(vector)
        } else {
            None
        }
    }

    pub fn put(&self, model_version: &str, text: &str, vector: Vec<f32>) {
        let key = Self::key(model_version, text);
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.entries.insert(key.clone(), vector).is_none() {
            inner.order.push_back(key);
        }
        while inner.entries.len() > self.capacity {
            if let Some(evicted) = inner.order.pop_front() {
                inner.entries.remove(&evicted);
                crate::metrics::record_embedding_cache_eviction();
            } else {
                break;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Embedder wrapper that consults the cache before the inner provider
pub struct CachingEmbedder {
    inner: Arc<dyn Embedder>,
    cache: Arc<EmbeddingCache>,
}

impl CachingEmbedder {
    pub fn new(inner: Arc<dyn Embedder>, cache: Arc<EmbeddingCache>) -> Self {
        Self { inner, cache }
    }
}

#[async_trait]
impl Embedder for CachingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let model = self.inner.model_version();
        if let Some(vector) = self.cache.get(model, text) {
            crate::metrics::record_embedding_cache_hit();
            return Ok(vector);
        }
        crate::metrics::record_embedding_cache_miss();
        let vector = self.inner.embed(text).await?;
        self.cache.put(model, text, vector.clone());
        Ok(vector)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let model = self.inner.model_version();
        let mut results: Vec<Option<Vec<f32>>> = Vec::with_capacity(texts.len());
        let mut misses: Vec<usize> = Vec::new();

        for (i, text) in texts.iter().enumerate() {
            match self.cache.get(model, text) {
                Some(vector) => {
                    crate::metrics::record_embedding_cache_hit();
                    results.push(Some(vector));
                }
                None => {
                    crate::metrics::record_embedding_cache_miss();
                    results.push(None);
                    misses.push(i);
                }
            }
        }

        if !misses.is_empty() {
            let miss_texts: Vec<String> = misses.iter().map(|&i| texts[i].clone()).collect();
            let vectors = self.inner.embed_batch(&miss_texts).await?;
            for (slot, vector) in misses.into_iter().zip(vectors) {
                self.cache.put(model, &texts[slot], vector.clone());
                results[slot] = Some(vector);
            }
        }

        Ok(results.into_iter().flatten().collect())
    }

    fn model_version(&self) -> &str {
        self.inner.model_version()
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }
}

/// A batch of embeddings tagged with provenance
pub struct EmbeddedBatch {
    pub vectors: Vec<Vec<f32>>,
    pub model_version: String,
    /// True when the lexical fallback produced these vectors
    pub degraded: bool,
}

/// Pairs the primary provider with the lexical fallback.
///
/// A transient primary failure degrades to lexical vectors instead of
/// failing the job; any other error propagates.
pub struct FallbackEmbedder {
    primary: Arc<dyn Embedder>,
    fallback: LexicalEmbedder,
}

impl FallbackEmbedder {
    pub fn new(primary: Arc<dyn Embedder>) -> Self {
        let fallback = LexicalEmbedder::new(primary.dimension());
        Self { primary, fallback }
    }

    /// Model version of the primary provider, used for fingerprinting
    pub fn model_version(&self) -> &str {
        self.primary.model_version()
    }

    pub fn dimension(&self) -> usize {
        self.primary.dimension()
    }

    pub async fn embed_batch(&self, texts: &[String]) -> Result<EmbeddedBatch> {
        match self.primary.embed_batch(texts).await {
            Ok(vectors) => Ok(EmbeddedBatch {
                vectors,
                model_version: self.primary.model_version().to_string(),
                degraded: false,
            }),
            Err(e) if e.is_retryable() => {
                warn!(error = %e, "Primary embedder unavailable, degrading to lexical vectors");
                crate::metrics::record_embedding_fallback();
                let vectors = self.fallback.embed_batch(texts).await?;
                Ok(EmbeddedBatch {
                    vectors,
                    model_version: self.fallback.model_version().to_string(),
                    degraded: true,
                })
            }
            Err(e) => Err(e),
        }
    }

    pub async fn embed(&self, text: &str) -> Result<(Vec<f32>, bool)> {
        let batch = self.embed_batch(std::slice::from_ref(&text.to_string())).await?;
        let vector = batch
            .vectors
            .into_iter()
            .next()
            .ok_or_else(|| AppError::Internal {
                message: "embed produced no vector".to_string(),
            })?;
        Ok((vector, batch.degraded))
    }
}

/// Deterministic mock embedder for tests
pub struct MockEmbedder {
    dimension: usize,
    model: String,
}

impl MockEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            model: "mock-embedder-v1".to_string(),
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        use rand::{rngs::StdRng, Rng, SeedableRng};

        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        text.hash(&mut hasher);
        let mut rng = StdRng::seed_from_u64(hasher.finish());

        let mut vector: Vec<f32> = (0..self.dimension).map(|_| rng.gen_range(-1.0..1.0)).collect();
        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_one(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn model_version(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Create an embedder from configuration
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "http" => Ok(Arc::new(HttpEmbedder::new(config)?)),
        "lexical" => Ok(Arc::new(LexicalEmbedder::new(config.dimension))),
        "mock" => Ok(Arc::new(MockEmbedder::new(config.dimension))),
        other => Err(AppError::Configuration {
            message: format!("unknown embedding provider: {other}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lexical_embedder_deterministic() {
        let embedder = LexicalEmbedder::new(384);
        let a = embedder.embed("Rust systems programming").await.unwrap();
        let b = embedder.embed("Rust systems programming").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 384);
    }

    #[tokio::test]
    async fn test_lexical_embedder_normalized() {
        let embedder = LexicalEmbedder::new(64);
        let v = embedder.embed("some resume text here").await.unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_lexical_embedder_empty_text() {
        let embedder = LexicalEmbedder::new(64);
        let v = embedder.embed("").await.unwrap();
        assert!(v.iter().all(|&x| x == 0.0));
    }

    #[tokio::test]
    async fn test_mock_embedder_deterministic() {
        let embedder = MockEmbedder::new(32);
        let a = embedder.embed("hello").await.unwrap();
        let b = embedder.embed("hello").await.unwrap();
        let c = embedder.embed("world").await.unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_cache_eviction_order() {
        let cache = EmbeddingCache::new(2);
        cache.put("m", "a", vec![1.0]);
        cache.put("m", "b", vec![2.0]);
        // Touch "a" so "b" is the least recently used
        assert!(cache.get("m", "a").is_some());
        cache.put("m", "c", vec![3.0]);

        assert!(cache.get("m", "a").is_some());
        assert!(cache.get("m", "b").is_none());
        assert!(cache.get("m", "c").is_some());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_cache_keys_separate_models() {
        let cache = EmbeddingCache::new(8);
        cache.put("model-a", "text", vec![1.0]);
        assert!(cache.get("model-b", "text").is_none());
    }

    #[tokio::test]
    async fn test_caching_embedder_batch_order_preserved() {
        let cache = Arc::new(EmbeddingCache::new(8));
        let inner = Arc::new(MockEmbedder::new(16));
        let caching = CachingEmbedder::new(inner.clone(), cache);

        // Prime one entry so the batch mixes hits and misses
        caching.embed("b").await.unwrap();

        let texts = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let batch = caching.embed_batch(&texts).await.unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch[0], inner.embed("a").await.unwrap());
        assert_eq!(batch[1], inner.embed("b").await.unwrap());
        assert_eq!(batch[2], inner.embed("c").await.unwrap());
    }

    #[tokio::test]
    async fn test_fallback_not_used_on_success() {
        let primary = Arc::new(MockEmbedder::new(16));
        let fallback = FallbackEmbedder::new(primary);
        let batch = fallback.embed_batch(&["x".to_string()]).await.unwrap();
        assert!(!batch.degraded);
        assert_eq!(batch.model_version, "mock-embedder-v1");
    }

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(AppError::EmbeddingUnavailable {
                message: "down".into(),
            })
        }

        async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Err(AppError::EmbeddingUnavailable {
                message: "down".into(),
            })
        }

        fn model_version(&self) -> &str {
            "failing-v1"
        }

        fn dimension(&self) -> usize {
            16
        }
    }

    #[tokio::test]
    async fn test_fallback_degrades_on_transient_failure() {
        let fallback = FallbackEmbedder::new(Arc::new(FailingEmbedder));
        let batch = fallback
            .embed_batch(&["rust engineer".to_string()])
            .await
            .unwrap();
        assert!(batch.degraded);
        assert_eq!(batch.model_version, LEXICAL_MODEL_VERSION);
        assert_eq!(batch.vectors[0].len(), 16);
    }

    #[test]
    fn test_create_embedder_unknown_provider() {
        let config = EmbeddingConfig {
            provider: "quantum".to_string(),
            ..Default::default()
        };
        assert!(create_embedder(&config).is_err());
    }
}
