use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::ResolvedEmbedding;
use crate::error::{PipelineError, Result};

/// Produces dense vectors for retrieval. Implementations must be cheap to
/// share behind an `Arc` across pipeline tasks.
#[async_trait]
pub trait EmbeddingGenerator: Send + Sync {
    fn dimension(&self) -> usize;

    /// Embeds one text. `use_cache` is false for corpus backfill, where each
    /// text is seen once and caching would only evict hot query entries.
    async fn embed(&self, text: &str, use_cache: bool) -> Result<Vec<f32>>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn cache_len(&self) -> usize {
        0
    }

    fn clear_cache(&self) {}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub max_entries: usize,
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 2048,
            ttl: Duration::from_secs(3600),
        }
    }
}

struct CacheEntry {
    vector: Vec<f32>,
    created_at: Instant,
}

#[derive(Default)]
struct CacheState {
    map: HashMap<String, CacheEntry>,
    order: VecDeque<String>,
}

/// Bounded TTL cache keyed by exact text. Eviction is insertion-ordered;
/// expired entries are dropped when touched.
pub struct EmbeddingCache {
    config: CacheConfig,
    entries: Mutex<CacheState>,
}

impl EmbeddingCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(CacheState::default()),
        }
    }

    pub fn get(&self, text: &str) -> Option<Vec<f32>> {
        let mut state = self.entries.lock();
        let expired = match state.map.get(text) {
            Some(entry) => entry.created_at.elapsed() > self.config.ttl,
            None => return None,
        };
        if expired {
            state.map.remove(text);
            state.order.retain(|k| k != text);
            return None;
        }
        state.map.get(text).map(|e| e.vector.clone())
    }

    pub fn insert(&self, text: &str, vector: Vec<f32>) {
        if self.config.max_entries == 0 {
            return;
        }
        let mut state = self.entries.lock();
        if let Some(entry) = state.map.get_mut(text) {
            entry.vector = vector;
            entry.created_at = Instant::now();
            return;
        }
        while state.map.len() >= self.config.max_entries {
            match state.order.pop_front() {
                Some(oldest) => {
                    state.map.remove(&oldest);
                }
                None => break,
            }
        }
        state.order.push_back(text.to_string());
        state.map.insert(
            text.to_string(),
            CacheEntry {
                vector,
                created_at: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut state = self.entries.lock();
        state.map.clear();
        state.order.clear();
    }
}

#[derive(Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Deserialize)]
struct EmbeddingRow {
    embedding: Vec<f32>,
    index: usize,
}

/// OpenAI-compatible `/embeddings` client. Works keyless against local
/// runtimes (Ollama and friends); sends a bearer token when one is set.
pub struct HttpEmbeddingClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    dimension: usize,
    max_batch: usize,
    cache: EmbeddingCache,
}

impl HttpEmbeddingClient {
    pub fn new(cfg: &ResolvedEmbedding) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(cfg.timeout).build()?;
        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
            model: cfg.model.clone(),
            dimension: cfg.dimension,
            max_batch: cfg.max_batch.max(1),
            cache: EmbeddingCache::new(cfg.cache.clone()),
        })
    }

    async fn fetch(&self, input: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.base_url);
        let mut request = self.http.post(&url).json(&EmbeddingsRequest {
            model: &self.model,
            input,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(PipelineError::InvalidCredentials(format!(
                "embedding endpoint rejected the request ({status}); check PRETRANSLATOR_EMBEDDING_API_KEY"
            )));
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(PipelineError::RateLimited(format!(
                "embedding endpoint throttled the request ({status})"
            )));
        }
        if !status.is_success() {
            return Err(PipelineError::Transient(format!(
                "embedding request failed with status {status}"
            )));
        }

        let mut body: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::Transient(format!("malformed embeddings response: {e}")))?;
        if body.data.len() != input.len() {
            return Err(PipelineError::Transient(format!(
                "embedding endpoint returned {} vectors for {} inputs",
                body.data.len(),
                input.len()
            )));
        }
        body.data.sort_by_key(|row| row.index);
        let mut vectors = Vec::with_capacity(body.data.len());
        for row in body.data {
            if row.embedding.len() != self.dimension {
                return Err(PipelineError::DimensionMismatch {
                    expected: self.dimension,
                    got: row.embedding.len(),
                });
            }
            vectors.push(row.embedding);
        }
        Ok(vectors)
    }
}

#[async_trait]
impl EmbeddingGenerator for HttpEmbeddingClient {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str, use_cache: bool) -> Result<Vec<f32>> {
        if use_cache {
            if let Some(vector) = self.cache.get(text) {
                return Ok(vector);
            }
        }
        let mut vectors = self.fetch(std::slice::from_ref(&text.to_string())).await?;
        let vector = vectors.pop().ok_or_else(|| {
            PipelineError::Transient("embedding endpoint returned no vector".to_string())
        })?;
        if use_cache {
            self.cache.insert(text, vector.clone());
        }
        Ok(vector)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.max_batch) {
            out.extend(self.fetch(chunk).await?);
        }
        Ok(out)
    }

    fn cache_len(&self) -> usize {
        self.cache.len()
    }

    fn clear_cache(&self) {
        self.cache.clear();
    }
}

/// Deterministic in-memory embedder for tests.
pub struct MockEmbedder {
    dimension: usize,
    canned: Mutex<HashMap<String, Vec<f32>>>,
    fail: AtomicBool,
    calls: AtomicU32,
}

impl MockEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            canned: Mutex::new(HashMap::new()),
            fail: AtomicBool::new(false),
            calls: AtomicU32::new(0),
        }
    }

    pub fn set_embedding(&self, text: &str, vector: Vec<f32>) {
        self.canned.lock().insert(text.to_string(), vector);
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn derive(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        if self.dimension == 0 {
            return vector;
        }
        for (i, byte) in text.bytes().enumerate() {
            vector[i % self.dimension] += f32::from(byte) / 255.0;
        }
        vector
    }
}

#[async_trait]
impl EmbeddingGenerator for MockEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str, _use_cache: bool) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(PipelineError::EmbeddingUnavailable(
                "mock embedder set to fail".to_string(),
            ));
        }
        if let Some(vector) = self.canned.lock().get(text) {
            return Ok(vector.clone());
        }
        Ok(self.derive(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text, false).await?);
        }
        Ok(out)
    }
}
