//! Text embedding service
//!
//! Turns text into unit-length vectors through a pluggable
//! [`EmbeddingBackend`]. Empty-input rejection, batching, normalization and
//! dimension checks live in [`EmbeddingService`], not in the backends.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use regex::Regex;
use serde::Deserialize;

use crate::config::{Config, EmbeddingBackendKind};
use crate::error::{BackendError, RagError, RagResult};
use crate::log_debug;

/// Embedding vector
pub type Embedding = Vec<f32>;

// Lowercase word tokens for the hashing embedder
static WORD_RE: std::sync::LazyLock<Regex> = std::sync::LazyLock::new(|| {
    Regex::new(r"[\p{L}\p{N}]+").expect("Should compile: WORD_RE")
});

/// A model that maps texts to raw (not necessarily normalized) vectors
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Model identifier, part of the determinism contract
    fn model_name(&self) -> &str;

    /// Embed every text, returning vectors in input order
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>, BackendError>;
}

/// Client for an OpenAI-compatible `/embeddings` endpoint
#[derive(Debug, Clone)]
pub struct OpenAiEmbeddings {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

impl OpenAiEmbeddings {
    pub fn new(base_url: &str, model: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: format!("{}/embeddings", base_url.trim_end_matches('/')),
            model: model.into(),
            api_key: api_key.filter(|k| !k.is_empty()),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl EmbeddingBackend for OpenAiEmbeddings {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>, BackendError> {
        let mut builder = self.http.post(&self.endpoint).json(&serde_json::json!({
            "model": self.model,
            "input": texts,
        }));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                status: status.as_u16(),
                body: body.chars().take(500).collect(),
            });
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Malformed(e.to_string()))?;

        // Sort by index to maintain order
        let mut data = parsed.data;
        data.sort_by_key(|d| d.index);
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

/// Deterministic offline embedder based on feature hashing.
///
/// Each lowercase word and each character trigram of a word is hashed
/// (FNV-1a) into one of `dimensions` buckets with a hash-derived sign. Texts
/// sharing vocabulary land close together, which is enough for tests and
/// air-gapped use.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
    name: String,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        let dimensions = dimensions.max(1);
        Self {
            dimensions,
            name: format!("hashing-fnv1a-{dimensions}"),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Raw hashed feature vector for one text
    pub fn vectorize(&self, text: &str) -> Embedding {
        let mut vector = vec![0.0_f32; self.dimensions];
        let lowered = text.to_lowercase();

        for word in WORD_RE.find_iter(&lowered).map(|m| m.as_str()) {
            self.add_feature(&mut vector, word.as_bytes(), 1.0);

            let padded: Vec<char> = format!(" {word} ").chars().collect();
            for gram in padded.windows(3) {
                let gram: String = gram.iter().collect();
                self.add_feature(&mut vector, gram.as_bytes(), 0.5);
            }
        }

        vector
    }

    #[allow(clippy::cast_possible_truncation, clippy::as_conversions)]
    fn add_feature(&self, vector: &mut [f32], feature: &[u8], weight: f32) {
        let hash = fnv1a(feature);
        let bucket = (hash % self.dimensions as u64) as usize;
        let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
        if let Some(slot) = vector.get_mut(bucket) {
            *slot += sign * weight;
        }
    }
}

#[async_trait]
impl EmbeddingBackend for HashingEmbedder {
    fn model_name(&self) -> &str {
        &self.name
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>, BackendError> {
        Ok(texts.iter().map(|t| self.vectorize(t)).collect())
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    bytes.iter().fold(OFFSET, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(PRIME)
    })
}

/// L2 norm of a vector
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Normalize vector to unit length (zero vectors are returned unchanged)
pub fn normalize(v: Embedding) -> Embedding {
    let n = l2_norm(&v);
    if n > 0.0 {
        v.into_iter().map(|x| x / n).collect()
    } else {
        v
    }
}

/// Normalizing, batching front-end over an [`EmbeddingBackend`]
pub struct EmbeddingService {
    backend: Arc<dyn EmbeddingBackend>,
    batch_size: usize,
    dimension: Mutex<Option<usize>>,
}

impl EmbeddingService {
    pub fn new(backend: Arc<dyn EmbeddingBackend>, batch_size: usize) -> Self {
        Self {
            backend,
            batch_size: batch_size.max(1),
            dimension: Mutex::new(None),
        }
    }

    /// Build the backend selected by `rag.embedding_backend`
    pub fn from_config(config: &Config) -> Self {
        let backend: Arc<dyn EmbeddingBackend> = match config.rag.embedding_backend {
            EmbeddingBackendKind::OpenAi => Arc::new(OpenAiEmbeddings::new(
                config.embedding_base_url(),
                config.rag.embedding_model.clone(),
                Some(config.llm.api_key.clone()),
            )),
            EmbeddingBackendKind::Hashing => {
                Arc::new(HashingEmbedder::new(config.rag.hashing_dimensions))
            }
        };
        log_debug!("Embedding backend: {}", backend.model_name());
        Self::new(backend, config.rag.batch_size)
    }

    pub fn model_name(&self) -> &str {
        self.backend.model_name()
    }

    /// Vector length, once the first embedding has been produced
    pub fn dimension(&self) -> Option<usize> {
        *self.dimension.lock()
    }

    /// Embed a single non-empty text
    pub async fn embed(&self, text: &str) -> RagResult<Embedding> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors.pop().ok_or(RagError::CountMismatch {
            expected: 1,
            actual: 0,
        })
    }

    /// Embed texts in order, chunked into backend batches
    pub async fn embed_batch(&self, texts: &[String]) -> RagResult<Vec<Embedding>> {
        if texts.iter().any(|t| t.trim().is_empty()) {
            return Err(RagError::EmptyText);
        }

        let mut out = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size) {
            let vectors = self.backend.embed_batch(chunk).await?;
            if vectors.len() != chunk.len() {
                return Err(RagError::CountMismatch {
                    expected: chunk.len(),
                    actual: vectors.len(),
                });
            }
            for vector in vectors {
                self.check_dimension(vector.len())?;
                out.push(normalize(vector));
            }
        }

        log_debug!("Embedded {} text(s) with {}", out.len(), self.model_name());
        Ok(out)
    }

    fn check_dimension(&self, actual: usize) -> RagResult<()> {
        let mut dimension = self.dimension.lock();
        match *dimension {
            Some(expected) if expected != actual => {
                Err(RagError::DimensionMismatch { expected, actual })
            }
            Some(_) => Ok(()),
            None => {
                *dimension = Some(actual);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_produces_unit_vectors() {
        let v = normalize(vec![3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((l2_norm(&v) - 1.0).abs() < 1e-6);
        assert_eq!(normalize(vec![0.0, 0.0]), vec![0.0, 0.0]);
    }

    #[test]
    fn hashing_is_deterministic_and_case_insensitive() {
        let embedder = HashingEmbedder::new(64);
        assert_eq!(embedder.vectorize("SIEM rollout"), embedder.vectorize("siem ROLLOUT"));
        assert_ne!(embedder.vectorize("siem"), embedder.vectorize("catering"));
    }

    #[test]
    fn fnv1a_matches_reference_values() {
        assert_eq!(fnv1a(b""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(fnv1a(b"a"), 0xaf63_dc4c_8601_ec8c);
    }

    #[tokio::test]
    async fn service_rejects_empty_text() {
        let service = EmbeddingService::new(Arc::new(HashingEmbedder::new(16)), 4);
        assert!(matches!(service.embed("   ").await, Err(RagError::EmptyText)));
    }

    #[tokio::test]
    async fn service_batches_in_order() {
        let embedder = HashingEmbedder::new(32);
        let service = EmbeddingService::new(Arc::new(embedder.clone()), 2);
        let texts: Vec<String> = ["alpha", "beta", "gamma", "delta", "epsilon"]
            .iter()
            .map(ToString::to_string)
            .collect();

        let batch = service.embed_batch(&texts).await.expect("embed");
        assert_eq!(batch.len(), 5);
        for (text, vector) in texts.iter().zip(&batch) {
            assert_eq!(vector, &normalize(embedder.vectorize(text)));
        }
        assert_eq!(service.dimension(), Some(32));
    }

    #[test]
    fn openai_endpoint_is_derived_from_base() {
        let backend = OpenAiEmbeddings::new("http://localhost:1234/v1/", "nomic", None);
        assert_eq!(backend.endpoint(), "http://localhost:1234/v1/embeddings");
    }
}
