//! Similarity-thresholded retrieval and prompt formatting

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::RagResult;
use crate::log_debug;
use crate::rag::embeddings::EmbeddingService;
use crate::rag::index::{MetadataFilter, VectorIndex};

/// Convert an L2 distance between unit vectors into cosine similarity.
///
/// For normalized vectors `d² = 2(1 - cos)`, so identical vectors give 1.0
/// and the result decreases strictly as the distance grows.
pub fn l2_distance_to_similarity(distance: f32) -> f64 {
    let d = f64::from(distance);
    1.0 - d * d / 2.0
}

/// One retrieved document with its similarity to the query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalResult {
    pub id: String,
    pub content: String,
    pub metadata: Map<String, Value>,
    pub similarity: f64,
}

impl RetrievalResult {
    pub fn title(&self) -> Option<&str> {
        self.metadata.get("title").and_then(Value::as_str)
    }

    pub fn category(&self) -> Option<&str> {
        self.metadata.get("category").and_then(Value::as_str)
    }
}

/// Summary of a retrieval's quality
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RetrievalStats {
    pub count: usize,
    pub avg_similarity: f64,
    pub max_similarity: f64,
    pub min_similarity: f64,
    pub categories: Vec<String>,
}

impl RetrievalStats {
    pub fn from_results(results: &[RetrievalResult]) -> Self {
        if results.is_empty() {
            return Self::default();
        }

        let similarities = results.iter().map(|r| r.similarity);
        let sum: f64 = similarities.clone().sum();
        let categories: BTreeSet<String> = results
            .iter()
            .map(|r| r.category().unwrap_or("unknown").to_string())
            .collect();

        #[allow(clippy::cast_precision_loss, clippy::as_conversions)]
        let avg = sum / results.len() as f64;

        Self {
            count: results.len(),
            avg_similarity: avg,
            max_similarity: similarities.clone().fold(f64::NEG_INFINITY, f64::max),
            min_similarity: similarities.fold(f64::INFINITY, f64::min),
            categories: categories.into_iter().collect(),
        }
    }
}

/// Embeds queries and ranks index entries by similarity
pub struct Retriever {
    embeddings: Arc<EmbeddingService>,
    index: Arc<dyn VectorIndex>,
}

impl Retriever {
    pub fn new(embeddings: Arc<EmbeddingService>, index: Arc<dyn VectorIndex>) -> Self {
        Self { embeddings, index }
    }

    /// Up to `k` results with similarity ≥ `min_similarity`, best first.
    /// An empty index or no qualifying hit yields an empty list.
    pub async fn retrieve(
        &self,
        query: &str,
        k: usize,
        min_similarity: f64,
        filter: Option<&MetadataFilter>,
    ) -> RagResult<Vec<RetrievalResult>> {
        if k == 0 || self.index.count() == 0 {
            return Ok(Vec::new());
        }

        let vector = self.embeddings.embed(query).await?;
        let neighbors = self.index.query(&vector, k, filter)?;
        let candidates = neighbors.len();

        let mut results: Vec<RetrievalResult> = neighbors
            .into_iter()
            .map(|n| RetrievalResult {
                similarity: l2_distance_to_similarity(n.distance),
                id: n.entry.id,
                content: n.entry.content,
                metadata: n.entry.metadata,
            })
            .filter(|r| r.similarity >= min_similarity)
            .collect();
        results.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));

        log_debug!(
            "🔍 Retrieved {}/{} candidates above similarity {}",
            results.len(),
            candidates,
            min_similarity
        );
        Ok(results)
    }

    /// Retrieve and format in one call
    pub async fn retrieve_and_format(
        &self,
        query: &str,
        k: usize,
        min_similarity: f64,
        filter: Option<&MetadataFilter>,
    ) -> RagResult<String> {
        let results = self.retrieve(query, k, min_similarity, filter).await?;
        Ok(format_for_prompt(&results))
    }
}

/// Citation-style blocks separated by horizontal rules; empty for no results
pub fn format_for_prompt(results: &[RetrievalResult]) -> String {
    results
        .iter()
        .enumerate()
        .map(|(i, result)| {
            let mut header = format!("### Example {}", i + 1);
            if let Some(title) = result.title() {
                header.push_str(": ");
                header.push_str(title);
            }
            if let Some(category) = result.category() {
                header.push_str(&format!(" [{category}]"));
            }
            format!("{header}\n\n{}", result.content)
        })
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}
