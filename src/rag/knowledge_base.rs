//! Knowledge base of exemplar bid documents
//!
//! High-level API over the embedding service, a vector index and the
//! retriever: add, bulk import/export, search and prompt-ready context.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::Config;
use crate::error::{RagError, RagResult};
use crate::log_debug;
use crate::rag::embeddings::EmbeddingService;
use crate::rag::index::{InMemoryIndex, IndexEntry, MetadataFilter, PersistentIndex, VectorIndex};
use crate::rag::retriever::{RetrievalResult, Retriever, format_for_prompt};

const CATEGORY_KEY: &str = "category";
const TITLE_KEY: &str = "title";

fn default_category() -> String {
    "unknown".to_string()
}

fn default_title() -> String {
    "Untitled".to_string()
}

/// A high-quality example document, in import/export form
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct KnowledgeExample {
    /// Generated (`kb_<uuid>`) when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub content: String,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default = "default_title")]
    pub title: String,
    /// Arbitrary extra fields (year, success rate, ...)
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl KnowledgeExample {
    pub fn new(
        title: impl Into<String>,
        category: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            content: content.into(),
            category: category.into(),
            title: title.into(),
            metadata: Map::new(),
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// `title` and `category` are stored alongside user metadata in the index
    fn check_metadata(&self) -> RagResult<()> {
        match [TITLE_KEY, CATEGORY_KEY]
            .into_iter()
            .find(|key| self.metadata.contains_key(*key))
        {
            Some(key) => Err(RagError::ReservedMetadataKey {
                example: self.id.clone().unwrap_or_else(|| self.title.clone()),
                key: key.to_string(),
            }),
            None => Ok(()),
        }
    }

    fn index_metadata(&self) -> Map<String, Value> {
        let mut metadata = self.metadata.clone();
        metadata.insert(CATEGORY_KEY.into(), Value::String(self.category.clone()));
        metadata.insert(TITLE_KEY.into(), Value::String(self.title.clone()));
        metadata
    }

    fn from_entry(entry: IndexEntry) -> Self {
        let mut metadata = entry.metadata;
        let category = take_string(&mut metadata, CATEGORY_KEY).unwrap_or_else(default_category);
        let title = take_string(&mut metadata, TITLE_KEY).unwrap_or_else(default_title);
        Self {
            id: Some(entry.id),
            content: entry.content,
            category,
            title,
            metadata,
        }
    }
}

fn take_string(metadata: &mut Map<String, Value>, key: &str) -> Option<String> {
    match metadata.remove(key) {
        Some(Value::String(s)) => Some(s),
        _ => None,
    }
}

/// Document counts overall and per category
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct KnowledgeStats {
    pub total_documents: usize,
    pub categories: BTreeMap<String, usize>,
}

pub struct KnowledgeBase {
    embeddings: Arc<EmbeddingService>,
    index: Arc<dyn VectorIndex>,
    retriever: Retriever,
}

impl KnowledgeBase {
    pub fn new(embeddings: Arc<EmbeddingService>, index: Arc<dyn VectorIndex>) -> Self {
        let retriever = Retriever::new(Arc::clone(&embeddings), Arc::clone(&index));
        Self {
            embeddings,
            index,
            retriever,
        }
    }

    pub fn in_memory(embeddings: Arc<EmbeddingService>) -> Self {
        Self::new(embeddings, Arc::new(InMemoryIndex::new()))
    }

    /// Knowledge base persisted under `dir`
    pub fn open(embeddings: Arc<EmbeddingService>, dir: &Path) -> RagResult<Self> {
        let index = PersistentIndex::open(dir)?;
        log_debug!(
            "Opened knowledge base at {} ({} documents)",
            dir.display(),
            index.count()
        );
        Ok(Self::new(embeddings, Arc::new(index)))
    }

    /// Persistent when `rag.knowledge_base_path` is set, in-memory otherwise
    pub fn from_config(config: &Config) -> RagResult<Self> {
        let embeddings = Arc::new(EmbeddingService::from_config(config));
        match &config.rag.knowledge_base_path {
            Some(dir) => Self::open(embeddings, dir),
            None => Ok(Self::in_memory(embeddings)),
        }
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    /// Embed and store one example, returning its id
    pub async fn add_example(&self, example: KnowledgeExample) -> RagResult<String> {
        let mut ids = self.add_examples(vec![example]).await?;
        Ok(ids.pop().unwrap_or_default())
    }

    /// Embed all examples in one batched pass and store them in order
    pub async fn add_examples(&self, examples: Vec<KnowledgeExample>) -> RagResult<Vec<String>> {
        if examples.is_empty() {
            return Ok(Vec::new());
        }
        examples.iter().try_for_each(KnowledgeExample::check_metadata)?;

        let texts: Vec<String> = examples.iter().map(|e| e.content.clone()).collect();
        let vectors = self.embeddings.embed_batch(&texts).await?;

        let entries: Vec<IndexEntry> = examples
            .into_iter()
            .zip(vectors)
            .map(|(example, vector)| IndexEntry {
                id: example
                    .id
                    .clone()
                    .filter(|id| !id.trim().is_empty())
                    .unwrap_or_else(|| format!("kb_{}", uuid::Uuid::new_v4().simple())),
                metadata: example.index_metadata(),
                content: example.content,
                vector,
            })
            .collect();

        let ids: Vec<String> = entries.iter().map(|e| e.id.clone()).collect();
        self.index.upsert(entries)?;
        log_debug!("Added {} example(s) to the knowledge base", ids.len());
        Ok(ids)
    }

    /// Import a JSON array of examples; returns the number imported
    pub async fn import_from_str(&self, json: &str) -> RagResult<usize> {
        let examples: Vec<KnowledgeExample> = serde_json::from_str(json)?;
        let count = examples.len();
        self.add_examples(examples).await?;
        Ok(count)
    }

    pub async fn import_json(&self, path: &Path) -> RagResult<usize> {
        let content = fs::read_to_string(path)?;
        self.import_from_str(&content).await
    }

    /// Every stored example in insertion order
    pub fn export(&self) -> Vec<KnowledgeExample> {
        self.index
            .entries()
            .into_iter()
            .map(KnowledgeExample::from_entry)
            .collect()
    }

    /// Write the export as pretty JSON; returns the number written
    pub fn export_json(&self, path: &Path) -> RagResult<usize> {
        let examples = self.export();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(&examples)?)?;
        Ok(examples.len())
    }

    pub async fn search(
        &self,
        query: &str,
        k: usize,
        min_similarity: f64,
        category: Option<&str>,
    ) -> RagResult<Vec<RetrievalResult>> {
        let filter = category.map(MetadataFilter::category);
        self.retriever
            .retrieve(query, k, min_similarity, filter.as_ref())
            .await
    }

    /// Formatted reference material for prompt augmentation
    pub async fn context_for(
        &self,
        query: &str,
        k: usize,
        min_similarity: f64,
        category: Option<&str>,
    ) -> RagResult<String> {
        let results = self.search(query, k, min_similarity, category).await?;
        Ok(format_for_prompt(&results))
    }

    pub fn statistics(&self) -> KnowledgeStats {
        let mut stats = KnowledgeStats::default();
        for entry in self.index.entries() {
            let category = entry
                .metadata
                .get(CATEGORY_KEY)
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string();
            *stats.categories.entry(category).or_default() += 1;
            stats.total_documents += 1;
        }
        stats
    }

    pub fn list(&self) -> Vec<KnowledgeExample> {
        self.export()
    }

    pub fn count(&self) -> usize {
        self.index.count()
    }

    pub fn reset(&self) -> RagResult<()> {
        self.index.reset()
    }
}
