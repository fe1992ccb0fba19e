//! Retrieval-augmented generation: embeddings, vector index, retriever and
//! the knowledge base that ties them together

pub mod embeddings;
pub mod index;
pub mod knowledge_base;
pub mod retriever;

pub use embeddings::{
    Embedding, EmbeddingBackend, EmbeddingService, HashingEmbedder, OpenAiEmbeddings,
};
pub use index::{InMemoryIndex, IndexEntry, MetadataFilter, Neighbor, PersistentIndex, VectorIndex};
pub use knowledge_base::{KnowledgeBase, KnowledgeExample, KnowledgeStats};
pub use retriever::{
    RetrievalResult, RetrievalStats, Retriever, format_for_prompt, l2_distance_to_similarity,
};
