use std::sync::Arc;

use async_trait::async_trait;

use crate::agents::GenerationStage;
use crate::agents::prompts::PromptLibrary;
use crate::error::PipelineError;
use crate::llm::StructuredLlmClient;
use crate::rag::{KnowledgeBase, RetrievalResult, format_for_prompt};
use crate::types::{BidDocument, Tender, TenderCategory};
use crate::{log_debug, log_info, log_warn};

/// Retrieval settings used when a knowledge base is attached
#[derive(Clone)]
struct Augmentation {
    knowledge_base: Arc<KnowledgeBase>,
    num_examples: usize,
    min_similarity: f64,
}

/// Writes bid documents, optionally grounded on knowledge-base examples
#[derive(Clone)]
pub struct GeneratorAgent {
    client: StructuredLlmClient,
    temperature: f32,
    augmentation: Option<Augmentation>,
}

impl GeneratorAgent {
    pub fn new(client: StructuredLlmClient, temperature: f32) -> Self {
        Self {
            client,
            temperature,
            augmentation: None,
        }
    }

    /// Prepend up to `num_examples` examples with similarity ≥ `min_similarity`
    #[must_use]
    pub fn with_knowledge_base(
        mut self,
        knowledge_base: Arc<KnowledgeBase>,
        num_examples: usize,
        min_similarity: f64,
    ) -> Self {
        self.augmentation = Some(Augmentation {
            knowledge_base,
            num_examples,
            min_similarity,
        });
        self
    }

    pub fn is_augmented(&self) -> bool {
        self.augmentation.is_some()
    }

    /// Reference examples for this tender; failures degrade to none
    async fn references(
        &self,
        tender: &Tender,
        categories: &[TenderCategory],
    ) -> Vec<RetrievalResult> {
        let Some(aug) = &self.augmentation else {
            return Vec::new();
        };
        if aug.knowledge_base.count() == 0 {
            return Vec::new();
        }

        let query = PromptLibrary::retrieval_query(tender, categories);
        match aug
            .knowledge_base
            .search(&query, aug.num_examples, aug.min_similarity, None)
            .await
        {
            Ok(results) => results,
            Err(e) => {
                log_warn!(
                    "Retrieval failed for {}, generating without references: {}",
                    tender.id,
                    e
                );
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl GenerationStage for GeneratorAgent {
    async fn generate(
        &self,
        tender: &Tender,
        categories: &[TenderCategory],
        strengths: &[String],
    ) -> Result<BidDocument, PipelineError> {
        let references = self.references(tender, categories).await;
        let reference_material = (!references.is_empty()).then(|| format_for_prompt(&references));
        if reference_material.is_some() {
            log_info!(
                "Augmenting bid for {} with {} reference example(s)",
                tender.id,
                references.len()
            );
        }

        let structured = self
            .client
            .generate::<BidDocument>(
                PromptLibrary::generator_system(),
                &PromptLibrary::generator_prompt(
                    tender,
                    categories,
                    strengths,
                    reference_material.as_deref(),
                ),
                self.temperature,
            )
            .await?;

        let mut document = structured.value;
        document.reference_examples = references
            .iter()
            .map(|r| r.title().unwrap_or(&r.id).to_string())
            .collect();

        log_debug!(
            "Bid document for {} generated in {} attempt(s)",
            tender.id,
            structured.attempts
        );
        Ok(document)
    }
}
