use async_trait::async_trait;

use crate::agents::FilterStage;
use crate::agents::prompts::PromptLibrary;
use crate::error::PipelineError;
use crate::llm::StructuredLlmClient;
use crate::log_debug;
use crate::types::{FilterResult, Tender};

/// Classifies tenders by relevance at a precise (low) temperature
#[derive(Clone)]
pub struct FilterAgent {
    client: StructuredLlmClient,
    temperature: f32,
}

impl FilterAgent {
    pub fn new(client: StructuredLlmClient, temperature: f32) -> Self {
        Self {
            client,
            temperature,
        }
    }
}

#[async_trait]
impl FilterStage for FilterAgent {
    async fn filter(&self, tender: &Tender) -> Result<FilterResult, PipelineError> {
        let structured = self
            .client
            .generate::<FilterResult>(
                PromptLibrary::filter_system(),
                &PromptLibrary::filter_prompt(tender),
                self.temperature,
            )
            .await?;

        log_debug!(
            "Filter for {}: relevant={} confidence={:.2} ({} attempt(s))",
            tender.id,
            structured.value.is_relevant,
            structured.value.confidence,
            structured.attempts
        );
        Ok(structured.value)
    }
}
