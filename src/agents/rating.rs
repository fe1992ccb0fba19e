use async_trait::async_trait;

use crate::agents::RatingStage;
use crate::agents::prompts::PromptLibrary;
use crate::error::PipelineError;
use crate::llm::StructuredLlmClient;
use crate::log_debug;
use crate::types::{RatingResult, Tender, TenderCategory};

/// Scores relevant tenders on six independent dimensions
#[derive(Clone)]
pub struct RatingAgent {
    client: StructuredLlmClient,
    temperature: f32,
}

impl RatingAgent {
    pub fn new(client: StructuredLlmClient, temperature: f32) -> Self {
        Self {
            client,
            temperature,
        }
    }
}

#[async_trait]
impl RatingStage for RatingAgent {
    async fn rate(
        &self,
        tender: &Tender,
        categories: &[TenderCategory],
    ) -> Result<RatingResult, PipelineError> {
        let structured = self
            .client
            .generate::<RatingResult>(
                PromptLibrary::rating_system(),
                &PromptLibrary::rating_prompt(tender, categories),
                self.temperature,
            )
            .await?;

        log_debug!(
            "Rating for {}: overall={:.1} ({} attempt(s))",
            tender.id,
            structured.value.overall_score,
            structured.attempts
        );
        Ok(structured.value)
    }
}
