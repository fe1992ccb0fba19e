//! Tender analysis agents
//!
//! Each agent wraps the structured LLM client with a stage-specific prompt
//! and temperature. The orchestrator only sees the stage traits below, so
//! any stage can be replaced (or instrumented) independently.

pub mod filter;
pub mod generator;
pub mod prompts;
pub mod rating;

use async_trait::async_trait;

use crate::error::PipelineError;
use crate::types::{BidDocument, FilterResult, RatingResult, Tender, TenderCategory};

pub use filter::FilterAgent;
pub use generator::GeneratorAgent;
pub use prompts::PromptLibrary;
pub use rating::RatingAgent;

/// Relevance classification stage
#[async_trait]
pub trait FilterStage: Send + Sync {
    async fn filter(&self, tender: &Tender) -> Result<FilterResult, PipelineError>;
}

/// Opportunity rating stage
#[async_trait]
pub trait RatingStage: Send + Sync {
    async fn rate(
        &self,
        tender: &Tender,
        categories: &[TenderCategory],
    ) -> Result<RatingResult, PipelineError>;
}

/// Bid document generation stage
#[async_trait]
pub trait GenerationStage: Send + Sync {
    async fn generate(
        &self,
        tender: &Tender,
        categories: &[TenderCategory],
        strengths: &[String],
    ) -> Result<BidDocument, PipelineError>;
}
