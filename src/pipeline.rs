//! Tender pipeline orchestration
//!
//! A run moves through `Pending → Filtering → (FilteredOut | Rating) →
//! (RatedLow | Generating) → Complete`, with `Error` reachable from every
//! non-terminal state. Later stages are never invoked once an earlier one
//! has ended the run.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter};
use tracing::Instrument;

use crate::agents::{
    FilterAgent, FilterStage, GenerationStage, GeneratorAgent, RatingAgent, RatingStage,
};
use crate::config::{Config, PipelineConfig};
use crate::error::PipelineError;
use crate::llm::{ChatBackend, OpenAiCompatibleBackend, StructuredLlmClient};
use crate::rag::KnowledgeBase;
use crate::types::{BidDocument, FilterResult, RatingResult, Tender};
use crate::{log_debug, trace_info, trace_warn};

#[derive(
    Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PipelineStatus {
    Pending,
    Filtering,
    FilteredOut,
    Rating,
    RatedLow,
    Generating,
    Complete,
    Error,
}

impl PipelineStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::FilteredOut | Self::RatedLow | Self::Complete | Self::Error
        )
    }

    /// Whether `next` is a legal successor of this state
    pub fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Pending, Self::Filtering)
            | (Self::Filtering, Self::FilteredOut | Self::Rating)
            | (Self::Rating, Self::RatedLow | Self::Generating)
            | (Self::Generating, Self::Complete) => true,
            (from, Self::Error) => !from.is_terminal(),
            _ => false,
        }
    }
}

/// Stage at which a run failed
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PipelineStage {
    Validation,
    Filter,
    Rating,
    Generation,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FailureKind {
    /// The model never produced schema-valid output
    StructuredOutput,
    /// The model backend was unreachable or timed out
    BackendUnavailable,
    /// The tender itself was malformed
    Validation,
}

/// Why a run ended in `Error`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PipelineFailure {
    pub stage: PipelineStage,
    pub kind: FailureKind,
    pub message: String,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_response: Option<String>,
}

impl PipelineFailure {
    pub fn from_error(stage: PipelineStage, error: &PipelineError) -> Self {
        let kind = match error {
            PipelineError::StructuredOutput { .. } => FailureKind::StructuredOutput,
            PipelineError::BackendUnavailable { .. } => FailureKind::BackendUnavailable,
            PipelineError::Validation(_) => FailureKind::Validation,
        };
        Self {
            stage,
            kind,
            message: error.to_string(),
            attempts: error.attempts(),
            last_response: error.last_response().map(ToString::to_string),
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

/// Aggregated outcome of one tender run
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PipelineResult {
    pub tender: Tender,
    pub filter_result: Option<FilterResult>,
    pub rating_result: Option<RatingResult>,
    pub bid_document: Option<BidDocument>,
    pub status: PipelineStatus,
    /// Present iff `status` is `Error`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<PipelineFailure>,
    /// Wall-clock time, serialized as seconds
    #[serde(with = "duration_secs")]
    pub processing_time: Duration,
    pub started_at: DateTime<Utc>,
}

impl PipelineResult {
    fn new(tender: Tender, started_at: DateTime<Utc>) -> Self {
        Self {
            tender,
            filter_result: None,
            rating_result: None,
            bid_document: None,
            status: PipelineStatus::Pending,
            failure: None,
            processing_time: Duration::ZERO,
            started_at,
        }
    }

    pub fn is_error(&self) -> bool {
        self.status == PipelineStatus::Error
    }
}

/// Notified on every state transition of every run
pub trait PipelineObserver: Send + Sync {
    fn on_transition(&self, tender_id: &str, from: PipelineStatus, to: PipelineStatus) {
        let _ = (tender_id, from, to);
    }

    fn on_finished(&self, result: &PipelineResult) {
        let _ = result;
    }
}

/// Observer that ignores every event
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentObserver;

impl PipelineObserver for SilentObserver {}

/// Decision thresholds and batch fan-out
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorSettings {
    pub pursue_threshold: f64,
    pub min_confidence: f64,
    pub max_concurrent_tenders: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from(&PipelineConfig::default())
    }
}

impl From<&PipelineConfig> for OrchestratorSettings {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            pursue_threshold: config.pursue_threshold,
            min_confidence: config.min_confidence,
            max_concurrent_tenders: config.max_concurrent_tenders,
        }
    }
}

/// Bookkeeping for a single run
struct Run<'a> {
    result: PipelineResult,
    observer: &'a dyn PipelineObserver,
}

impl Run<'_> {
    fn advance(&mut self, next: PipelineStatus) {
        let from = self.result.status;
        debug_assert!(
            from.can_transition_to(next),
            "illegal pipeline transition {from} -> {next}"
        );
        log_debug!("{}: {} -> {}", self.result.tender.id, from, next);
        self.result.status = next;
        self.observer
            .on_transition(&self.result.tender.id, from, next);
    }

    fn fail(&mut self, stage: PipelineStage, error: &PipelineError) {
        let fault = if error.is_infrastructure() {
            "infrastructure fault"
        } else {
            "quality fault"
        };
        trace_warn!(
            stage = %stage,
            attempts = error.attempts(),
            "Tender {} failed ({}): {}",
            self.result.tender.id,
            fault,
            error
        );
        self.result.failure = Some(PipelineFailure::from_error(stage, error));
        self.advance(PipelineStatus::Error);
    }

    fn finish(mut self, clock: Instant) -> PipelineResult {
        self.result.processing_time = clock.elapsed();
        trace_info!(
            status = %self.result.status,
            seconds = self.result.processing_time.as_secs_f64(),
            "Tender {} finished",
            self.result.tender.id
        );
        self.observer.on_finished(&self.result);
        self.result
    }
}

/// Sequences the filter, rating and generation stages for each tender
pub struct Orchestrator {
    filter: Arc<dyn FilterStage>,
    rating: Arc<dyn RatingStage>,
    generator: Arc<dyn GenerationStage>,
    settings: OrchestratorSettings,
    observer: Arc<dyn PipelineObserver>,
}

impl Orchestrator {
    pub fn new(
        filter: Arc<dyn FilterStage>,
        rating: Arc<dyn RatingStage>,
        generator: Arc<dyn GenerationStage>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            filter,
            rating,
            generator,
            settings,
            observer: Arc::new(SilentObserver),
        }
    }

    /// Agents backed by the configured OpenAI-compatible server
    pub fn from_config(config: &Config, knowledge_base: Option<Arc<KnowledgeBase>>) -> Self {
        let backend: Arc<dyn ChatBackend> =
            Arc::new(OpenAiCompatibleBackend::from_config(&config.llm));
        Self::with_backend(backend, config, knowledge_base)
    }

    /// Agents sharing one chat backend, configured from `config`
    pub fn with_backend(
        backend: Arc<dyn ChatBackend>,
        config: &Config,
        knowledge_base: Option<Arc<KnowledgeBase>>,
    ) -> Self {
        let client = StructuredLlmClient::from_config(backend, &config.llm);
        let pipeline = &config.pipeline;

        let filter = FilterAgent::new(client.clone(), pipeline.temperature_precise);
        let rating = RatingAgent::new(client.clone(), pipeline.temperature_balanced);
        let mut generator = GeneratorAgent::new(client, pipeline.temperature_creative);
        if let Some(kb) = knowledge_base.filter(|_| config.rag.enabled) {
            generator = generator.with_knowledge_base(
                kb,
                config.rag.num_examples,
                config.rag.min_similarity,
            );
        }

        Self::new(
            Arc::new(filter),
            Arc::new(rating),
            Arc::new(generator),
            OrchestratorSettings::from(pipeline),
        )
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Run one tender to a terminal state. Failures are reported in the
    /// result (status `Error`), never as `Err`.
    pub async fn process(&self, tender: Tender) -> PipelineResult {
        let span = tracing::info_span!("tender", id = %tender.id);
        self.run_stages(tender).instrument(span).await
    }

    async fn run_stages(&self, tender: Tender) -> PipelineResult {
        let clock = Instant::now();
        let mut run = Run {
            result: PipelineResult::new(tender.clone(), Utc::now()),
            observer: self.observer.as_ref(),
        };

        if let Err(e) = tender.validate() {
            run.fail(PipelineStage::Validation, &e);
            return run.finish(clock);
        }

        run.advance(PipelineStatus::Filtering);
        let filter = match self.filter.filter(&tender).await {
            Ok(filter) => filter,
            Err(e) => {
                run.fail(PipelineStage::Filter, &e);
                return run.finish(clock);
            }
        };
        let relevant =
            filter.is_relevant && filter.confidence >= self.settings.min_confidence;
        let categories = filter.categories.clone();
        run.result.filter_result = Some(filter);

        if !relevant {
            run.advance(PipelineStatus::FilteredOut);
            return run.finish(clock);
        }

        run.advance(PipelineStatus::Rating);
        let rating = match self.rating.rate(&tender, &categories).await {
            Ok(rating) => rating,
            Err(e) => {
                run.fail(PipelineStage::Rating, &e);
                return run.finish(clock);
            }
        };
        let pursue = rating.meets(self.settings.pursue_threshold);
        let strengths = rating.strengths.clone();
        run.result.rating_result = Some(rating);

        if !pursue {
            run.advance(PipelineStatus::RatedLow);
            return run.finish(clock);
        }

        run.advance(PipelineStatus::Generating);
        match self
            .generator
            .generate(&tender, &categories, &strengths)
            .await
        {
            Ok(document) => {
                run.result.bid_document = Some(document);
                run.advance(PipelineStatus::Complete);
            }
            Err(e) => run.fail(PipelineStage::Generation, &e),
        }
        run.finish(clock)
    }

    /// Process independent tenders concurrently; results keep input order
    pub async fn process_batch(&self, tenders: Vec<Tender>) -> Vec<PipelineResult> {
        let limit = self.settings.max_concurrent_tenders.max(1);
        log_debug!("Processing batch of {} tender(s), {} at a time", tenders.len(), limit);
        futures::stream::iter(tenders.into_iter().map(|tender| self.process(tender)))
            .buffered(limit)
            .collect()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn terminal_states_have_no_successors() {
        for from in PipelineStatus::iter().filter(|s| s.is_terminal()) {
            for to in PipelineStatus::iter() {
                assert!(!from.can_transition_to(to), "{from} -> {to} should be illegal");
            }
        }
    }

    #[test]
    fn error_is_reachable_from_every_active_state() {
        for from in PipelineStatus::iter().filter(|s| !s.is_terminal()) {
            assert!(from.can_transition_to(PipelineStatus::Error));
        }
    }

    #[test]
    fn pipeline_never_regresses() {
        use PipelineStatus::{Complete, Filtering, Generating, Pending, Rating};
        assert!(Pending.can_transition_to(Filtering));
        assert!(!Rating.can_transition_to(Filtering));
        assert!(!Generating.can_transition_to(Rating));
        assert!(!Pending.can_transition_to(Complete));
        assert!(!Filtering.can_transition_to(Generating));
    }

    #[test]
    fn failure_records_kind_and_last_response() {
        let error = PipelineError::StructuredOutput {
            attempts: 3,
            reason: "bad".into(),
            last_response: Some("{\"oops\": 1}".into()),
        };
        let failure = PipelineFailure::from_error(PipelineStage::Rating, &error);
        assert_eq!(failure.kind, FailureKind::StructuredOutput);
        assert_eq!(failure.attempts, 3);
        assert_eq!(failure.last_response.as_deref(), Some("{\"oops\": 1}"));
    }

    #[test]
    fn processing_time_serializes_as_seconds() {
        let mut result = PipelineResult::new(Tender::new("1", "t", "d", "o"), Utc::now());
        result.processing_time = Duration::from_millis(1500);
        let json = serde_json::to_value(&result).expect("serialize");
        assert_eq!(json["processing_time"], serde_json::json!(1.5));
        assert_eq!(json["status"], serde_json::json!("pending"));
        let back: PipelineResult = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back.processing_time, Duration::from_millis(1500));
    }
}
