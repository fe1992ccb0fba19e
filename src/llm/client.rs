//! Structured LLM client: prompt → JSON → repaired → validated → typed value,
//! with a bounded sequential retry loop that feeds corrections back to the model.

use std::sync::Arc;
use std::time::Duration;

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use tokio_retry::strategy::ExponentialBackoff;

use crate::config::LlmConfig;
use crate::error::{BackendError, PipelineError};
use crate::llm::backend::{ChatBackend, ChatMessage, ChatRequest};
use crate::llm::parser::parse_json_value;
use crate::llm::repair::{AttemptFailure, correction_text};
use crate::llm::schema::OutputSchema;
use crate::{log_debug, log_warn};

/// Longest slice of a raw reply echoed into debug logs
const LOG_PREVIEW_CHARS: usize = 300;

/// A type the model can be asked to produce
pub trait StructuredOutput: DeserializeOwned + JsonSchema + Send {
    /// Field-level constraints the reply must satisfy
    fn output_schema() -> OutputSchema;

    /// Normalization applied after successful deserialization
    #[must_use]
    fn finalize(self) -> Self {
        self
    }
}

/// A validated value together with how it was obtained
#[derive(Debug, Clone)]
pub struct Structured<T> {
    pub value: T,
    /// Backend attempts used, including the successful one
    pub attempts: u32,
    /// Lossless repairs applied to the reply
    pub warnings: Vec<String>,
}

/// Attempt budget, per-call deadline and backoff between attempts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub call_timeout: Duration,
    pub backoff_base: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            call_timeout: Duration::from_secs(120),
            backoff_base: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            max_attempts: config.max_retries.max(1),
            call_timeout: config.timeout(),
            backoff_base: Duration::from_millis(config.retry_backoff_ms),
            ..Self::default()
        }
    }

    /// Policy without waits between attempts
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_base: Duration::ZERO,
            max_backoff: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Delays before the 2nd, 3rd, ... attempt: 2x, 4x, 8x the base, capped
    pub fn backoff(&self) -> impl Iterator<Item = Duration> {
        let base_ms = u64::try_from(self.backoff_base.as_millis()).unwrap_or(u64::MAX);
        ExponentialBackoff::from_millis(2)
            .factor(base_ms)
            .max_delay(self.max_backoff)
    }
}

/// Client that turns free-form model replies into schema-valid values
#[derive(Clone)]
pub struct StructuredLlmClient {
    backend: Arc<dyn ChatBackend>,
    policy: RetryPolicy,
    max_tokens: u32,
}

impl StructuredLlmClient {
    pub fn new(backend: Arc<dyn ChatBackend>, policy: RetryPolicy, max_tokens: u32) -> Self {
        Self {
            backend,
            policy,
            max_tokens,
        }
    }

    pub fn from_config(backend: Arc<dyn ChatBackend>, config: &LlmConfig) -> Self {
        Self::new(backend, RetryPolicy::from_config(config), config.max_tokens)
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Ask the backend for a `T`, re-prompting with corrections until the
    /// reply validates or the attempt budget is spent.
    pub async fn generate<T: StructuredOutput>(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        temperature: f32,
    ) -> Result<Structured<T>, PipelineError> {
        let schema = T::output_schema();
        let base = vec![
            ChatMessage::system(system_prompt),
            ChatMessage::user(build_structured_prompt::<T>(&schema, user_prompt)),
        ];

        let max_attempts = self.policy.max_attempts.max(1);
        let mut delays = self.policy.backoff();
        let mut messages = base.clone();
        let mut last_response: Option<String> = None;
        let mut last_failure: Option<AttemptFailure> = None;

        for attempt in 1..=max_attempts {
            if attempt > 1
                && let Some(delay) = delays.next()
                && !delay.is_zero()
            {
                log_debug!("⏳ Waiting {:?} before attempt {}", delay, attempt);
                tokio::time::sleep(delay).await;
            }

            log_debug!(
                "🤖 {} attempt {}/{} via {}",
                schema.name,
                attempt,
                max_attempts,
                self.backend.name()
            );

            let request = ChatRequest {
                messages: messages.clone(),
                temperature,
                max_tokens: self.max_tokens,
            };

            let reply = match tokio::time::timeout(
                self.policy.call_timeout,
                self.backend.complete(&request),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(BackendError::Timeout(self.policy.call_timeout)),
            };

            let failure = match reply {
                Err(e) => {
                    log_warn!(
                        "infrastructure fault on {} attempt {}/{}: {}",
                        schema.name,
                        attempt,
                        max_attempts,
                        e
                    );
                    AttemptFailure::Backend(e)
                }
                Ok(text) => match parse_structured::<T>(&schema, &text) {
                    Ok((value, warnings)) => {
                        for warning in &warnings {
                            log_debug!("🔧 {}: {}", schema.name, warning);
                        }
                        log_debug!("✅ {} validated on attempt {}", schema.name, attempt);
                        return Ok(Structured {
                            value,
                            attempts: attempt,
                            warnings,
                        });
                    }
                    Err(failure) => {
                        log_warn!(
                            "quality fault on {} attempt {}/{}: {}",
                            schema.name,
                            attempt,
                            max_attempts,
                            failure
                        );
                        log_debug!(
                            "Rejected reply: {}",
                            text.chars().take(LOG_PREVIEW_CHARS).collect::<String>()
                        );
                        messages.clone_from(&base);
                        messages.push(ChatMessage::assistant(text.clone()));
                        messages.push(ChatMessage::user(correction_text(&schema, &failure)));
                        last_response = Some(text);
                        failure
                    }
                },
            };
            last_failure = Some(failure);
        }

        Err(match last_failure {
            Some(failure) if failure.is_backend() => PipelineError::BackendUnavailable {
                attempts: max_attempts,
                reason: failure.to_string(),
                last_response,
            },
            Some(failure) => PipelineError::StructuredOutput {
                attempts: max_attempts,
                reason: failure.to_string(),
                last_response,
            },
            None => PipelineError::StructuredOutput {
                attempts: 0,
                reason: "no attempt was made".to_string(),
                last_response,
            },
        })
    }
}

/// Parse, repair, validate and deserialize one raw reply
pub fn parse_structured<T: StructuredOutput>(
    schema: &OutputSchema,
    raw: &str,
) -> Result<(T, Vec<String>), AttemptFailure> {
    let mut value = parse_json_value(raw).map_err(AttemptFailure::Unparseable)?;
    let warnings = schema.repair(&mut value);
    schema.validate(&value).map_err(AttemptFailure::Invalid)?;
    let typed: T =
        serde_json::from_value(value).map_err(|e| AttemptFailure::Mismatch(e.to_string()))?;
    Ok((typed.finalize(), warnings))
}

/// Append the field list, an example instance and the JSON Schema of `T`
pub fn build_structured_prompt<T: JsonSchema>(schema: &OutputSchema, user_prompt: &str) -> String {
    let json_schema = serde_json::to_string_pretty(&schemars::schema_for!(T)).unwrap_or_default();
    let example = serde_json::to_string_pretty(&schema.example()).unwrap_or_default();

    format!(
        "{user_prompt}\n\n\
         Respond with a JSON object ({name}) containing these fields:\n{fields}\n\
         Example showing the expected shape and numeric scale:\n{example}\n\n\
         JSON Schema:\n{json_schema}\n\n\
         Please respond with a valid JSON object and nothing else. No explanations or text outside the JSON.",
        name = schema.name,
        fields = schema.describe(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::schema::FieldSpec;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, JsonSchema, PartialEq)]
    struct Score {
        score: f64,
        label: String,
    }

    impl StructuredOutput for Score {
        fn output_schema() -> OutputSchema {
            OutputSchema::new(
                "Score",
                vec![
                    FieldSpec::number("score", 0.0, 10.0, "Score"),
                    FieldSpec::text("label", "Label"),
                ],
            )
        }

        fn finalize(mut self) -> Self {
            self.label = self.label.trim().to_string();
            self
        }
    }

    #[test]
    fn parse_structured_repairs_and_finalizes() {
        let schema = Score::output_schema();
        let (value, warnings) =
            parse_structured::<Score>(&schema, "Here: {\"score\": \"7\", \"label\": \" ok \"}")
                .expect("should parse");
        assert_eq!(
            value,
            Score {
                score: 7.0,
                label: "ok".into()
            }
        );
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn parse_structured_classifies_failures() {
        let schema = Score::output_schema();
        assert!(matches!(
            parse_structured::<Score>(&schema, "no json here"),
            Err(AttemptFailure::Unparseable(_))
        ));
        assert!(matches!(
            parse_structured::<Score>(&schema, "{\"score\": 42, \"label\": \"x\"}"),
            Err(AttemptFailure::Invalid(_))
        ));
    }

    #[test]
    fn prompt_embeds_schema_and_example() {
        let prompt = build_structured_prompt::<Score>(&Score::output_schema(), "Rate this.");
        assert!(prompt.starts_with("Rate this."));
        assert!(prompt.contains("\"score\" (number between 0 and 10, required)"));
        assert!(prompt.contains("\"score\": 8.5"));
        assert!(prompt.contains("JSON Schema"));
    }

    #[test]
    fn backoff_doubles_from_base_and_caps() {
        let policy = RetryPolicy {
            backoff_base: Duration::from_millis(100),
            max_backoff: Duration::from_millis(500),
            ..RetryPolicy::default()
        };
        let delays: Vec<_> = policy.backoff().take(3).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_millis(500)
            ]
        );
    }

    #[test]
    fn immediate_policy_never_waits() {
        let policy = RetryPolicy::immediate(3);
        assert!(policy.backoff().take(5).all(|d| d.is_zero()));
    }
}
