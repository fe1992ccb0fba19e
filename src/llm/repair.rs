//! Failure classification for a single structured-output attempt and the
//! correction instruction sent back to the model.

use std::fmt;
use std::fmt::Write;

use crate::error::BackendError;
use crate::llm::schema::{OutputSchema, SchemaViolation};

/// Why one attempt did not produce a usable value
#[derive(Debug)]
pub enum AttemptFailure {
    /// Transport or timeout fault; the model never answered
    Backend(BackendError),
    /// The reply contained no parseable JSON
    Unparseable(String),
    /// The JSON did not satisfy the schema
    Invalid(Vec<SchemaViolation>),
    /// The JSON validated but could not be deserialized into the target type
    Mismatch(String),
}

impl AttemptFailure {
    pub fn is_backend(&self) -> bool {
        matches!(self, Self::Backend(_))
    }
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Backend(e) => write!(f, "{e}"),
            Self::Unparseable(reason) => write!(f, "unparseable reply: {reason}"),
            Self::Invalid(violations) => {
                let joined = violations
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; ");
                write!(f, "schema validation failed: {joined}")
            }
            Self::Mismatch(reason) => write!(f, "reply does not match the target type: {reason}"),
        }
    }
}

/// Build the follow-up user message that tells the model what to fix.
///
/// Pure: depends only on the schema and the failure.
pub fn correction_text(schema: &OutputSchema, failure: &AttemptFailure) -> String {
    let mut out = String::new();

    match failure {
        AttemptFailure::Backend(_) => {
            out.push_str("The previous request did not complete. ");
        }
        AttemptFailure::Unparseable(reason) => {
            let _ = writeln!(
                out,
                "Your previous answer could not be parsed as JSON ({reason})."
            );
        }
        AttemptFailure::Invalid(violations) => {
            out.push_str("Your previous answer did not match the required format:\n");
            for violation in violations {
                let _ = writeln!(out, "- {violation}");
            }
        }
        AttemptFailure::Mismatch(reason) => {
            let _ = writeln!(
                out,
                "Your previous answer had the wrong structure ({reason})."
            );
        }
    }

    let required: Vec<_> = schema.required_fields().collect();
    let _ = write!(
        out,
        "\nRespond again with a single JSON object for {} containing the fields: {}. \
         Use the exact numeric scales given; do not rescale values. \
         Output only the JSON object, with no prose and no markdown fences.",
        schema.name,
        required.join(", ")
    );

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::schema::FieldSpec;

    fn schema() -> OutputSchema {
        OutputSchema::new(
            "RatingResult",
            vec![
                FieldSpec::number("overall_score", 0.0, 10.0, "Overall"),
                FieldSpec::text("recommendation", "Advice"),
            ],
        )
    }

    #[test]
    fn names_the_violated_constraint() {
        let failure = AttemptFailure::Invalid(vec![SchemaViolation::OutOfRange {
            field: "overall_score".into(),
            value: 85.0,
            min: 0.0,
            max: 10.0,
        }]);
        let text = correction_text(&schema(), &failure);
        assert!(text.contains("field \"overall_score\" must be between 0 and 10, got 85"));
        assert!(text.contains("overall_score, recommendation"));
    }

    #[test]
    fn mentions_missing_fields() {
        let failure = AttemptFailure::Invalid(vec![SchemaViolation::MissingField {
            field: "recommendation".into(),
        }]);
        let text = correction_text(&schema(), &failure);
        assert!(text.contains("missing required field \"recommendation\""));
    }

    #[test]
    fn parse_failures_ask_for_json_only() {
        let failure =
            AttemptFailure::Unparseable("no JSON object or array found in the reply".into());
        let text = correction_text(&schema(), &failure);
        assert!(text.contains("could not be parsed as JSON"));
        assert!(text.contains("Output only the JSON object"));
    }

    #[test]
    fn is_deterministic() {
        let failure = AttemptFailure::Mismatch("invalid type".into());
        assert_eq!(
            correction_text(&schema(), &failure),
            correction_text(&schema(), &failure)
        );
    }

    #[test]
    fn only_backend_failures_are_infrastructure() {
        assert!(AttemptFailure::Backend(BackendError::Malformed("x".into())).is_backend());
        assert!(!AttemptFailure::Unparseable("x".into()).is_backend());
    }
}
