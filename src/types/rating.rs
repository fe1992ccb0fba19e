use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::llm::{FieldSpec, OutputSchema, StructuredOutput};

/// The six scored dimensions, each on a 0-10 scale
pub const RATING_DIMENSIONS: [(&str, &str); 6] = [
    ("strategic_fit", "How well the tender matches our expertise"),
    ("win_probability", "Chance of winning given competition and requirements"),
    ("effort_required", "Complexity, timeline and resource needs"),
    ("risk_level", "Delivery, commercial and compliance risk"),
    ("urgency", "How soon a bid decision is needed"),
    ("overall_score", "Overall attractiveness of the opportunity"),
];

/// Multi-dimensional opportunity assessment produced by the rating agent
#[derive(Serialize, Deserialize, JsonSchema, Debug, Clone, PartialEq)]
pub struct RatingResult {
    pub strategic_fit: f64,
    pub win_probability: f64,
    pub effort_required: f64,
    pub risk_level: f64,
    pub urgency: f64,
    pub overall_score: f64,
    /// Top strengths for this bid
    pub strengths: Vec<String>,
    /// Top risks for this bid
    pub risks: Vec<String>,
    /// Go/No-Go with reasoning
    pub recommendation: String,
}

impl RatingResult {
    /// Whether the overall score clears a pursue threshold
    pub fn meets(&self, threshold: f64) -> bool {
        self.overall_score >= threshold
    }
}

impl StructuredOutput for RatingResult {
    fn output_schema() -> OutputSchema {
        let mut fields: Vec<FieldSpec> = RATING_DIMENSIONS
            .iter()
            .map(|(name, description)| FieldSpec::number(name, 0.0, 10.0, description))
            .collect();
        fields.push(FieldSpec::text_list("strengths", 1, "Strength"));
        fields.push(FieldSpec::text_list("risks", 1, "Risk"));
        fields.push(FieldSpec::text("recommendation", "Go/No-Go with reasoning"));
        OutputSchema::new("RatingResult", fields)
    }

    fn finalize(mut self) -> Self {
        self.strengths.retain(|s| !s.trim().is_empty());
        self.risks.retain(|s| !s.trim().is_empty());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{SchemaViolation, parse_structured};
    use crate::llm::repair::AttemptFailure;

    const VALID: &str = r#"{"strategic_fit": 8, "win_probability": 6.5, "effort_required": 5,
        "risk_level": 3, "urgency": 7, "overall_score": 7.5,
        "strengths": ["SIEM experience"], "risks": ["tight timeline"],
        "recommendation": "Go"}"#;

    #[test]
    fn valid_rating_parses() {
        let (rating, _) =
            parse_structured::<RatingResult>(&RatingResult::output_schema(), VALID).expect("valid");
        assert!((rating.overall_score - 7.5).abs() < f64::EPSILON);
        assert!(rating.meets(7.0));
        assert!(!rating.meets(8.0));
    }

    #[test]
    fn missing_dimension_is_a_violation() {
        let raw = VALID.replace("\"urgency\": 7,", "");
        let Err(AttemptFailure::Invalid(violations)) =
            parse_structured::<RatingResult>(&RatingResult::output_schema(), &raw)
        else {
            panic!("expected a validation failure");
        };
        assert_eq!(
            violations,
            vec![SchemaViolation::MissingField {
                field: "urgency".into()
            }]
        );
    }

    #[test]
    fn percentage_scale_is_rejected_not_rescaled() {
        let raw = VALID.replace("\"overall_score\": 7.5", "\"overall_score\": 75");
        assert!(matches!(
            parse_structured::<RatingResult>(&RatingResult::output_schema(), &raw),
            Err(AttemptFailure::Invalid(_))
        ));
    }

    #[test]
    fn blank_list_items_are_rejected() {
        let raw = VALID
            .replace(r#"["SIEM experience"]"#, r#"["  "]"#)
            .replace(r#"["tight timeline"]"#, r#"["tight timeline", ""]"#);
        let Err(AttemptFailure::Invalid(violations)) =
            parse_structured::<RatingResult>(&RatingResult::output_schema(), &raw)
        else {
            panic!("expected a validation failure");
        };
        assert_eq!(
            violations,
            vec![
                SchemaViolation::EmptyText {
                    field: "strengths".into()
                },
                SchemaViolation::EmptyText {
                    field: "risks".into()
                },
            ]
        );
    }
}
