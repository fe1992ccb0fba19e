use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

use crate::llm::{FieldSpec, OutputSchema, StructuredOutput};

/// Fixed vocabulary of tender categories
#[derive(
    Serialize,
    Deserialize,
    JsonSchema,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TenderCategory {
    Cybersecurity,
    Ai,
    Software,
    Other,
}

impl TenderCategory {
    /// Every label in declaration order
    pub fn labels() -> Vec<String> {
        Self::iter().map(|c| c.to_string()).collect()
    }
}

/// Relevance classification produced by the filter agent
#[derive(Serialize, Deserialize, JsonSchema, Debug, Clone, PartialEq)]
pub struct FilterResult {
    /// Whether the tender is worth evaluating further
    pub is_relevant: bool,
    /// Confidence in the decision, 0.0 to 1.0
    pub confidence: f64,
    /// Detected categories, without duplicates
    pub categories: Vec<TenderCategory>,
    /// Explanation for the decision
    pub reasoning: String,
}

impl FilterResult {
    pub fn category_labels(&self) -> Vec<String> {
        self.categories.iter().map(ToString::to_string).collect()
    }
}

impl StructuredOutput for FilterResult {
    fn output_schema() -> OutputSchema {
        let labels = TenderCategory::labels();
        let allowed: Vec<&str> = labels.iter().map(String::as_str).collect();
        OutputSchema::new(
            "FilterResult",
            vec![
                FieldSpec::boolean("is_relevant", "Whether the tender is relevant"),
                FieldSpec::number("confidence", 0.0, 1.0, "Confidence in the decision"),
                FieldSpec::label_list("categories", &allowed, 0, "Detected categories"),
                FieldSpec::text("reasoning", "Explanation for the decision"),
            ],
        )
    }

    fn finalize(mut self) -> Self {
        let mut seen = Vec::with_capacity(self.categories.len());
        self.categories.retain(|c| {
            if seen.contains(c) {
                false
            } else {
                seen.push(*c);
                true
            }
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::parse_structured;
    use std::str::FromStr;

    #[test]
    fn category_labels_round_trip() {
        assert_eq!(TenderCategory::labels(), vec!["cybersecurity", "ai", "software", "other"]);
        assert_eq!(TenderCategory::from_str("ai").ok(), Some(TenderCategory::Ai));
        assert_eq!(TenderCategory::Cybersecurity.as_ref(), "cybersecurity");
    }

    #[test]
    fn duplicate_categories_are_removed_in_order() {
        let raw = r#"{"is_relevant": true, "confidence": 0.9,
            "categories": ["software", "AI", "software"], "reasoning": "custom platform"}"#;
        let (result, warnings) =
            parse_structured::<FilterResult>(&FilterResult::output_schema(), raw).expect("valid");
        assert_eq!(result.categories, vec![TenderCategory::Software, TenderCategory::Ai]);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn unknown_category_is_rejected() {
        let raw = r#"{"is_relevant": true, "confidence": 0.9,
            "categories": ["blockchain"], "reasoning": "x"}"#;
        assert!(parse_structured::<FilterResult>(&FilterResult::output_schema(), raw).is_err());
    }

    #[test]
    fn confidence_above_one_is_rejected() {
        let raw = r#"{"is_relevant": true, "confidence": 85,
            "categories": [], "reasoning": "x"}"#;
        assert!(parse_structured::<FilterResult>(&FilterResult::output_schema(), raw).is_err());
    }
}
