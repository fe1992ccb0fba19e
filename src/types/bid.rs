use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::llm::{FieldSpec, OutputSchema, StructuredOutput};

/// Bid proposal content produced by the generator agent
#[derive(Serialize, Deserialize, JsonSchema, Debug, Clone, PartialEq, Eq)]
pub struct BidDocument {
    /// Two to three paragraph summary
    pub executive_summary: String,
    /// Methodology and solution design
    pub technical_approach: String,
    /// Why the client should choose us
    pub value_proposition: String,
    /// Realistic phases and milestones
    pub timeline_estimate: String,
    /// Titles of knowledge-base examples used as reference material
    #[serde(default)]
    #[schemars(skip)]
    pub reference_examples: Vec<String>,
}

impl StructuredOutput for BidDocument {
    fn output_schema() -> OutputSchema {
        OutputSchema::new(
            "BidDocument",
            vec![
                FieldSpec::text("executive_summary", "Two to three paragraph summary"),
                FieldSpec::text("technical_approach", "Methodology and solution design"),
                FieldSpec::text("value_proposition", "Unique differentiators"),
                FieldSpec::text("timeline_estimate", "Project phases and milestones"),
            ],
        )
    }
}

impl BidDocument {
    /// Sections in document order, paired with their headings
    pub fn sections(&self) -> [(&'static str, &str); 4] {
        [
            ("Executive Summary", self.executive_summary.as_str()),
            ("Technical Approach", self.technical_approach.as_str()),
            ("Value Proposition", self.value_proposition.as_str()),
            ("Timeline Estimate", self.timeline_estimate.as_str()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::parse_structured;

    #[test]
    fn reference_examples_are_never_requested() {
        let raw = r#"{"executive_summary": "a", "technical_approach": "b",
            "value_proposition": "c", "timeline_estimate": "d"}"#;
        let (doc, _) =
            parse_structured::<BidDocument>(&BidDocument::output_schema(), raw).expect("valid");
        assert!(doc.reference_examples.is_empty());
        assert_eq!(doc.sections()[3], ("Timeline Estimate", "d"));

        let schema = serde_json::to_string(&schemars::schema_for!(BidDocument)).expect("schema");
        assert!(!schema.contains("reference_examples"));
    }
}
