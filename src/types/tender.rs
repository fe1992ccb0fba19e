use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// A procurement tender submitted for analysis
///
/// Missing fields deserialize as empty so that `validate` reports them.
#[derive(Serialize, Deserialize, JsonSchema, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Tender {
    pub id: String,
    pub title: String,
    pub description: String,
    pub organization: String,
    /// Submission deadline as published (usually `YYYY-MM-DD`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline: Option<String>,
    /// Free-form value estimate, e.g. `€2,500,000`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_value: Option<String>,
}

impl Tender {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
        organization: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: description.into(),
            organization: organization.into(),
            deadline: None,
            estimated_value: None,
        }
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: impl Into<String>) -> Self {
        self.deadline = Some(deadline.into());
        self
    }

    #[must_use]
    pub fn with_estimated_value(mut self, value: impl Into<String>) -> Self {
        self.estimated_value = Some(value.into());
        self
    }

    /// Reject tenders missing any identifying or descriptive field
    pub fn validate(&self) -> Result<(), PipelineError> {
        let missing: Vec<&str> = [
            ("id", &self.id),
            ("title", &self.title),
            ("description", &self.description),
            ("organization", &self.organization),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::Validation(format!(
                "missing required field(s): {}",
                missing.join(", ")
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_tender_is_valid() {
        let tender = Tender::new("T-1", "SIEM rollout", "Deploy a SIEM", "City of Ghent")
            .with_deadline("2026-06-30")
            .with_estimated_value("€500,000");
        assert!(tender.validate().is_ok());
    }

    #[test]
    fn blank_fields_are_reported_together() {
        let tender = Tender::new("T-2", "  ", "desc", "");
        let err = tender.validate().expect_err("should be invalid");
        assert_eq!(
            err.to_string(),
            "invalid tender: missing required field(s): title, organization"
        );
    }

    #[test]
    fn optional_fields_default_when_absent() {
        let tender: Tender = serde_json::from_str(
            r#"{"id":"1","title":"t","description":"d","organization":"o"}"#,
        )
        .expect("should deserialize");
        assert!(tender.deadline.is_none());
        assert!(tender.estimated_value.is_none());
    }

    #[test]
    fn missing_required_fields_surface_in_validation() {
        let tender: Tender =
            serde_json::from_str(r#"{"id":"2","title":"t"}"#).expect("should deserialize");
        let err = tender.validate().expect_err("should be invalid");
        assert!(err.to_string().ends_with("description, organization"));
    }
}
