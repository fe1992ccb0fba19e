//! Explicit output schemas and the generic validator that interprets them
//!
//! Each structured output type describes its fields as an [`OutputSchema`].
//! The same description drives three things: the field list rendered into the
//! prompt, lossless repairs of near-miss replies, and validation.

use serde_json::{Map, Number, Value};
use std::fmt;
use std::fmt::Write;

/// Shape and constraints of a single field
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    Boolean,
    /// Finite number within `[min, max]`; out-of-range values are rejected
    Number { min: f64, max: f64 },
    /// Non-empty string
    Text,
    /// List of non-empty strings
    TextList { min_items: usize },
    /// List of labels drawn from a fixed vocabulary
    LabelList {
        allowed: Vec<String>,
        min_items: usize,
    },
}

impl FieldKind {
    fn expected(&self) -> &'static str {
        match self {
            Self::Boolean => "a boolean",
            Self::Number { .. } => "a number",
            Self::Text => "a string",
            Self::TextList { .. } | Self::LabelList { .. } => "an array of strings",
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::Boolean => "boolean".to_string(),
            Self::Number { min, max } => format!("number between {min} and {max}"),
            Self::Text => "non-empty string".to_string(),
            Self::TextList { min_items } => format!("array of strings, at least {min_items}"),
            Self::LabelList { allowed, min_items } => format!(
                "array of labels from [{}], at least {min_items}",
                allowed.join(", ")
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
    pub description: &'static str,
}

impl FieldSpec {
    fn new(name: &'static str, kind: FieldKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            required: true,
            description,
        }
    }

    pub fn boolean(name: &'static str, description: &'static str) -> Self {
        Self::new(name, FieldKind::Boolean, description)
    }

    pub fn number(name: &'static str, min: f64, max: f64, description: &'static str) -> Self {
        Self::new(name, FieldKind::Number { min, max }, description)
    }

    pub fn text(name: &'static str, description: &'static str) -> Self {
        Self::new(name, FieldKind::Text, description)
    }

    pub fn text_list(name: &'static str, min_items: usize, description: &'static str) -> Self {
        Self::new(name, FieldKind::TextList { min_items }, description)
    }

    pub fn label_list(
        name: &'static str,
        allowed: &[&str],
        min_items: usize,
        description: &'static str,
    ) -> Self {
        let allowed = allowed.iter().map(|s| (*s).to_string()).collect();
        Self::new(name, FieldKind::LabelList { allowed, min_items }, description)
    }

    /// Mark the field as optional (absent or null is accepted)
    #[must_use]
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

/// One way a reply failed to match its schema
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaViolation {
    NotAnObject {
        found: &'static str,
    },
    MissingField {
        field: String,
    },
    WrongType {
        field: String,
        expected: &'static str,
        found: &'static str,
    },
    OutOfRange {
        field: String,
        value: f64,
        min: f64,
        max: f64,
    },
    UnknownLabel {
        field: String,
        label: String,
        allowed: Vec<String>,
    },
    EmptyText {
        field: String,
    },
    TooFewItems {
        field: String,
        min: usize,
        actual: usize,
    },
}

impl SchemaViolation {
    /// Name of the offending field, if the violation concerns one
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::NotAnObject { .. } => None,
            Self::MissingField { field }
            | Self::WrongType { field, .. }
            | Self::OutOfRange { field, .. }
            | Self::UnknownLabel { field, .. }
            | Self::EmptyText { field }
            | Self::TooFewItems { field, .. } => Some(field),
        }
    }
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAnObject { found } => write!(f, "expected a JSON object, got {found}"),
            Self::MissingField { field } => write!(f, "missing required field \"{field}\""),
            Self::WrongType {
                field,
                expected,
                found,
            } => write!(f, "field \"{field}\" must be {expected}, got {found}"),
            Self::OutOfRange {
                field,
                value,
                min,
                max,
            } => write!(
                f,
                "field \"{field}\" must be between {min} and {max}, got {value}"
            ),
            Self::UnknownLabel {
                field,
                label,
                allowed,
            } => write!(
                f,
                "field \"{field}\" contains unknown label \"{label}\" (allowed: {})",
                allowed.join(", ")
            ),
            Self::EmptyText { field } => write!(f, "field \"{field}\" must not be empty"),
            Self::TooFewItems { field, min, actual } => write!(
                f,
                "field \"{field}\" needs at least {min} item(s), got {actual}"
            ),
        }
    }
}

/// Declarative description of a structured model output
#[derive(Debug, Clone, PartialEq)]
pub struct OutputSchema {
    pub name: &'static str,
    pub fields: Vec<FieldSpec>,
}

impl OutputSchema {
    pub fn new(name: &'static str, fields: Vec<FieldSpec>) -> Self {
        Self { name, fields }
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields.iter().filter(|f| f.required).map(|f| f.name)
    }

    /// Apply lossless type repairs in place and return a warning per repair.
    ///
    /// Numeric strings become numbers, boolean-like strings become booleans,
    /// a lone string where a list is expected becomes a one-element list and
    /// labels are lowercased. Values are never rescaled.
    pub fn repair(&self, value: &mut Value) -> Vec<String> {
        let mut warnings = Vec::new();
        let Some(obj) = value.as_object_mut() else {
            return warnings;
        };

        for spec in &self.fields {
            let Some(current) = obj.get_mut(spec.name) else {
                continue;
            };
            if let Some(repaired) = repair_field(&spec.kind, current) {
                warnings.push(format!(
                    "Converted field '{}' from {} to {}",
                    spec.name,
                    json_type_name(current),
                    spec.kind.expected()
                ));
                *current = repaired;
            }
        }

        warnings
    }

    /// Check a parsed reply against every field constraint
    pub fn validate(&self, value: &Value) -> Result<(), Vec<SchemaViolation>> {
        let Some(obj) = value.as_object() else {
            return Err(vec![SchemaViolation::NotAnObject {
                found: json_type_name(value),
            }]);
        };

        let violations: Vec<SchemaViolation> = self
            .fields
            .iter()
            .filter_map(|spec| validate_field(spec, obj))
            .collect();

        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }

    /// Illustrative instance with values of the correct type and scale
    pub fn example(&self) -> Value {
        let mut obj = Map::new();
        for spec in &self.fields {
            let sample = match &spec.kind {
                FieldKind::Boolean => Value::Bool(true),
                FieldKind::Number { min, max } => {
                    let v = ((min + (max - min) * 0.85) * 100.0).round() / 100.0;
                    Number::from_f64(v).map_or(Value::Null, Value::Number)
                }
                FieldKind::Text => Value::String(spec.description.to_string()),
                FieldKind::TextList { min_items } => Value::Array(
                    (1..=(*min_items).max(2))
                        .map(|i| Value::String(format!("{} {i}", spec.description)))
                        .collect(),
                ),
                FieldKind::LabelList { allowed, min_items } => Value::Array(
                    allowed
                        .iter()
                        .take((*min_items).max(1))
                        .map(|l| Value::String(l.clone()))
                        .collect(),
                ),
            };
            obj.insert(spec.name.to_string(), sample);
        }
        Value::Object(obj)
    }

    /// Bullet list of fields for inclusion in a prompt
    pub fn describe(&self) -> String {
        let mut out = String::new();
        for spec in &self.fields {
            let presence = if spec.required { "required" } else { "optional" };
            let _ = writeln!(
                out,
                "- \"{}\" ({}, {}): {}",
                spec.name,
                spec.kind.describe(),
                presence,
                spec.description
            );
        }
        out
    }
}

fn validate_field(spec: &FieldSpec, obj: &Map<String, Value>) -> Option<SchemaViolation> {
    let field = spec.name.to_string();
    let value = match obj.get(spec.name) {
        None | Some(Value::Null) if spec.required => {
            return Some(SchemaViolation::MissingField { field });
        }
        None | Some(Value::Null) => return None,
        Some(v) => v,
    };

    let wrong_type = || SchemaViolation::WrongType {
        field: spec.name.to_string(),
        expected: spec.kind.expected(),
        found: json_type_name(value),
    };

    match &spec.kind {
        FieldKind::Boolean => (!value.is_boolean()).then(wrong_type),
        FieldKind::Number { min, max } => {
            let Some(n) = value.as_f64() else {
                return Some(wrong_type());
            };
            (n < *min || n > *max).then_some(SchemaViolation::OutOfRange {
                field,
                value: n,
                min: *min,
                max: *max,
            })
        }
        FieldKind::Text => match value.as_str() {
            None => Some(wrong_type()),
            Some(s) if s.trim().is_empty() => Some(SchemaViolation::EmptyText { field }),
            Some(_) => None,
        },
        FieldKind::TextList { min_items } => {
            let Some(items) = value.as_array() else {
                return Some(wrong_type());
            };
            if items.iter().any(|i| !i.is_string()) {
                return Some(wrong_type());
            }
            if items
                .iter()
                .filter_map(Value::as_str)
                .any(|s| s.trim().is_empty())
            {
                return Some(SchemaViolation::EmptyText { field });
            }
            (items.len() < *min_items).then_some(SchemaViolation::TooFewItems {
                field,
                min: *min_items,
                actual: items.len(),
            })
        }
        FieldKind::LabelList { allowed, min_items } => {
            let Some(items) = value.as_array() else {
                return Some(wrong_type());
            };
            for item in items {
                let Some(label) = item.as_str() else {
                    return Some(wrong_type());
                };
                if !allowed.iter().any(|a| a == label) {
                    return Some(SchemaViolation::UnknownLabel {
                        field,
                        label: label.to_string(),
                        allowed: allowed.clone(),
                    });
                }
            }
            (items.len() < *min_items).then_some(SchemaViolation::TooFewItems {
                field,
                min: *min_items,
                actual: items.len(),
            })
        }
    }
}

fn repair_field(kind: &FieldKind, value: &Value) -> Option<Value> {
    match (kind, value) {
        (FieldKind::Number { .. }, Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number),
        (FieldKind::Boolean, Value::String(s)) => match s.trim().to_lowercase().as_str() {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            _ => None,
        },
        (FieldKind::Text, Value::Number(n)) => Some(Value::String(n.to_string())),
        (FieldKind::TextList { .. }, Value::String(s)) => {
            Some(Value::Array(vec![Value::String(s.clone())]))
        }
        (FieldKind::LabelList { .. }, Value::String(s)) => {
            Some(Value::Array(vec![Value::String(s.trim().to_lowercase())]))
        }
        (FieldKind::LabelList { .. }, Value::Array(items)) => {
            let normalized: Vec<Value> = items
                .iter()
                .map(|item| match item {
                    Value::String(s) => Value::String(s.trim().to_lowercase()),
                    other => other.clone(),
                })
                .collect();
            (normalized != *items).then_some(Value::Array(normalized))
        }
        _ => None,
    }
}

/// Human-readable JSON type of a value
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> OutputSchema {
        OutputSchema::new(
            "TestOutput",
            vec![
                FieldSpec::boolean("ok", "Whether it worked"),
                FieldSpec::number("score", 0.0, 10.0, "Score"),
                FieldSpec::text("reason", "Why"),
                FieldSpec::text_list("notes", 1, "Note"),
                FieldSpec::label_list("tags", &["a", "b"], 0, "Tags"),
                FieldSpec::text("extra", "Optional").optional(),
            ],
        )
    }

    #[test]
    fn valid_value_passes() {
        let value = json!({
            "ok": true,
            "score": 7.5,
            "reason": "fine",
            "notes": ["n"],
            "tags": ["a"]
        });
        assert!(schema().validate(&value).is_ok());
    }

    #[test]
    fn reports_each_violation() {
        let value = json!({
            "ok": "maybe",
            "score": 11.0,
            "reason": " ",
            "notes": [],
            "tags": ["c"]
        });
        let violations = schema().validate(&value).expect_err("should fail");
        let fields: Vec<_> = violations.iter().filter_map(SchemaViolation::field).collect();
        assert_eq!(fields, vec!["ok", "score", "reason", "notes", "tags"]);
        assert!(matches!(violations[1], SchemaViolation::OutOfRange { .. }));
    }

    #[test]
    fn missing_and_null_required_fields_are_reported() {
        let value = json!({"ok": true, "score": null, "notes": ["x"], "tags": []});
        let violations = schema().validate(&value).expect_err("should fail");
        assert_eq!(
            violations,
            vec![
                SchemaViolation::MissingField {
                    field: "score".into(),
                },
                SchemaViolation::MissingField {
                    field: "reason".into(),
                },
            ]
        );
    }

    #[test]
    fn yes_is_not_a_boolean() {
        let mut value = json!({"ok": "yes"});
        assert!(schema().repair(&mut value).is_empty());
        assert_eq!(value["ok"], json!("yes"));
    }

    #[test]
    fn non_object_is_rejected() {
        let violations = schema().validate(&json!([1, 2])).expect_err("should fail");
        assert_eq!(
            violations,
            vec![SchemaViolation::NotAnObject { found: "array" }]
        );
    }

    #[test]
    fn repair_is_lossless() {
        let mut value = json!({
            "ok": "true",
            "score": "8.5",
            "reason": 42,
            "notes": "single",
            "tags": ["A "]
        });
        let warnings = schema().repair(&mut value);
        assert_eq!(warnings.len(), 5);
        assert_eq!(
            value,
            json!({
                "ok": true,
                "score": 8.5,
                "reason": "42",
                "notes": ["single"],
                "tags": ["a"]
            })
        );
        assert!(schema().validate(&value).is_ok());
    }

    #[test]
    fn repair_never_rescales_numbers() {
        let mut value = json!({"score": 85});
        schema().repair(&mut value);
        assert_eq!(value["score"], json!(85));
        let violations = schema().validate(&value).expect_err("out of range");
        assert!(violations.iter().any(|v| matches!(
            v,
            SchemaViolation::OutOfRange { value, .. } if (*value - 85.0).abs() < f64::EPSILON
        )));
    }

    #[test]
    fn example_has_scaled_numbers_and_validates() {
        let example = schema().example();
        assert_eq!(example["score"], json!(8.5));
        assert!(schema().validate(&example).is_ok());
    }

    #[test]
    fn describe_lists_every_field() {
        let text = schema().describe();
        assert!(text.contains("\"score\" (number between 0 and 10, required)"));
        assert!(text.contains("\"extra\" (non-empty string, optional)"));
    }
}
