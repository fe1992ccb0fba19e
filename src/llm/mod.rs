//! Structured-output layer over an unreliable text-generation backend

pub mod backend;
pub mod client;
pub mod parser;
pub mod repair;
pub mod schema;

pub use backend::{ChatBackend, ChatMessage, ChatRequest, ChatRole, OpenAiCompatibleBackend};
pub use client::{
    RetryPolicy, Structured, StructuredLlmClient, StructuredOutput, build_structured_prompt,
    parse_structured,
};
pub use parser::{extract_json, parse_json_value};
pub use repair::{AttemptFailure, correction_text};
pub use schema::{FieldKind, FieldSpec, OutputSchema, SchemaViolation};
