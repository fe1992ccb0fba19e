//! procurement-ai - staged LLM analysis of public procurement tenders
//!
//! Tenders flow through a relevance filter, a multi-dimensional rating and,
//! for promising opportunities, bid document generation grounded in a
//! knowledge base of past bids. Every model call goes through a structured
//! client that repairs, validates and re-prompts until the reply fits its
//! schema.

#![allow(clippy::uninlined_format_args)] // Style preference
#![allow(clippy::format_push_string)] // Performance improvement but stylistic
#![allow(clippy::return_self_not_must_use)] // Builder pattern is clear enough
#![allow(clippy::items_after_statements)] // Locally-scoped use statements are fine

pub mod agents;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod evaluation;
pub mod llm;
pub mod logger;
pub mod pipeline;
pub mod rag;
pub mod types;
pub mod ui;

// Re-export important structs and functions for easier testing
pub use config::Config;
pub use error::{BackendError, PipelineError, RagError};
pub use pipeline::{Orchestrator, PipelineResult, PipelineStatus};
pub use types::{BidDocument, FilterResult, RatingResult, Tender, TenderCategory};
