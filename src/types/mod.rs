//! Domain types flowing through the tender pipeline
//!
//! - Tenders submitted for analysis
//! - Structured agent outputs (filter, rating, bid document)

mod bid;
mod filter;
mod rating;
mod tender;

pub use bid::BidDocument;
pub use filter::{FilterResult, TenderCategory};
pub use rating::{RATING_DIMENSIONS, RatingResult};
pub use tender::Tender;
