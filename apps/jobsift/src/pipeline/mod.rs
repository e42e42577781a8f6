//! Posting evaluation pipeline: fingerprint dedup, skill extraction, heuristic matching
//! and deep scoring, driven by `orchestrator::Pipeline`.

pub mod extraction;
pub mod fingerprint;
pub mod matcher;
pub mod orchestrator;
pub mod prompts;
pub mod schema;
pub mod scorer;
pub mod stage;

pub use orchestrator::{Pipeline, PostingOutcome, RunSummary};
