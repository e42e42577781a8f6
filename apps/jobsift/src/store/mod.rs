//! Persistence for postings, per-stage artifacts and versioned evaluations.
//!
//! `PostgresStore` is the primary store. `MemoryStore` implements the same trait for
//! `--dry-run` and tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::errors::StoreError;
use crate::models::{Evaluation, EvaluationFilter, NewEvaluation, Posting};
use crate::pipeline::fingerprint::Fingerprint;
use crate::pipeline::stage::PostingState;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

/// Held for the duration of one pipeline run. Dropping it lets the next run start.
pub struct RunLock {
    _held: Box<dyn Send>,
}

impl RunLock {
    pub fn new(held: impl Send + 'static) -> Self {
        Self {
            _held: Box::new(held),
        }
    }
}

#[async_trait]
pub trait PipelineStore: Send + Sync {
    /// Waits until no other run is active against this store. Runs share the
    /// fingerprint index and evaluation versions, so they never overlap.
    async fn lock_runs(&self) -> Result<RunLock, StoreError>;

    /// Inserts the posting if its id is new. Known ids are left untouched.
    async fn record_posting(&self, posting: &Posting) -> Result<(), StoreError>;

    /// Fingerprints of accepted (non-duplicate) postings scraped at or after `since`.
    async fn load_fingerprints(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<(String, Fingerprint)>, StoreError>;

    async fn load_state(&self, posting_id: &str) -> Result<Option<PostingState>, StoreError>;

    /// Durably records the artifact of the stage `state` just reached, upserts the
    /// state snapshot and, when given, appends `evaluation` as the next version. All
    /// writes happen atomically.
    async fn commit_stage(
        &self,
        run_id: Uuid,
        state: &PostingState,
        evaluation: Option<&NewEvaluation>,
    ) -> Result<Option<Evaluation>, StoreError>;

    /// Latest evaluation version of each posting matching `filter`, best scores first.
    async fn query_evaluations(
        &self,
        filter: &EvaluationFilter,
    ) -> Result<Vec<Evaluation>, StoreError>;

    /// Every evaluation version of one posting, oldest first.
    async fn evaluation_history(&self, posting_id: &str) -> Result<Vec<Evaluation>, StoreError>;
}
