//! Pipeline Orchestrator: drives each posting through the stage state machine.
//!
//! Flow per batch:
//!   1. prepare (sequential): reuse terminal states, resume interrupted ones, fingerprint
//!      and dedup new postings. The fingerprint index has a single writer.
//!   2. advance (concurrent, one task per posting): extraction → heuristic match →
//!      deep scoring, committing the state after every stage.
//!
//! A posting's stage failure is recorded as its terminal state and never aborts the batch.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Serialize;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::errors::PipelineError;
use crate::models::Posting;
use crate::pipeline::extraction::Extractor;
use crate::pipeline::fingerprint::{fingerprint, normalize, Fingerprint, FingerprintIndex};
use crate::pipeline::matcher::{match_skills, CandidateSkills};
use crate::pipeline::scorer::Scorer;
use crate::pipeline::stage::{PostingState, Stage};
use crate::store::PipelineStore;

// ────────────────────────────────────────────────────────────────────────────
// Run results
// ────────────────────────────────────────────────────────────────────────────

/// Where one posting ended up in this run.
#[derive(Debug, Clone, Serialize)]
pub struct PostingOutcome {
    pub posting_id: String,
    pub label: String,
    pub stage: Stage,
    pub score: Option<u8>,
    pub retained: bool,
    /// Answered from a previously persisted terminal state; no stage ran.
    pub reused: bool,
    pub rationale: String,
}

impl PostingOutcome {
    fn from_state(posting: &Posting, state: &PostingState, reused: bool) -> Self {
        Self {
            posting_id: posting.id.clone(),
            label: posting.label(),
            stage: state.stage,
            score: state.score(),
            retained: state.retained,
            reused,
            rationale: state.rationale(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub total: usize,
    pub reused: usize,
    pub duplicates: usize,
    pub extraction_failed: usize,
    pub heuristic_rejected: usize,
    pub scoring_failed: usize,
    pub scored: usize,
    /// Scored and at or above `min_score`.
    pub retained: usize,
    /// Stopped by cancellation before reaching a terminal stage.
    pub interrupted: usize,
    /// Hit a store or task failure; the posting keeps its last committed stage.
    pub errored: usize,
    pub cancelled: bool,
    /// Never started because the run was cancelled.
    pub unprocessed: usize,
    pub outcomes: Vec<PostingOutcome>,
}

impl RunSummary {
    fn record(&mut self, outcome: PostingOutcome) {
        if outcome.reused {
            self.reused += 1;
        }
        match outcome.stage {
            Stage::Duplicate => self.duplicates += 1,
            Stage::ExtractionFailed => self.extraction_failed += 1,
            Stage::HeuristicRejected => self.heuristic_rejected += 1,
            Stage::ScoringFailed => self.scoring_failed += 1,
            Stage::Scored => {
                self.scored += 1;
                if outcome.retained {
                    self.retained += 1;
                }
            }
            _ => self.interrupted += 1,
        }
        self.outcomes.push(outcome);
    }

    /// Retained postings, best score first.
    pub fn top_matches(&self, n: usize) -> Vec<&PostingOutcome> {
        let mut scored: Vec<&PostingOutcome> = self
            .outcomes
            .iter()
            .filter(|o| o.stage == Stage::Scored && o.retained)
            .collect();
        scored.sort_by(|a, b| b.score.cmp(&a.score));
        scored.truncate(n);
        scored
    }
}

enum Prepared {
    Done(PostingOutcome),
    Advance(PostingState),
}

// ────────────────────────────────────────────────────────────────────────────
// Pipeline
// ────────────────────────────────────────────────────────────────────────────

/// Everything one run needs, immutable for the run's duration.
#[derive(Clone)]
pub struct Pipeline {
    extractor: Arc<dyn Extractor>,
    scorer: Arc<dyn Scorer>,
    store: Arc<dyn PipelineStore>,
    candidate: Arc<CandidateSkills>,
    resume: Arc<str>,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(
        extractor: Arc<dyn Extractor>,
        scorer: Arc<dyn Scorer>,
        store: Arc<dyn PipelineStore>,
        candidate: CandidateSkills,
        resume: &str,
        config: PipelineConfig,
    ) -> Self {
        Self {
            extractor,
            scorer,
            store,
            candidate: Arc::new(candidate),
            resume: Arc::from(resume),
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn PipelineStore> {
        &self.store
    }

    /// Same collaborators, different run settings.
    pub fn with_config(&self, config: PipelineConfig) -> Self {
        Self {
            config,
            ..self.clone()
        }
    }

    /// Processes `postings` in batches of `batch_size`. Returns an error only when the
    /// run cannot start (the run lock or the fingerprint index cannot be obtained);
    /// per-posting failures are counted in the summary.
    ///
    /// Waits for any other run on the same store to finish first, and holds the run
    /// lock until this one returns.
    pub async fn run(
        &self,
        mut postings: Vec<Posting>,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, PipelineError> {
        let run_id = Uuid::new_v4();
        let _run_lock = self.store.lock_runs().await?;

        // Two tasks must never advance the same posting.
        let mut seen = HashSet::new();
        let submitted = postings.len();
        postings.retain(|p| seen.insert(p.id.clone()));
        if postings.len() < submitted {
            warn!("Ignoring {} repeated posting id(s)", submitted - postings.len());
        }

        let mut summary = RunSummary {
            run_id,
            total: postings.len(),
            ..Default::default()
        };

        let since = Utc::now() - Duration::days(self.config.dedup_window_days);
        let mut index = FingerprintIndex::new(self.config.hamming_threshold);
        for (posting_id, fp) in self.store.load_fingerprints(since).await? {
            // Blank descriptions all hash to zero and are never indexed.
            if fp != Fingerprint(0) {
                index.insert(posting_id, fp);
            }
        }
        info!(
            "Run {run_id}: {} postings, {} known fingerprints, batch size {}",
            postings.len(),
            index.len(),
            self.config.batch_size
        );

        let batch_count = postings.len().div_ceil(self.config.batch_size);
        for (batch_no, batch) in postings.chunks(self.config.batch_size).enumerate() {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                summary.unprocessed = postings.len() - batch_no * self.config.batch_size;
                warn!(
                    "Run {run_id} cancelled, {} postings left unprocessed",
                    summary.unprocessed
                );
                break;
            }
            info!("Batch {}/{}: {} postings", batch_no + 1, batch_count, batch.len());

            let mut pending = Vec::new();
            for posting in batch {
                match self.prepare(run_id, posting, &mut index).await {
                    Ok(Prepared::Done(outcome)) => summary.record(outcome),
                    Ok(Prepared::Advance(state)) => pending.push((posting.clone(), state)),
                    Err(e) => {
                        error!("Posting {} failed before dispatch: {e}", posting.id);
                        summary.errored += 1;
                    }
                }
            }

            let mut tasks = JoinSet::new();
            for (posting, state) in pending {
                let pipeline = self.clone();
                let cancel = cancel.clone();
                tasks.spawn(async move {
                    let posting_id = posting.id.clone();
                    let result = pipeline.advance(run_id, posting, state, &cancel).await;
                    (posting_id, result)
                });
            }

            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((_, Ok(outcome))) => summary.record(outcome),
                    Ok((posting_id, Err(e))) => {
                        error!("Posting {posting_id} failed: {e}");
                        summary.errored += 1;
                    }
                    Err(e) => {
                        error!("{}", PipelineError::from(e));
                        summary.errored += 1;
                    }
                }
            }
        }

        info!(
            "Run {run_id} finished: {} scored ({} retained), {} duplicates, {} heuristic rejects, \
             {} extraction failures, {} scoring failures, {} reused, {} errored",
            summary.scored,
            summary.retained,
            summary.duplicates,
            summary.heuristic_rejected,
            summary.extraction_failed,
            summary.scoring_failed,
            summary.reused,
            summary.errored
        );
        Ok(summary)
    }

    /// Decides where a posting starts. Runs sequentially so the index has one writer.
    async fn prepare(
        &self,
        run_id: Uuid,
        posting: &Posting,
        index: &mut FingerprintIndex,
    ) -> Result<Prepared, PipelineError> {
        let existing = self
            .store
            .load_state(&posting.id)
            .await?
            .filter(|s| s.stage != Stage::New);

        if let Some(state) = existing {
            if !state.stage.is_terminal() {
                info!("Resuming {} at stage {}", posting.label(), state.stage);
                return Ok(Prepared::Advance(state));
            }
            if !self.config.force || state.stage == Stage::Duplicate {
                debug!("Reusing {} terminal state {}", posting.id, state.stage);
                return Ok(Prepared::Done(PostingOutcome::from_state(posting, &state, true)));
            }
            debug!("Forcing re-evaluation of {} (was {})", posting.id, state.stage);
            let reopened = state.reopened();
            self.store.commit_stage(run_id, &reopened, None).await?;
            return Ok(Prepared::Advance(reopened));
        }

        self.store.record_posting(posting).await?;
        let mut state = PostingState::new(posting.id.clone());
        let fp = fingerprint(&posting.description);
        let blank = normalize(&posting.description).is_empty();

        let near = if blank {
            None
        } else {
            index.find_near_duplicate(fp, Some(posting.id.as_str()))
        };

        match near {
            Some(near) => {
                debug!(
                    "{} is a near-duplicate of {} (distance {})",
                    posting.id, near.posting_id, near.distance
                );
                state.duplicate(fp, near)?;
                let evaluation = state.to_new_evaluation(run_id);
                self.store
                    .commit_stage(run_id, &state, evaluation.as_ref())
                    .await?;
                Ok(Prepared::Done(PostingOutcome::from_state(posting, &state, false)))
            }
            None => {
                state.fingerprinted(fp)?;
                self.store.commit_stage(run_id, &state, None).await?;
                if !blank {
                    index.insert(posting.id.clone(), fp);
                }
                Ok(Prepared::Advance(state))
            }
        }
    }

    /// Runs the remaining stages for one posting, committing after each.
    async fn advance(
        &self,
        run_id: Uuid,
        posting: Posting,
        mut state: PostingState,
        cancel: &CancellationToken,
    ) -> Result<PostingOutcome, PipelineError> {
        while !state.stage.is_terminal() {
            if cancel.is_cancelled() {
                info!("{} stopped at stage {} (cancelled)", posting.id, state.stage);
                break;
            }

            match state.stage {
                Stage::Fingerprinted => match self.extractor.extract(&posting.description).await {
                    Ok(skills) => {
                        debug!(
                            "Extracted {} skills for {}",
                            skills.required_skills.len(),
                            posting.id
                        );
                        state.extracted(skills)?;
                    }
                    Err(e) => {
                        warn!("Extraction failed for {}: {e}", posting.label());
                        state.extraction_failed(e.to_string())?;
                    }
                },
                Stage::Extracted => {
                    let extracted = state.extracted.clone().unwrap_or_default();
                    let result = match_skills(&extracted, &self.candidate, &self.config.matcher);
                    debug!("{}: {}", posting.id, result.describe());
                    state.matched(result)?;
                }
                Stage::HeuristicPassed => match self.scorer.score(&posting, &self.resume).await {
                    Ok(assessment) => {
                        let retained = assessment.score >= self.config.min_score;
                        info!("Scored {}: {}/10", posting.label(), assessment.score);
                        state.scored(assessment, retained)?;
                    }
                    Err(e) => {
                        warn!("Scoring failed for {}: {e}", posting.label());
                        state.scoring_failed(e.to_string())?;
                    }
                },
                _ => break,
            }

            let evaluation = state.to_new_evaluation(run_id);
            self.store
                .commit_stage(run_id, &state, evaluation.as_ref())
                .await?;
        }

        Ok(PostingOutcome::from_state(&posting, &state, false))
    }
}
