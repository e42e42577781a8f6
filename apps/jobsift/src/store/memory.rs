use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::errors::StoreError;
use crate::models::{Evaluation, EvaluationFilter, NewEvaluation, Posting};
use crate::pipeline::extraction::ExtractedSkills;
use crate::pipeline::fingerprint::Fingerprint;
use crate::pipeline::matcher::MatchResult;
use crate::pipeline::stage::{PostingState, Stage};
use crate::store::{PipelineStore, RunLock};

#[derive(Default)]
struct Inner {
    postings: HashMap<String, Posting>,
    /// posting id -> (fingerprint, duplicate of)
    fingerprints: Vec<(String, Fingerprint, Option<String>)>,
    extracted: HashMap<(String, Uuid), ExtractedSkills>,
    matches: HashMap<(String, Uuid), MatchResult>,
    states: HashMap<String, PostingState>,
    evaluations: Vec<Evaluation>,
}

/// Process-local store with the same semantics as `PostgresStore`. Used by
/// `--dry-run` and by tests.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    run_lock: Arc<Mutex<()>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn extracted_skills(&self, posting_id: &str) -> Vec<ExtractedSkills> {
        let inner = self.inner.lock().await;
        inner
            .extracted
            .iter()
            .filter(|((id, _), _)| id == posting_id)
            .map(|(_, skills)| skills.clone())
            .collect()
    }

    pub async fn match_results(&self, posting_id: &str) -> Vec<MatchResult> {
        let inner = self.inner.lock().await;
        inner
            .matches
            .iter()
            .filter(|((id, _), _)| id == posting_id)
            .map(|(_, result)| result.clone())
            .collect()
    }

    pub async fn fingerprint_count(&self, posting_id: &str) -> usize {
        let inner = self.inner.lock().await;
        inner
            .fingerprints
            .iter()
            .filter(|(id, _, _)| id == posting_id)
            .count()
    }
}

fn matches_filter(evaluation: &Evaluation, filter: &EvaluationFilter) -> bool {
    if let Some(min) = filter.min_score {
        if evaluation.score.map_or(true, |s| s < min) {
            return false;
        }
    }
    if let Some(max) = filter.max_score {
        if evaluation.score.map_or(true, |s| s > max) {
            return false;
        }
    }
    if let Some(reason) = filter.reason {
        if evaluation.rejection_reason != Some(reason) {
            return false;
        }
    }
    if let Some(text) = filter.text.as_deref() {
        let rationale = evaluation.rationale.to_lowercase();
        if !text
            .split_whitespace()
            .all(|term| rationale.contains(&term.to_lowercase()))
        {
            return false;
        }
    }
    true
}

#[async_trait]
impl PipelineStore for MemoryStore {
    async fn lock_runs(&self) -> Result<RunLock, StoreError> {
        let guard = self.run_lock.clone().lock_owned().await;
        Ok(RunLock::new(guard))
    }

    async fn record_posting(&self, posting: &Posting) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner
            .postings
            .entry(posting.id.clone())
            .or_insert_with(|| posting.clone());
        Ok(())
    }

    async fn load_fingerprints(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<(String, Fingerprint)>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .fingerprints
            .iter()
            .filter(|(_, _, duplicate_of)| duplicate_of.is_none())
            .filter(|(id, _, _)| {
                inner
                    .postings
                    .get(id)
                    .map_or(false, |p| p.scraped_at >= since)
            })
            .map(|(id, fp, _)| (id.clone(), *fp))
            .collect())
    }

    async fn load_state(&self, posting_id: &str) -> Result<Option<PostingState>, StoreError> {
        Ok(self.inner.lock().await.states.get(posting_id).cloned())
    }

    async fn commit_stage(
        &self,
        run_id: Uuid,
        state: &PostingState,
        evaluation: Option<&NewEvaluation>,
    ) -> Result<Option<Evaluation>, StoreError> {
        let mut inner = self.inner.lock().await;
        let key = (state.posting_id.clone(), run_id);

        match state.stage {
            Stage::Fingerprinted | Stage::Duplicate => {
                let known = inner
                    .fingerprints
                    .iter()
                    .any(|(id, _, _)| *id == state.posting_id);
                if let (Some(fp), false) = (state.fingerprint, known) {
                    let duplicate_of = state.duplicate_of.as_ref().map(|d| d.posting_id.clone());
                    inner
                        .fingerprints
                        .push((state.posting_id.clone(), fp, duplicate_of));
                }
            }
            Stage::Extracted => {
                if let Some(skills) = &state.extracted {
                    inner.extracted.insert(key, skills.clone());
                }
            }
            Stage::HeuristicPassed | Stage::HeuristicRejected => {
                if let Some(result) = &state.match_result {
                    inner.matches.insert(key, result.clone());
                }
            }
            _ => {}
        }

        inner
            .states
            .insert(state.posting_id.clone(), state.clone());

        let written = evaluation.map(|new| {
            let current_max = inner
                .evaluations
                .iter()
                .filter(|e| e.posting_id == new.posting_id)
                .map(|e| e.version)
                .max()
                .unwrap_or(0);
            Evaluation::from_new(new, current_max + 1, Utc::now())
        });
        if let Some(evaluation) = &written {
            inner.evaluations.push(evaluation.clone());
        }

        Ok(written)
    }

    async fn query_evaluations(
        &self,
        filter: &EvaluationFilter,
    ) -> Result<Vec<Evaluation>, StoreError> {
        let inner = self.inner.lock().await;

        let mut latest: HashMap<&str, &Evaluation> = HashMap::new();
        for evaluation in &inner.evaluations {
            let slot = latest.entry(evaluation.posting_id.as_str()).or_insert(evaluation);
            if evaluation.version > slot.version {
                *slot = evaluation;
            }
        }

        let mut results: Vec<Evaluation> = latest
            .into_values()
            .filter(|e| matches_filter(e, filter))
            .cloned()
            .collect();

        // Scores descending with unscored rows last, then newest first.
        results.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then_with(|| b.created_at.cmp(&a.created_at))
                .then_with(|| a.posting_id.cmp(&b.posting_id))
        });
        results.truncate(filter.effective_limit() as usize);

        Ok(results)
    }

    async fn evaluation_history(&self, posting_id: &str) -> Result<Vec<Evaluation>, StoreError> {
        let inner = self.inner.lock().await;
        let mut history: Vec<Evaluation> = inner
            .evaluations
            .iter()
            .filter(|e| e.posting_id == posting_id)
            .cloned()
            .collect();
        history.sort_by_key(|e| e.version);
        Ok(history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RejectionReason;
    use crate::pipeline::fingerprint::NearDuplicate;
    use chrono::Duration;

    fn make_posting(id: &str, scraped_at: DateTime<Utc>) -> Posting {
        Posting {
            id: id.to_string(),
            title: "Engineer".to_string(),
            company: "Acme".to_string(),
            location: None,
            description: "Rust".to_string(),
            source: "indeed".to_string(),
            scraped_at,
            url: None,
            date_posted: None,
        }
    }

    fn new_evaluation(posting_id: &str, score: Option<u8>, reason: Option<RejectionReason>) -> NewEvaluation {
        NewEvaluation {
            posting_id: posting_id.to_string(),
            run_id: Uuid::new_v4(),
            stage: if score.is_some() { Stage::Scored } else { Stage::HeuristicRejected },
            score,
            rationale: format!("rationale for {posting_id}"),
            rejection_reason: reason,
        }
    }

    #[tokio::test]
    async fn test_evaluations_are_versioned_not_overwritten() {
        let store = MemoryStore::new();
        let state = PostingState::new("p-1");
        let run = Uuid::new_v4();

        let first = store
            .commit_stage(run, &state, Some(&new_evaluation("p-1", Some(5), None)))
            .await
            .unwrap()
            .unwrap();
        let second = store
            .commit_stage(run, &state, Some(&new_evaluation("p-1", Some(8), None)))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(first.version, 1);
        assert_eq!(second.version, 2);

        let history = store.evaluation_history("p-1").await.unwrap();
        assert_eq!(history.iter().map(|e| e.score).collect::<Vec<_>>(), vec![Some(5), Some(8)]);

        let latest = store.query_evaluations(&EvaluationFilter::default()).await.unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].score, Some(8));
    }

    #[tokio::test]
    async fn test_query_filters_by_score_reason_and_text() {
        let store = MemoryStore::new();
        let run = Uuid::new_v4();
        for (id, score, reason) in [
            ("a", Some(9), None),
            ("b", Some(4), None),
            ("c", None, Some(RejectionReason::BelowHeuristicThreshold)),
        ] {
            store
                .commit_stage(run, &PostingState::new(id), Some(&new_evaluation(id, score, reason)))
                .await
                .unwrap();
        }

        let high = store
            .query_evaluations(&EvaluationFilter {
                min_score: Some(5),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(high.len(), 1);
        assert_eq!(high[0].posting_id, "a");

        let rejected = store
            .query_evaluations(&EvaluationFilter {
                reason: Some(RejectionReason::BelowHeuristicThreshold),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].posting_id, "c");

        let text = store
            .query_evaluations(&EvaluationFilter {
                text: Some("Rationale FOR b".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(text.len(), 1);
        assert_eq!(text[0].posting_id, "b");

        let all = store.query_evaluations(&EvaluationFilter::default()).await.unwrap();
        assert_eq!(
            all.iter().map(|e| e.posting_id.as_str()).collect::<Vec<_>>(),
            vec!["a", "b", "c"]
        );
    }

    #[tokio::test]
    async fn test_fingerprints_respect_window_and_skip_duplicates() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let run = Uuid::new_v4();

        store.record_posting(&make_posting("old", now - Duration::days(90))).await.unwrap();
        store.record_posting(&make_posting("fresh", now)).await.unwrap();
        store.record_posting(&make_posting("dup", now)).await.unwrap();

        for id in ["old", "fresh"] {
            let mut state = PostingState::new(id);
            state.fingerprinted(Fingerprint(1)).unwrap();
            store.commit_stage(run, &state, None).await.unwrap();
        }
        let mut dup = PostingState::new("dup");
        dup.duplicate(
            Fingerprint(1),
            NearDuplicate {
                posting_id: "fresh".to_string(),
                distance: 0,
            },
        )
        .unwrap();
        store.commit_stage(run, &dup, None).await.unwrap();

        let loaded = store.load_fingerprints(now - Duration::days(60)).await.unwrap();
        assert_eq!(loaded, vec![("fresh".to_string(), Fingerprint(1))]);
    }

    #[tokio::test]
    async fn test_fingerprint_is_written_once() {
        let store = MemoryStore::new();
        let mut state = PostingState::new("p");
        state.fingerprinted(Fingerprint(3)).unwrap();

        store.commit_stage(Uuid::new_v4(), &state, None).await.unwrap();
        store.commit_stage(Uuid::new_v4(), &state.reopened(), None).await.unwrap();

        assert_eq!(store.fingerprint_count("p").await, 1);
        assert_eq!(store.load_state("p").await.unwrap().unwrap().stage, Stage::Fingerprinted);
    }
}
