//! Per-posting stage state machine.
//!
//! A `PostingState` is the current stage plus every artifact accumulated so far. It is
//! snapshotted to the store after each transition, which is what makes resuming a
//! crashed run possible without recomputing finished stages.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{NewEvaluation, RejectionReason};
use crate::pipeline::extraction::ExtractedSkills;
use crate::pipeline::fingerprint::{Fingerprint, NearDuplicate};
use crate::pipeline::matcher::MatchResult;
use crate::pipeline::scorer::Assessment;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    New,
    Fingerprinted,
    Extracted,
    HeuristicPassed,
    Scored,
    Duplicate,
    ExtractionFailed,
    HeuristicRejected,
    ScoringFailed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::New => "new",
            Stage::Fingerprinted => "fingerprinted",
            Stage::Extracted => "extracted",
            Stage::HeuristicPassed => "heuristic_passed",
            Stage::Scored => "scored",
            Stage::Duplicate => "duplicate",
            Stage::ExtractionFailed => "extraction_failed",
            Stage::HeuristicRejected => "heuristic_rejected",
            Stage::ScoringFailed => "scoring_failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Stage::Scored
                | Stage::Duplicate
                | Stage::ExtractionFailed
                | Stage::HeuristicRejected
                | Stage::ScoringFailed
        )
    }

    pub fn rejection_reason(&self) -> Option<RejectionReason> {
        match self {
            Stage::Duplicate => Some(RejectionReason::Duplicate),
            Stage::ExtractionFailed => Some(RejectionReason::ExtractionFailed),
            Stage::HeuristicRejected => Some(RejectionReason::BelowHeuristicThreshold),
            Stage::ScoringFailed => Some(RejectionReason::ScoringFailed),
            _ => None,
        }
    }

    /// The transition graph. Stages only move forward; terminal stages have no exits.
    pub fn can_advance_to(&self, next: Stage) -> bool {
        matches!(
            (self, next),
            (Stage::New, Stage::Fingerprinted)
                | (Stage::New, Stage::Duplicate)
                | (Stage::Fingerprinted, Stage::Extracted)
                | (Stage::Fingerprinted, Stage::ExtractionFailed)
                | (Stage::Extracted, Stage::HeuristicPassed)
                | (Stage::Extracted, Stage::HeuristicRejected)
                | (Stage::HeuristicPassed, Stage::Scored)
                | (Stage::HeuristicPassed, Stage::ScoringFailed)
        )
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(Stage::New),
            "fingerprinted" => Ok(Stage::Fingerprinted),
            "extracted" => Ok(Stage::Extracted),
            "heuristic_passed" => Ok(Stage::HeuristicPassed),
            "scored" => Ok(Stage::Scored),
            "duplicate" => Ok(Stage::Duplicate),
            "extraction_failed" => Ok(Stage::ExtractionFailed),
            "heuristic_rejected" => Ok(Stage::HeuristicRejected),
            "scoring_failed" => Ok(Stage::ScoringFailed),
            other => Err(format!("unknown stage '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("illegal stage transition for posting {posting_id}: {from} -> {to}")]
pub struct TransitionError {
    pub posting_id: String,
    pub from: Stage,
    pub to: Stage,
}

/// Current stage plus accumulated artifacts for one posting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostingState {
    pub posting_id: String,
    pub stage: Stage,
    pub fingerprint: Option<Fingerprint>,
    pub duplicate_of: Option<NearDuplicate>,
    pub extracted: Option<ExtractedSkills>,
    pub match_result: Option<MatchResult>,
    pub assessment: Option<Assessment>,
    /// Last failure message for `ExtractionFailed` / `ScoringFailed`.
    pub failure: Option<String>,
    /// False when a `Scored` posting fell below the run's `min_score`.
    pub retained: bool,
}

impl PostingState {
    pub fn new(posting_id: impl Into<String>) -> Self {
        Self {
            posting_id: posting_id.into(),
            stage: Stage::New,
            fingerprint: None,
            duplicate_of: None,
            extracted: None,
            match_result: None,
            assessment: None,
            failure: None,
            retained: false,
        }
    }

    /// Fresh state for a forced re-run of a terminal posting. The fingerprint is
    /// carried over; everything downstream of it is discarded.
    pub fn reopened(&self) -> Self {
        Self {
            stage: Stage::Fingerprinted,
            fingerprint: self.fingerprint,
            ..Self::new(self.posting_id.clone())
        }
    }

    fn advance(&mut self, next: Stage) -> Result<(), TransitionError> {
        if !self.stage.can_advance_to(next) {
            return Err(TransitionError {
                posting_id: self.posting_id.clone(),
                from: self.stage,
                to: next,
            });
        }
        self.stage = next;
        Ok(())
    }

    pub fn fingerprinted(&mut self, fp: Fingerprint) -> Result<(), TransitionError> {
        self.advance(Stage::Fingerprinted)?;
        self.fingerprint = Some(fp);
        Ok(())
    }

    pub fn duplicate(&mut self, fp: Fingerprint, of: NearDuplicate) -> Result<(), TransitionError> {
        self.advance(Stage::Duplicate)?;
        self.fingerprint = Some(fp);
        self.duplicate_of = Some(of);
        Ok(())
    }

    pub fn extracted(&mut self, skills: ExtractedSkills) -> Result<(), TransitionError> {
        self.advance(Stage::Extracted)?;
        self.extracted = Some(skills);
        Ok(())
    }

    pub fn extraction_failed(&mut self, detail: String) -> Result<(), TransitionError> {
        self.advance(Stage::ExtractionFailed)?;
        self.failure = Some(detail);
        Ok(())
    }

    /// Moves to `HeuristicPassed` or `HeuristicRejected` depending on `result.passed`.
    pub fn matched(&mut self, result: MatchResult) -> Result<(), TransitionError> {
        let next = if result.passed {
            Stage::HeuristicPassed
        } else {
            Stage::HeuristicRejected
        };
        self.advance(next)?;
        self.match_result = Some(result);
        Ok(())
    }

    pub fn scored(&mut self, assessment: Assessment, retained: bool) -> Result<(), TransitionError> {
        self.advance(Stage::Scored)?;
        self.assessment = Some(assessment);
        self.retained = retained;
        Ok(())
    }

    pub fn scoring_failed(&mut self, detail: String) -> Result<(), TransitionError> {
        self.advance(Stage::ScoringFailed)?;
        self.failure = Some(detail);
        Ok(())
    }

    pub fn score(&self) -> Option<u8> {
        self.assessment.as_ref().map(|a| a.score)
    }

    /// Deterministic explanation of the terminal outcome.
    pub fn rationale(&self) -> String {
        let failure = self.failure.as_deref().unwrap_or("unknown error");
        match self.stage {
            Stage::Duplicate => match &self.duplicate_of {
                Some(d) => format!(
                    "Near-duplicate of posting {} (hamming distance {})",
                    d.posting_id, d.distance
                ),
                None => "Near-duplicate of a previously seen posting".to_string(),
            },
            Stage::ExtractionFailed => format!("Skill extraction failed: {failure}"),
            Stage::HeuristicRejected => match &self.match_result {
                Some(m) => m.describe(),
                None => "Heuristic match below threshold".to_string(),
            },
            Stage::ScoringFailed => format!("Deep scoring failed: {failure}"),
            Stage::Scored => self
                .assessment
                .as_ref()
                .map(|a| a.rationale.clone())
                .unwrap_or_default(),
            _ => format!("In progress at stage {}", self.stage),
        }
    }

    /// The evaluation to write for this state, if any. Non-terminal states and
    /// `Scored` postings below the run's `min_score` produce none.
    pub fn to_new_evaluation(&self, run_id: Uuid) -> Option<NewEvaluation> {
        if !self.stage.is_terminal() || (self.stage == Stage::Scored && !self.retained) {
            return None;
        }
        Some(NewEvaluation {
            posting_id: self.posting_id.clone(),
            run_id,
            stage: self.stage,
            score: if self.stage == Stage::Scored {
                self.score()
            } else {
                None
            },
            rationale: self.rationale(),
            rejection_reason: self.stage.rejection_reason(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::matcher::MatchScheme;

    fn passing_match() -> MatchResult {
        MatchResult {
            score: 1.0,
            passed: true,
            threshold: 0.5,
            scheme: MatchScheme::Exact,
            matched: vec!["rust".to_string()],
            partial: vec![],
            missing: vec![],
        }
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut state = PostingState::new("p-1");
        state.fingerprinted(Fingerprint(42)).unwrap();
        state.extracted(ExtractedSkills::default()).unwrap();
        state.matched(passing_match()).unwrap();
        state
            .scored(
                Assessment {
                    score: 8,
                    rationale: "Strong Rust overlap".to_string(),
                },
                true,
            )
            .unwrap();

        assert_eq!(state.stage, Stage::Scored);
        let evaluation = state.to_new_evaluation(Uuid::nil()).unwrap();
        assert_eq!(evaluation.score, Some(8));
        assert!(evaluation.rejection_reason.is_none());
        assert_eq!(evaluation.rationale, "Strong Rust overlap");
    }

    #[test]
    fn test_skipping_a_stage_is_rejected() {
        let mut state = PostingState::new("p-1");
        let err = state.extracted(ExtractedSkills::default()).unwrap_err();
        assert_eq!(err.from, Stage::New);
        assert_eq!(err.to, Stage::Extracted);
        assert_eq!(state.stage, Stage::New);
        assert!(state.extracted.is_none());
    }

    #[test]
    fn test_terminal_stages_have_no_exits() {
        let all = [
            Stage::New,
            Stage::Fingerprinted,
            Stage::Extracted,
            Stage::HeuristicPassed,
            Stage::Scored,
            Stage::Duplicate,
            Stage::ExtractionFailed,
            Stage::HeuristicRejected,
            Stage::ScoringFailed,
        ];
        for from in all.iter().filter(|s| s.is_terminal()) {
            for to in all {
                assert!(!from.can_advance_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn test_duplicate_evaluation_has_reason_and_no_score() {
        let mut state = PostingState::new("p-2");
        state
            .duplicate(
                Fingerprint(7),
                NearDuplicate {
                    posting_id: "p-1".to_string(),
                    distance: 2,
                },
            )
            .unwrap();

        let evaluation = state.to_new_evaluation(Uuid::nil()).unwrap();
        assert_eq!(evaluation.rejection_reason, Some(RejectionReason::Duplicate));
        assert!(evaluation.score.is_none());
        assert_eq!(
            evaluation.rationale,
            "Near-duplicate of posting p-1 (hamming distance 2)"
        );
    }

    #[test]
    fn test_unretained_score_produces_no_evaluation() {
        let mut state = PostingState::new("p-3");
        state.fingerprinted(Fingerprint(1)).unwrap();
        state.extracted(ExtractedSkills::default()).unwrap();
        state.matched(passing_match()).unwrap();
        state
            .scored(
                Assessment {
                    score: 6,
                    rationale: "Decent".to_string(),
                },
                false,
            )
            .unwrap();
        assert!(state.to_new_evaluation(Uuid::nil()).is_none());
    }

    #[test]
    fn test_reopened_keeps_fingerprint_only() {
        let mut state = PostingState::new("p-4");
        state.fingerprinted(Fingerprint(99)).unwrap();
        state.extraction_failed("timeout".to_string()).unwrap();

        let reopened = state.reopened();
        assert_eq!(reopened.stage, Stage::Fingerprinted);
        assert_eq!(reopened.fingerprint, Some(Fingerprint(99)));
        assert!(reopened.failure.is_none());
    }

    #[test]
    fn test_stage_round_trips_through_str() {
        for stage in [Stage::HeuristicPassed, Stage::ScoringFailed, Stage::New] {
            assert_eq!(stage.as_str().parse::<Stage>().unwrap(), stage);
        }
    }

    #[test]
    fn test_state_snapshot_serializes() {
        let mut state = PostingState::new("p-5");
        state.fingerprinted(Fingerprint(u64::MAX)).unwrap();
        let json = serde_json::to_value(&state).unwrap();
        let back: PostingState = serde_json::from_value(json).unwrap();
        assert_eq!(back, state);
    }
}
