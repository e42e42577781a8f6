use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::errors::StoreError;
use crate::pipeline::stage::Stage;

/// Why a posting left the pipeline without a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    Duplicate,
    BelowHeuristicThreshold,
    ExtractionFailed,
    ScoringFailed,
}

impl RejectionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionReason::Duplicate => "duplicate",
            RejectionReason::BelowHeuristicThreshold => "below_heuristic_threshold",
            RejectionReason::ExtractionFailed => "extraction_failed",
            RejectionReason::ScoringFailed => "scoring_failed",
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RejectionReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "duplicate" => Ok(RejectionReason::Duplicate),
            "below_heuristic_threshold" => Ok(RejectionReason::BelowHeuristicThreshold),
            "extraction_failed" => Ok(RejectionReason::ExtractionFailed),
            "scoring_failed" => Ok(RejectionReason::ScoringFailed),
            other => Err(format!("unknown rejection reason '{other}'")),
        }
    }
}

/// An evaluation about to be written. The store assigns `version` and `created_at`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewEvaluation {
    pub posting_id: String,
    pub run_id: Uuid,
    pub stage: Stage,
    pub score: Option<u8>,
    pub rationale: String,
    pub rejection_reason: Option<RejectionReason>,
}

/// Terminal record for one posting in one run.
///
/// Evaluations are append-only: re-scoring a posting writes version N+1 and leaves
/// earlier versions untouched. A score and a rejection reason are mutually exclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub id: Uuid,
    pub posting_id: String,
    pub run_id: Uuid,
    pub version: i32,
    pub stage: Stage,
    pub score: Option<u8>,
    pub rationale: String,
    pub rejection_reason: Option<RejectionReason>,
    pub created_at: DateTime<Utc>,
}

impl Evaluation {
    pub fn from_new(new: &NewEvaluation, version: i32, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            posting_id: new.posting_id.clone(),
            run_id: new.run_id,
            version,
            stage: new.stage,
            score: new.score,
            rationale: new.rationale.clone(),
            rejection_reason: new.rejection_reason,
            created_at,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct EvaluationRow {
    pub id: Uuid,
    pub posting_id: String,
    pub run_id: Uuid,
    pub version: i32,
    pub stage: String,
    pub score: Option<i16>,
    pub rationale: String,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<EvaluationRow> for Evaluation {
    type Error = StoreError;

    fn try_from(row: EvaluationRow) -> Result<Self, Self::Error> {
        let corrupt = |detail: String| StoreError::Corrupt {
            posting_id: row.posting_id.clone(),
            detail,
        };
        let stage = row.stage.parse::<Stage>().map_err(corrupt)?;
        let rejection_reason = row
            .rejection_reason
            .as_deref()
            .map(str::parse::<RejectionReason>)
            .transpose()
            .map_err(corrupt)?;
        let score = row
            .score
            .map(|s| u8::try_from(s).map_err(|_| corrupt(format!("score {s} out of range"))))
            .transpose()?;

        Ok(Evaluation {
            id: row.id,
            posting_id: row.posting_id,
            run_id: row.run_id,
            version: row.version,
            stage,
            score,
            rationale: row.rationale,
            rejection_reason,
            created_at: row.created_at,
        })
    }
}

/// Dashboard-style filter over the latest evaluation of each posting.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EvaluationFilter {
    pub min_score: Option<u8>,
    pub max_score: Option<u8>,
    pub reason: Option<RejectionReason>,
    /// Full-text query over the rationale.
    #[serde(rename = "q")]
    pub text: Option<String>,
    pub limit: Option<i64>,
}

impl EvaluationFilter {
    pub const DEFAULT_LIMIT: i64 = 100;

    pub fn effective_limit(&self) -> i64 {
        self.limit.unwrap_or(Self::DEFAULT_LIMIT).clamp(1, 1000)
    }
}
