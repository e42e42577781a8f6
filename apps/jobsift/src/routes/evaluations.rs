use axum::{
    extract::{Path, Query, State},
    Json,
};

use crate::errors::AppError;
use crate::models::{Evaluation, EvaluationFilter};
use crate::state::AppState;

/// GET /api/v1/evaluations
///
/// Latest evaluation per posting, best score first. Filters: `min_score`, `max_score`,
/// `reason`, `q` (full-text over the rationale) and `limit`.
pub async fn handle_list_evaluations(
    State(state): State<AppState>,
    Query(filter): Query<EvaluationFilter>,
) -> Result<Json<Vec<Evaluation>>, AppError> {
    if let (Some(min), Some(max)) = (filter.min_score, filter.max_score) {
        if min > max {
            return Err(AppError::Validation(format!(
                "min_score ({min}) must not exceed max_score ({max})"
            )));
        }
    }
    let evaluations = state.store.query_evaluations(&filter).await?;
    Ok(Json(evaluations))
}

/// GET /api/v1/postings/:id/evaluations
pub async fn handle_evaluation_history(
    State(state): State<AppState>,
    Path(posting_id): Path<String>,
) -> Result<Json<Vec<Evaluation>>, AppError> {
    let history = state.store.evaluation_history(&posting_id).await?;
    if history.is_empty() {
        return Err(AppError::NotFound(format!(
            "No evaluations for posting {posting_id}"
        )));
    }
    Ok(Json(history))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::runs::tests::test_state;
    use crate::models::{NewEvaluation, RejectionReason};
    use crate::pipeline::stage::{PostingState, Stage};
    use uuid::Uuid;

    async fn seed(state: &AppState, posting_id: &str, score: Option<u8>) {
        let evaluation = NewEvaluation {
            posting_id: posting_id.to_string(),
            run_id: Uuid::new_v4(),
            stage: if score.is_some() { Stage::Scored } else { Stage::HeuristicRejected },
            score,
            rationale: format!("Notes on {posting_id}"),
            rejection_reason: score.map_or(Some(RejectionReason::BelowHeuristicThreshold), |_| None),
        };
        state
            .store
            .commit_stage(evaluation.run_id, &PostingState::new(posting_id), Some(&evaluation))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_list_evaluations_applies_filter() {
        let state = test_state();
        seed(&state, "high", Some(9)).await;
        seed(&state, "low", Some(3)).await;
        seed(&state, "rejected", None).await;

        let Json(rows) = handle_list_evaluations(
            State(state),
            Query(EvaluationFilter {
                min_score: Some(5),
                ..Default::default()
            }),
        )
        .await
        .unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].posting_id, "high");
    }

    #[tokio::test]
    async fn test_list_evaluations_rejects_inverted_range() {
        let result = handle_list_evaluations(
            State(test_state()),
            Query(EvaluationFilter {
                min_score: Some(8),
                max_score: Some(2),
                ..Default::default()
            }),
        )
        .await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_history_is_not_found_for_unknown_posting() {
        let result = handle_evaluation_history(State(test_state()), Path("nope".to_string())).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_history_lists_versions_oldest_first() {
        let state = test_state();
        seed(&state, "p", Some(4)).await;
        seed(&state, "p", Some(7)).await;

        let Json(history) = handle_evaluation_history(State(state), Path("p".to_string()))
            .await
            .unwrap();
        assert_eq!(history.iter().map(|e| e.version).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(history[1].score, Some(7));
    }
}
