use axum::{extract::State, Json};
use serde::Deserialize;
use tracing::info;

use crate::errors::AppError;
use crate::models::Posting;
use crate::pipeline::RunSummary;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RunRequest {
    pub postings: Vec<Posting>,
    #[serde(default)]
    pub force: bool,
    pub min_score: Option<u8>,
}

/// POST /api/v1/runs
///
/// Evaluates the submitted postings with the server's pipeline and returns the run summary
/// once every posting has reached a terminal stage (or the server is shutting down).
pub async fn handle_submit_run(
    State(state): State<AppState>,
    Json(req): Json<RunRequest>,
) -> Result<Json<RunSummary>, AppError> {
    if req.postings.is_empty() {
        return Err(AppError::Validation(
            "postings must contain at least one posting".to_string(),
        ));
    }

    let mut config = state.pipeline.config().clone();
    config.force |= req.force;
    if let Some(min_score) = req.min_score {
        config.min_score = min_score;
    }
    config.validate().map_err(|e| match e {
        AppError::Configuration(msg) => AppError::Validation(msg),
        other => other,
    })?;

    info!("Run submitted over HTTP: {} postings", req.postings.len());
    let summary = state
        .pipeline
        .with_config(config)
        .run(req.postings, &state.shutdown.child_token())
        .await?;
    Ok(Json(summary))
}
