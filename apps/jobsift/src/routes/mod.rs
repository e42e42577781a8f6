pub mod evaluations;
pub mod health;
pub mod runs;

use axum::{
    routing::{get, post},
    Router,
};

use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route(
            "/api/v1/evaluations",
            get(evaluations::handle_list_evaluations),
        )
        .route(
            "/api/v1/postings/:id/evaluations",
            get(evaluations::handle_evaluation_history),
        )
        .route("/api/v1/runs", post(runs::handle_submit_run))
        .with_state(state)
}
