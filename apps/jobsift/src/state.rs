use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::pipeline::Pipeline;
use crate::store::PipelineStore;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn PipelineStore>,
    /// Runs submitted over HTTP use the server's pipeline settings unless overridden.
    pub pipeline: Pipeline,
    /// Cancelled on shutdown; each submitted run gets a child token.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(pipeline: Pipeline, shutdown: CancellationToken) -> Self {
        Self {
            store: pipeline.store().clone(),
            pipeline,
            shutdown,
        }
    }
}
