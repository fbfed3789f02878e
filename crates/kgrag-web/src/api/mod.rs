mod ask;
mod health;
mod properties;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use kgrag_core::{ExecutionError, PipelineError};
use serde_json::json;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .nest("/ask", ask::router())
        .nest("/health", health::router())
        .nest("/properties", properties::router())
}

/// Pipeline failure rendered as a JSON body with a matching status
#[derive(Debug)]
pub struct ApiError(pub PipelineError);

impl ApiError {
    pub const fn status(&self) -> StatusCode {
        status_for(&self.0)
    }
}

pub const fn status_for(error: &PipelineError) -> StatusCode {
    match error {
        PipelineError::EmptyQuestion
        | PipelineError::NoEntitiesFound
        | PipelineError::NoResolvedEntities { .. }
        | PipelineError::SynthesisFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
        PipelineError::StageTimedOut { .. }
        | PipelineError::ExecutionFailed(ExecutionError::Timeout) => StatusCode::GATEWAY_TIMEOUT,
        PipelineError::RetrievalFailed { .. }
        | PipelineError::ExecutionFailed(_)
        | PipelineError::ModelUnavailable { .. } => StatusCode::BAD_GATEWAY,
    }
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.0.is_upstream() {
            tracing::error!("Upstream failure: {}", self.0);
        }
        let body = json!({
            "error": {
                "kind": self.0.kind(),
                "message": self.0.user_message(),
            }
        });
        (self.status(), Json(body)).into_response()
    }
}
