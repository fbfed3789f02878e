use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use kgrag_core::{PipelineReport, ResolvedEntity};
use serde::{Deserialize, Serialize};

use super::{status_for, ApiError};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/", post(ask))
}

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub question: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct AskParams {
    /// Return the whole report instead of the answer summary, on failure too
    #[serde(default)]
    pub trace: bool,
}

#[derive(Debug, Serialize)]
pub struct AskResponse {
    pub request_id: String,
    pub answer: String,
    pub entities: Vec<ResolvedEntity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    pub elapsed_ms: u64,
}

async fn ask(
    State(state): State<AppState>,
    Query(params): Query<AskParams>,
    Json(request): Json<AskRequest>,
) -> Result<Response, ApiError> {
    let report = state.pipeline.run(&request.question).await;

    if params.trace {
        let status = report.error().map_or(StatusCode::OK, status_for);
        return Ok((status, Json(report)).into_response());
    }

    let PipelineReport { trace, outcome } = report;
    let answer = outcome?;

    Ok(Json(AskResponse {
        request_id: trace.request_id.to_string(),
        entities: trace.resolved().cloned().collect(),
        query: trace.query,
        elapsed_ms: trace.elapsed_ms,
        answer,
    })
    .into_response())
}
