use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use kgrag_core::Property;
use serde::Deserialize;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(list_properties))
}

#[derive(Debug, Default, Deserialize)]
pub struct PropertyQuery {
    /// Case-insensitive match on id, label or description
    search: Option<String>,
}

async fn list_properties(
    State(state): State<AppState>,
    Query(query): Query<PropertyQuery>,
) -> impl IntoResponse {
    let properties = state.pipeline.properties();
    let matches: Vec<&Property> = match query.search.as_deref().map(str::trim) {
        Some(text) if !text.is_empty() => properties.search(text),
        _ => properties.iter().collect(),
    };
    Json(matches.into_iter().cloned().collect::<Vec<_>>())
}
