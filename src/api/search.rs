use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use crate::error::Error;
use crate::models::{is_valid_repository_id, SearchRequest, SearchResponse, SkillMatch, SkillRequest};
use crate::state::AppState;

/// POST /api/search - Hybrid BM25 + vector search, fused with RRF.
/// Omitting `repository_id` searches every ingested repository.
pub async fn search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, (StatusCode, String)> {
    let query = req.query.trim().to_string();
    if query.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Query is required".to_string()));
    }
    if req.limit == 0 {
        return Err((StatusCode::BAD_REQUEST, "Limit must be positive".to_string()));
    }
    let repository_id = requested_repository(req.repository_id.as_deref())?;

    let results = state
        .retriever
        .retrieve(repository_id, &query, req.limit)
        .await
        .map_err(error_response)?;

    Ok(Json(SearchResponse { query, results }))
}

/// POST /api/skills - Repositories ranked by relevance to a skill or technology.
pub async fn skills(
    State(state): State<AppState>,
    Json(req): Json<SkillRequest>,
) -> Result<Json<Vec<SkillMatch>>, (StatusCode, String)> {
    let skill = req.skill.trim().to_string();
    if skill.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Skill is required".to_string()));
    }

    let matches = state
        .retriever
        .retrieve_by_skill(&skill, req.limit)
        .await
        .map_err(error_response)?;

    Ok(Json(matches))
}

/// Blank ids mean "all repositories"; anything else must be a valid id.
fn requested_repository(raw: Option<&str>) -> Result<Option<&str>, (StatusCode, String)> {
    let id = raw.map(str::trim).filter(|id| !id.is_empty());
    if id.is_some_and(|id| !is_valid_repository_id(id)) {
        return Err((StatusCode::BAD_REQUEST, "Invalid repository id".to_string()));
    }
    Ok(id)
}

fn error_response(e: Error) -> (StatusCode, String) {
    tracing::error!("Search failed: {e}");
    let status = match e {
        Error::Config(_) | Error::TokenLimit { .. } => StatusCode::BAD_REQUEST,
        _ => StatusCode::BAD_GATEWAY,
    };
    (status, e.to_string())
}
