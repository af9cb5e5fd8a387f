use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::models::{is_valid_repository_id, IngestRequest};
use crate::source::snapshot_from_dir;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct IngestAccepted {
    pub repository_id: String,
    pub status: &'static str,
}

/// POST /api/repos/{id}/ingest - Ingest the checkout under
/// `<data_dir>/repos/{id}` in the background.
pub async fn ingest_repo(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<IngestRequest>,
) -> Result<(StatusCode, Json<IngestAccepted>), (StatusCode, String)> {
    if !is_valid_repository_id(&id) {
        return Err((StatusCode::BAD_REQUEST, "Invalid repository id".to_string()));
    }
    let workdir = state.config.repo_workdir(&id);
    if !workdir.is_dir() {
        return Err((StatusCode::NOT_FOUND, "Repository workdir not found".to_string()));
    }
    let tech_stack = req.tech_stack;

    let repository_id = id.clone();
    tokio::spawn(async move {
        let Ok(_permit) = state.ingest_semaphore.acquire().await else {
            return;
        };
        let snapshot = match tokio::task::spawn_blocking({
            let id = id.clone();
            move || snapshot_from_dir(&id, &workdir, tech_stack)
        })
        .await
        {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::error!("Failed to read files for {id}: {e}");
                return;
            }
        };

        match state.pipeline.ingest(&snapshot).await {
            Ok(report) => tracing::info!(
                "Ingested {}: {} files, {} chunks, {} truncated",
                report.repository_id,
                report.files,
                report.chunks,
                report.truncated_records
            ),
            Err(e) => tracing::error!("Failed to ingest {id}: {e}"),
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(IngestAccepted {
            repository_id,
            status: "ingesting",
        }),
    ))
}

/// GET /api/health
pub async fn health() -> &'static str {
    "ok"
}
