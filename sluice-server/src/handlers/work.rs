//! Worker-facing claim endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use sluice_core::{ClaimRequest, CompletionReport, ProgressReport};
use sluice_model::{FileUid, LibraryFile, NodeId, WorkerId};

use crate::{AppState, errors::AppResult};

/// `200` with the claimed file, or `204` when nothing is eligible.
pub async fn next_work_handler(
    State(state): State<AppState>,
    Json(request): Json<ClaimRequest>,
) -> AppResult<Response> {
    match state.claims.next_file(&request).await? {
        Some(file) => Ok(Json(file).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

#[derive(Debug, Deserialize)]
pub struct CheckpointRequest {
    pub worker_id: WorkerId,
    #[serde(flatten)]
    pub progress: ProgressReport,
}

pub async fn checkpoint_handler(
    State(state): State<AppState>,
    Path(uid): Path<FileUid>,
    Json(request): Json<CheckpointRequest>,
) -> AppResult<Json<LibraryFile>> {
    let file = state
        .claims
        .checkpoint(uid, request.worker_id, request.progress)
        .await?;
    Ok(Json(file))
}

pub async fn complete_handler(
    State(state): State<AppState>,
    Path(uid): Path<FileUid>,
    Json(report): Json<CompletionReport>,
) -> AppResult<Json<LibraryFile>> {
    Ok(Json(state.claims.complete(uid, report).await?))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AbortResponse {
    pub uid: FileUid,
    /// `false` when the file was not being processed.
    pub reset: bool,
}

pub async fn abort_handler(
    State(state): State<AppState>,
    Path(uid): Path<FileUid>,
) -> AppResult<Json<AbortResponse>> {
    let reset = state.claims.abort(uid).await?;
    Ok(Json(AbortResponse { uid, reset }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReleaseResponse {
    pub node_id: NodeId,
    pub released: usize,
}

pub async fn release_node_handler(
    State(state): State<AppState>,
    Path(node_id): Path<NodeId>,
) -> AppResult<Json<ReleaseResponse>> {
    let released = state.claims.release_node(node_id).await?;
    Ok(Json(ReleaseResponse { node_id, released }))
}
