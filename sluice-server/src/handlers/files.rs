//! File listing and administration.

use axum::{
    extract::{Query, State},
    response::Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sluice_core::{EligibilityRequest, StatusSummary};
use sluice_model::{FileUid, FileView, LibraryFile, NodeId};

use crate::{
    AppState,
    errors::{AppError, AppResult},
};

const DEFAULT_PAGE: usize = 100;
const MAX_PAGE: usize = 1000;

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub view: Option<String>,
    pub skip: Option<usize>,
    pub take: Option<usize>,
    /// List as this node would see the queue.
    pub node: Option<NodeId>,
}

fn page_size(take: Option<usize>) -> usize {
    take.unwrap_or(DEFAULT_PAGE).clamp(1, MAX_PAGE)
}

pub async fn list_files_handler(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<Vec<LibraryFile>>> {
    let view = FileView::parse(query.view.as_deref().unwrap_or_default())?;
    let request = EligibilityRequest {
        view,
        node: query.node,
        skip: query.skip.unwrap_or(0),
        take: Some(page_size(query.take)),
        ..EligibilityRequest::default()
    };
    Ok(Json(state.admin.list(&request, Utc::now()).await?))
}

pub async fn summary_handler(State(state): State<AppState>) -> AppResult<Json<StatusSummary>> {
    Ok(Json(state.admin.summary(Utc::now()).await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

pub async fn upcoming_handler(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> AppResult<Json<Vec<LibraryFile>>> {
    let limit = page_size(query.limit.or(Some(25)));
    Ok(Json(state.admin.upcoming(limit, Utc::now()).await?))
}

pub async fn recent_handler(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> AppResult<Json<Vec<LibraryFile>>> {
    let limit = page_size(query.limit.or(Some(25)));
    Ok(Json(state.admin.recently_finished(limit).await?))
}

#[derive(Debug, Deserialize)]
pub struct FilesRequest {
    pub uids: Vec<FileUid>,
    /// Reprocess only: pin the files to this node.
    #[serde(default)]
    pub node: Option<NodeId>,
}

impl FilesRequest {
    fn uids(&self) -> AppResult<&[FileUid]> {
        if self.uids.is_empty() {
            return Err(AppError::bad_request("uids must not be empty"));
        }
        Ok(&self.uids)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FilesResponse {
    pub updated: usize,
    pub files: Vec<LibraryFile>,
}

impl From<Vec<LibraryFile>> for FilesResponse {
    fn from(files: Vec<LibraryFile>) -> Self {
        Self {
            updated: files.len(),
            files,
        }
    }
}

pub async fn reprocess_handler(
    State(state): State<AppState>,
    Json(request): Json<FilesRequest>,
) -> AppResult<Json<FilesResponse>> {
    let files = state.admin.reprocess(request.uids()?, request.node).await?;
    Ok(Json(files.into()))
}

pub async fn force_handler(
    State(state): State<AppState>,
    Json(request): Json<FilesRequest>,
) -> AppResult<Json<FilesResponse>> {
    let files = state
        .admin
        .set_force_processing(request.uids()?, true)
        .await?;
    Ok(Json(files.into()))
}

pub async fn unforce_handler(
    State(state): State<AppState>,
    Json(request): Json<FilesRequest>,
) -> AppResult<Json<FilesResponse>> {
    let files = state
        .admin
        .set_force_processing(request.uids()?, false)
        .await?;
    Ok(Json(files.into()))
}

pub async fn move_to_top_handler(
    State(state): State<AppState>,
    Json(request): Json<FilesRequest>,
) -> AppResult<Json<FilesResponse>> {
    let files = state.admin.move_to_top(request.uids()?).await?;
    Ok(Json(files.into()))
}

pub async fn unhold_handler(
    State(state): State<AppState>,
    Json(request): Json<FilesRequest>,
) -> AppResult<Json<FilesResponse>> {
    let files = state.admin.unhold(request.uids()?).await?;
    Ok(Json(files.into()))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub deleted: u64,
}

pub async fn delete_handler(
    State(state): State<AppState>,
    Json(request): Json<FilesRequest>,
) -> AppResult<Json<DeleteResponse>> {
    let deleted = state.admin.delete(request.uids()?).await?;
    Ok(Json(DeleteResponse { deleted }))
}
