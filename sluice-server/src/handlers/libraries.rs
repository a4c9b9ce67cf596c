use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sluice_model::{LibraryId, ProcessingOrder, ScanMode};

use crate::{
    AppState,
    errors::{AppError, AppResult},
};

#[derive(Debug, Serialize, Deserialize)]
pub struct LibrarySummary {
    pub id: LibraryId,
    pub name: String,
    pub path: String,
    pub enabled: bool,
    pub processing_order: ProcessingOrder,
    pub scan_mode: ScanMode,
    /// A filesystem watcher is running (scan-mode libraries and fallbacks
    /// report `false`).
    pub watching: bool,
    pub last_scanned: Option<DateTime<Utc>>,
}

pub async fn list_libraries_handler(
    State(state): State<AppState>,
) -> AppResult<Json<Vec<LibrarySummary>>> {
    let mut summaries = Vec::new();
    for library in state.catalog.list().await? {
        let watching = match &state.supervisor {
            Some(supervisor) => supervisor.is_watching(library.id).await,
            None => false,
        };
        summaries.push(LibrarySummary {
            id: library.id,
            name: library.name,
            path: library.path.display().to_string(),
            enabled: library.enabled,
            processing_order: library.processing_order,
            scan_mode: library.scan_mode,
            watching,
            last_scanned: library.last_scanned,
        });
    }
    Ok(Json(summaries))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RescanResponse {
    pub library_id: LibraryId,
    pub accepted: bool,
}

/// Queue a full scan. `202` when triggered, `409` when one is already
/// running.
pub async fn rescan_library_handler(
    State(state): State<AppState>,
    Path(library_id): Path<LibraryId>,
) -> AppResult<(StatusCode, Json<RescanResponse>)> {
    let Some(supervisor) = state.supervisor.as_ref() else {
        return Err(AppError::unavailable("ingestion is not running"));
    };
    if !supervisor.registered().await.contains(&library_id) {
        return Err(AppError::not_found(format!(
            "library {library_id} is not being ingested"
        )));
    }
    if !supervisor.rescan(library_id).await {
        return Err(AppError::conflict(format!(
            "a scan of library {library_id} is already running"
        )));
    }
    Ok((
        StatusCode::ACCEPTED,
        Json(RescanResponse {
            library_id,
            accepted: true,
        }),
    ))
}
