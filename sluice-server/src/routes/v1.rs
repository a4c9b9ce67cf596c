use axum::{
    Router,
    routing::{get, post},
};

use crate::{
    AppState,
    handlers::{files, libraries, work},
};

/// Create all v1 API routes
pub fn create_v1_router() -> Router<AppState> {
    Router::new()
        .merge(create_work_routes())
        .merge(create_file_routes())
        .merge(create_library_routes())
}

fn create_work_routes() -> Router<AppState> {
    Router::new()
        .route("/work/next", post(work::next_work_handler))
        .route("/work/{uid}/checkpoint", post(work::checkpoint_handler))
        .route("/work/{uid}/complete", post(work::complete_handler))
        .route("/work/{uid}/abort", post(work::abort_handler))
        .route("/nodes/{node_id}/release", post(work::release_node_handler))
}

fn create_file_routes() -> Router<AppState> {
    Router::new()
        .route("/files", get(files::list_files_handler))
        .route("/files/summary", get(files::summary_handler))
        .route("/files/upcoming", get(files::upcoming_handler))
        .route("/files/recent", get(files::recent_handler))
        .route("/files/reprocess", post(files::reprocess_handler))
        .route("/files/force", post(files::force_handler))
        .route("/files/unforce", post(files::unforce_handler))
        .route("/files/move-to-top", post(files::move_to_top_handler))
        .route("/files/unhold", post(files::unhold_handler))
        .route("/files/delete", post(files::delete_handler))
}

fn create_library_routes() -> Router<AppState> {
    Router::new()
        .route("/libraries", get(libraries::list_libraries_handler))
        .route(
            "/libraries/{id}/rescan",
            post(libraries::rescan_library_handler),
        )
}
