//! HTTP surface for sluice: worker claims, file administration and library
//! rescans over JSON.

pub mod errors;
pub mod handlers;
pub mod infra;
pub mod routes;

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

pub use errors::{AppError, AppResult};
pub use infra::app_state::AppState;

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_handler))
        .merge(routes::create_api_router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
