use axum::{extract::State, http::StatusCode, response::Json};
use serde_json::{Value, json};
use sluice_core::FilePredicate;
use tracing::error;

use crate::AppState;

pub async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let mut health = json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
        "checks": {}
    });

    let status = match state.store.count(&FilePredicate::All).await {
        Ok(total) => {
            health["checks"]["store"] = json!({
                "status": "healthy",
                "backend": state.backend,
                "total_files": total,
            });
            StatusCode::OK
        }
        Err(err) => {
            error!(error = %err, "store health check failed");
            health["status"] = json!("unhealthy");
            health["checks"]["store"] = json!({
                "status": "unhealthy",
                "backend": state.backend,
                "error": err.to_string(),
            });
            StatusCode::SERVICE_UNAVAILABLE
        }
    };

    health["checks"]["ingest"] = json!({ "running": state.supervisor.is_some() });
    (status, Json(health))
}
