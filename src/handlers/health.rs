use axum::Json;
use serde_json::{json, Value};

/// Handler for health checks
pub async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "OK",
        "message": "Server is healthy",
    }))
}
