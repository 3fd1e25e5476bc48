// Public routes need no token; everything under /api passes the JWT middleware
pub mod approval;

use axum::Json;
use serde_json::{json, Value};

/// GET /health
pub async fn health() -> Json<Value> {
    Json(json!({
        "success": true,
        "data": { "status": "ok", "service": env!("CARGO_PKG_NAME") }
    }))
}
