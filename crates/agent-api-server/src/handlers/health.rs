use axum::{extract::State, Json};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{json, Value};

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    success: bool,
    status: &'static str,
    timestamp: String,
    /// Seconds since the server started.
    uptime: f64,
    environment: String,
}

pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        success: true,
        status: "healthy",
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        uptime: state.started_at.elapsed().as_secs_f64(),
        environment: state.settings.server.environment.clone(),
    })
}

/// Route directory served at `/`.
pub async fn index() -> Json<Value> {
    Json(json!({
        "message": "Agent API Server",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "health": "/api/health",
            "agent": "/api/agent",
            "documents": "/api/documents",
            "rag": "/api/rag"
        }
    }))
}
