//! Operational endpoints.

use std::collections::HashMap;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::server::AppState;

/// Liveness check.
pub async fn ping() -> Json<serde_json::Value> {
    Json(serde_json::json!({"msg": "pong"}))
}

/// Engine snapshot (armed triggers, active host, last self-test result)
/// plus host memory and CPU usage.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let health = state.engine.health();
    let mut body = serde_json::to_value(&health).unwrap_or_default();
    body["uptimeSecs"] = state.start_time.elapsed().as_secs().into();
    let (memory, cpu) = state.system.sample();
    body["memory"] = serde_json::to_value(memory).unwrap_or_default();
    body["cpu"] = serde_json::to_value(cpu).unwrap_or_default();
    Json(body)
}

/// `GET /active?active=true|false` flips whether this host may fire
/// unpinned triggers; without a query it only reports.
pub async fn active(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let engine = &state.engine;
    if let Some(raw) = query.get("active") {
        let Ok(enabled) = raw.trim().to_lowercase().parse::<bool>() else {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"error": format!("Invalid query string: active={raw}")})),
            )
                .into_response();
        };
        if engine.active().set_enabled(enabled) {
            tracing::info!("🎚️ {} firing switched {}", engine.host(), if enabled { "on" } else { "off" });
        }
    }
    Json(serde_json::json!({
        "active": engine.active().enabled(),
        "worker": engine.worker(),
        "host": engine.host(),
        "activeHost": engine.active().active_host(),
    }))
    .into_response()
}
