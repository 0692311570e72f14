//! Trigger CRUD. The caller's basic-auth credential is the trigger's apikey,
//! so one tenant can only ever see its own documents.

use std::collections::HashMap;
use std::sync::Arc;

use alarmd_core::error::AlarmError;
use alarmd_core::trigger::{TriggerDoc, TriggerStatus, trigger_id};
use alarmd_core::validate::{TriggerRequest, validate_create, validate_update};
use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::auth::{basic_credentials, unauthorized};
use crate::server::AppState;

pub const DISABLED_WHILE_UPDATING: &str = "Automatically disabled trigger while updating";
pub const DISABLED_WHILE_DELETING: &str = "Automatically disabled trigger while deleting";

/// Error body `{"error": "..."}` with the status mapped from [`AlarmError`].
pub struct ApiError(AlarmError);

impl From<AlarmError> for ApiError {
    fn from(e: AlarmError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!("❌ Trigger request failed: {}", self.0);
        }
        (status, Json(json!({"error": self.0.to_string()}))).into_response()
    }
}

type ApiResult = Result<Response, ApiError>;

#[derive(Debug, Deserialize)]
pub struct CreateBody {
    pub namespace: String,
    pub name: String,
    #[serde(flatten)]
    pub request: TriggerRequest,
}

/// Configured worker with the fewest active triggers; ties go to the first listed.
fn least_loaded<'a>(workers: &'a [String], counts: &HashMap<String, u64>) -> Option<&'a str> {
    workers
        .iter()
        .min_by_key(|w| counts.get(*w).copied().unwrap_or(0))
        .map(String::as_str)
}

/// Document fields a caller may see, without identity or bookkeeping keys.
fn config_view(doc: &TriggerDoc) -> Value {
    let mut config = serde_json::to_value(doc).unwrap_or_default();
    if let Some(fields) = config.as_object_mut() {
        for key in ["_id", "_rev", "apikey", "status", "monitor", "additionalData"] {
            fields.remove(key);
        }
    }
    config
}

fn status_view(doc: &TriggerDoc) -> Value {
    match &doc.status {
        Some(status) => serde_json::to_value(status).unwrap_or_default(),
        None => json!({"active": true}),
    }
}

pub async fn create_trigger(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateBody>,
) -> ApiResult {
    let Some(apikey) = basic_credentials(&headers) else {
        return Ok(unauthorized("Unauthorized"));
    };
    let store = state.engine.store();

    let mut doc = validate_create(&body.request, Utc::now(), state.triggers_limit)?;
    doc.apikey = apikey;
    doc.namespace = body.namespace;
    doc.name = body.name;
    doc.worker = match body.request.worker.clone() {
        Some(worker) => Some(worker),
        None => {
            let counts = store.worker_counts().await?;
            least_loaded(&state.workers, &counts).map(String::from)
        }
    };

    let id = doc.identifier();
    store.insert(&id, &doc).await.map_err(|e| match e {
        AlarmError::Conflict(_) => AlarmError::Conflict(format!(
            "trigger {}/{} already exists",
            doc.namespace, doc.name
        )),
        other => other,
    })?;
    tracing::info!("➕ Trigger {id} created on {}", doc.worker_or_default());
    Ok((
        StatusCode::OK,
        Json(json!({"ok": true, "id": id, "worker": doc.worker_or_default()})),
    )
        .into_response())
}

pub async fn get_trigger(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((namespace, name)): Path<(String, String)>,
) -> ApiResult {
    let Some(apikey) = basic_credentials(&headers) else {
        return Ok(unauthorized("Unauthorized"));
    };
    let doc = state
        .engine
        .store()
        .get(&trigger_id(&apikey, &namespace, &name))
        .await?;
    Ok(Json(json!({"config": config_view(&doc), "status": status_view(&doc)})).into_response())
}

pub async fn update_trigger(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((namespace, name)): Path<(String, String)>,
    Json(request): Json<TriggerRequest>,
) -> ApiResult {
    let Some(apikey) = basic_credentials(&headers) else {
        return Ok(unauthorized("Unauthorized"));
    };
    let engine = &state.engine;
    let id = trigger_id(&apikey, &namespace, &name);

    let existing = engine.store().get(&id).await?;
    let patch = validate_update(&existing, &request, Utc::now())?;

    // Stop the running timer first; the re-enabled document re-arms it via the feed.
    engine
        .sanitizer()
        .disable(&id, None, DISABLED_WHILE_UPDATING)
        .await?;
    let mut doc = engine.store().get(&id).await?;
    patch.apply(&mut doc);
    doc.status = Some(TriggerStatus::active_now());
    engine.store().insert(&id, &doc).await?;

    tracing::info!("✏️ Trigger {id} updated");
    Ok(Json(json!({"ok": true, "id": id})).into_response())
}

pub async fn delete_trigger(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((namespace, name)): Path<(String, String)>,
) -> ApiResult {
    let Some(apikey) = basic_credentials(&headers) else {
        return Ok(unauthorized("Unauthorized"));
    };
    let engine = &state.engine;
    let id = trigger_id(&apikey, &namespace, &name);

    engine.store().get(&id).await?;
    engine
        .sanitizer()
        .disable(&id, None, DISABLED_WHILE_DELETING)
        .await?;
    engine.sanitizer().delete_trigger_from_db(&id).await?;

    tracing::info!("➖ Trigger {id} deleted");
    Ok(Json(json!({"ok": true, "id": id})).into_response())
}
