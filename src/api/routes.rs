//! HTTP route handlers.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::api::server::AppState;
use crate::error::TallyError;
use crate::pipeline::SendResponse;
use crate::session::{ChatOverrides, Mode};

#[derive(Debug, Deserialize)]
pub struct ChatBody {
    pub session_id: Option<String>,
    pub message: String,
    #[serde(default)]
    pub overrides: ChatOverrides,
}

#[derive(Debug, Deserialize)]
pub struct SessionBody {
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ModeBody {
    pub session_id: String,
    pub mode: String,
}

/// HTTP status for a failed request.
pub fn status_for(err: &TallyError) -> StatusCode {
    match err {
        TallyError::BudgetExceeded { .. } => StatusCode::PAYMENT_REQUIRED,
        TallyError::Provider(_) => StatusCode::BAD_GATEWAY,
        TallyError::UnknownMode { .. }
        | TallyError::InvalidSession(_)
        | TallyError::Config(_) => StatusCode::BAD_REQUEST,
        TallyError::Cancelled => StatusCode::REQUEST_TIMEOUT,
        TallyError::Persistence(_) | TallyError::Io(_) | TallyError::Json(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn error_body(err: &TallyError) -> (StatusCode, Json<Value>) {
    (
        status_for(err),
        Json(json!({ "success": false, "error": err.to_string(), "error_kind": err.kind() })),
    )
}

fn unknown_session(id: &str) -> (StatusCode, Json<Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "success": false, "error": format!("unknown session '{}'", id) })),
    )
}

/// `POST /api/chat`
pub async fn chat(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ChatBody>,
) -> (StatusCode, Json<Value>) {
    if body.message.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "success": false, "error": "message must not be empty" })),
        );
    }

    let (session_id, pipeline) = match state
        .registry
        .get_or_create(body.session_id.as_deref())
        .await
    {
        Ok(session) => session,
        Err(e) => return error_body(&e),
    };
    let result = pipeline
        .lock()
        .await
        .send_message(&body.message, &body.overrides)
        .await;

    let code = match &result {
        Ok(_) => StatusCode::OK,
        Err(e) => status_for(e),
    };
    let response = SendResponse::from(result);
    let mut value = serde_json::to_value(&response)
        .unwrap_or_else(|_| json!({ "success": response.success }));
    value["session_id"] = json!(session_id);
    (code, Json(value))
}

/// `GET /api/status/{session}`
pub async fn status(
    State(state): State<Arc<AppState>>,
    Path(session): Path<String>,
) -> (StatusCode, Json<Value>) {
    let Some(pipeline) = state.registry.get(&session).await else {
        return unknown_session(&session);
    };
    let snapshot = pipeline.lock().await.status().await;
    let body = serde_json::to_value(&snapshot).unwrap_or_else(|_| json!({}));
    (StatusCode::OK, Json(body))
}

/// `GET /api/report/{session}`
pub async fn report(
    State(state): State<Arc<AppState>>,
    Path(session): Path<String>,
) -> (StatusCode, Json<Value>) {
    let Some(pipeline) = state.registry.get(&session).await else {
        return unknown_session(&session);
    };
    let report = pipeline.lock().await.detailed_report().await;
    let body = serde_json::to_value(&report).unwrap_or_else(|_| json!({}));
    (StatusCode::OK, Json(body))
}

/// `GET /api/modes`
pub async fn modes() -> Json<Value> {
    let modes: Vec<Value> = Mode::ALL
        .iter()
        .map(|m| {
            json!({
                "id": m.id(),
                "label": m.label(),
                "temperature": m.temperature(),
                "max_tokens": m.max_tokens(),
            })
        })
        .collect();
    Json(json!({ "modes": modes }))
}

/// `POST /api/mode`
pub async fn switch_mode(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ModeBody>,
) -> (StatusCode, Json<Value>) {
    let Some(pipeline) = state.registry.get(&body.session_id).await else {
        return unknown_session(&body.session_id);
    };
    let result = pipeline.lock().await.switch_mode(&body.mode);
    match result {
        Ok(mode) => (
            StatusCode::OK,
            Json(json!({ "success": true, "mode": mode.id(), "label": mode.label() })),
        ),
        Err(e) => error_body(&e),
    }
}

/// `POST /api/reset`
pub async fn reset(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SessionBody>,
) -> (StatusCode, Json<Value>) {
    let Some(pipeline) = state.registry.get(&body.session_id).await else {
        return unknown_session(&body.session_id);
    };
    pipeline.lock().await.reset();
    (StatusCode::OK, Json(json!({ "success": true })))
}

/// `POST /api/save`
pub async fn save(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SessionBody>,
) -> (StatusCode, Json<Value>) {
    let Some(pipeline) = state.registry.get(&body.session_id).await else {
        return unknown_session(&body.session_id);
    };
    let result = pipeline.lock().await.save();
    match result {
        Ok(path) => (
            StatusCode::OK,
            Json(json!({ "success": true, "path": path.display().to_string() })),
        ),
        Err(e) => error_body(&e),
    }
}
