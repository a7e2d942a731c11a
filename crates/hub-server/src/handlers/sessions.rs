//! Session lifecycle and persistence handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use hub_engine::HubError;
use hub_session::SessionConfig;
use serde_json::{json, Value};

use crate::{
    error::ServerError,
    models::{SessionInfo, StateFileRequest},
    state::AppState,
};

/// Create or replace the session `id`.
pub async fn create_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(config): Json<SessionConfig>,
) -> Result<(StatusCode, Json<SessionInfo>), ServerError> {
    if config.model.trim().is_empty() {
        return Err(ServerError::InvalidRequest("model must not be empty".into()));
    }
    let session = state.sessions.create(&id, config).await?;
    Ok((
        StatusCode::CREATED,
        Json(SessionInfo {
            id,
            model: session.config().model.clone(),
            executor_type: session.kind(),
        }),
    ))
}

pub async fn list_sessions(State(state): State<AppState>) -> Json<Vec<SessionInfo>> {
    let sessions = state
        .sessions
        .list()
        .into_iter()
        .filter_map(|id| state.sessions.get(&id))
        .map(|session| SessionInfo {
            id: session.id().to_string(),
            model: session.config().model.clone(),
            executor_type: session.kind(),
        })
        .collect();
    Json(sessions)
}

pub async fn remove_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ServerError> {
    if state.sessions.remove(&id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(HubError::SessionNotFound(id).into())
    }
}

pub async fn cancel_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ServerError> {
    if state.sessions.get(&id).is_none() {
        return Err(HubError::SessionNotFound(id).into());
    }
    let cancelled = state.sessions.cancel(&id);
    Ok(Json(json!({ "id": id, "cancelled": cancelled })))
}

pub async fn save_state(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<StateFileRequest>,
) -> Result<Json<Value>, ServerError> {
    let bytes = state.sessions.save_state(&id, &req.path).await?;
    Ok(Json(json!({ "id": id, "path": req.path, "bytes": bytes })))
}

pub async fn load_state(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<StateFileRequest>,
) -> Result<Json<Value>, ServerError> {
    state.sessions.load_state(&id, &req.path).await?;
    Ok(Json(json!({ "id": id, "path": req.path })))
}
