//! Inference handler.

use axum::{
    extract::{Path, State},
    response::{IntoResponse, Response},
    Json,
};
use hub_engine::HubError;

use crate::{error::ServerError, models::InferRequest, state::AppState, streaming};

/// Stream one call on session `id` as SSE.
///
/// Unknown and busy sessions are rejected with a status code before the
/// stream starts; failures after that arrive as `error` events.
pub async fn handle_infer(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<InferRequest>,
) -> Result<Response, ServerError> {
    let session = state
        .sessions
        .get(&id)
        .ok_or_else(|| HubError::SessionNotFound(id.clone()))?;
    if session.is_busy() {
        return Err(HubError::SessionBusy(id).into());
    }

    tracing::debug!(session = %id, chars = req.prompt.len(), "inference requested");
    let fragments = state.sessions.infer(&id, &req.prompt);
    Ok(streaming::stream_fragments(fragments).into_response())
}
