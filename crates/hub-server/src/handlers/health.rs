//! Health check handler.

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::state::AppState;

/// Liveness plus a summary of what is loaded.
pub async fn handle_health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "models": {
            "configured": state.models().configured_models().len(),
            "loaded": state.models().loaded_names(),
        },
        "sessions": state.sessions.len(),
    }))
}
