//! Model listing and unloading.

use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::{json, Value};

use crate::{error::ServerError, models::ModelInfo, state::AppState};

pub async fn list_models(State(state): State<AppState>) -> Json<Vec<ModelInfo>> {
    let models = state
        .models()
        .configured_models()
        .into_iter()
        .map(|params| ModelInfo {
            loaded: state.models().get(&params.name).is_some(),
            sessions: state.sessions.count_for_model(&params.name),
            name: params.name,
            model_path: params.model_path,
            context_size: params.context_size,
            max_instances: params.max_instances,
        })
        .collect();
    Json(models)
}

/// Unloading releases every context on the model; its sessions stay
/// registered but fail until recreated.
pub async fn unload_model(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, ServerError> {
    if !state.models().unload(&name) {
        return Err(ServerError::NotFound(format!("model {name} is not loaded")));
    }
    Ok(Json(json!({ "unloaded": name })))
}
