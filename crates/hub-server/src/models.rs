//! Request and response bodies that are not session types themselves.

use hub_executor::ExecutorKind;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct InferRequest {
    pub prompt: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StateFileRequest {
    pub path: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    pub name: String,
    pub model_path: String,
    pub context_size: usize,
    pub max_instances: i32,
    pub loaded: bool,
    pub sessions: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: String,
    pub model: String,
    pub executor_type: ExecutorKind,
}
