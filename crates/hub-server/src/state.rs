//! Application state shared across handlers.

use std::sync::Arc;

use hub_models::ModelRegistry;
use hub_session::SessionRegistry;

#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionRegistry>,
}

impl AppState {
    pub fn new(sessions: SessionRegistry) -> Self {
        Self {
            sessions: Arc::new(sessions),
        }
    }

    pub fn models(&self) -> &Arc<ModelRegistry> {
        self.sessions.models()
    }
}
