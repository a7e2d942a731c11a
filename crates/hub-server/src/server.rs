//! Server setup and routing.

use std::net::SocketAddr;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    handlers::{self, models, sessions},
    state::AppState,
};

/// Create the API router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::handle_health))
        .route("/v1/models", get(models::list_models))
        .route("/v1/models/:name/unload", post(models::unload_model))
        .route("/v1/sessions", get(sessions::list_sessions))
        .route(
            "/v1/sessions/:id",
            post(sessions::create_session).delete(sessions::remove_session),
        )
        .route("/v1/sessions/:id/cancel", post(sessions::cancel_session))
        .route("/v1/sessions/:id/infer", post(handlers::handle_infer))
        .route("/v1/sessions/:id/state/save", post(sessions::save_state))
        .route("/v1/sessions/:id/state/load", post(sessions::load_state))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Run the HTTP server.
pub async fn run_server(
    state: AppState,
    addr: SocketAddr,
) -> Result<(), Box<dyn std::error::Error>> {
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "hub server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
