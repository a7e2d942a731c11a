//! # hub-server
//!
//! HTTP API for llama-hub sessions.
//!
//! Sessions are created and removed by id; inference on a session is
//! streamed back as Server-Sent Events, one JSON fragment per event.

pub mod error;
pub mod handlers;
pub mod models;
pub mod server;
pub mod state;
pub mod streaming;

pub use error::ServerError;
pub use server::{create_router, run_server};
pub use state::AppState;
