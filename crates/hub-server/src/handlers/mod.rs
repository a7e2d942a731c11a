//! HTTP request handlers for API endpoints.

pub mod health;
pub mod infer;
pub mod models;
pub mod sessions;

pub use health::handle_health;
pub use infer::handle_infer;
