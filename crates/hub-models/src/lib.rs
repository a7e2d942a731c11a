//! # hub-models
//!
//! Model registry for llama-hub: loads each named model exactly once, owns
//! the per-session contexts allocated from it, and reads the hub
//! configuration file that names the available models.

mod config;
mod registry;

pub use config::{ConfigError, HubConfig};
pub use registry::{LoadedModel, ModelRegistry, SharedContext};
