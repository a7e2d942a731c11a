//! # hub-runtime
//!
//! Reference native backends and telemetry hooks for llama-hub.
//!
//! The backends implement the `hub-engine` traits entirely in Rust so the
//! session engine can run (and be tested) without an FFI engine:
//! - [`TinyBackend`]: a seeded toy language model producing printable text
//! - [`ScriptedBackend`]: replays a fixed reply, one token per evaluation,
//!   which makes turn termination and cancellation observable
//!
//! Both share a byte-level tokenizer, a serializable state blob and
//! failure injection for native evaluation errors.

mod context;
mod scripted;
pub mod telemetry;
mod tiny;
pub mod tokenizer;

pub use context::BackendStats;
pub use scripted::ScriptedBackend;
pub use telemetry::{
    CallMetrics, InferenceTimer, LogTelemetry, NoopTelemetry, TelemetryHook,
    TracingTelemetry,
};
pub use tiny::TinyBackend;
