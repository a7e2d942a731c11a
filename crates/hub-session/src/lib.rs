//! # hub-session
//!
//! Sessions for llama-hub: each session id owns one context window on a
//! loaded model plus the executor that drives it. The [`SessionRegistry`]
//! creates, replaces and removes sessions and turns an executor call into a
//! stream of [`InferFragment`]s.
//!
//! ## Design Notes
//!
//! ### Blocking work
//! Prompt evaluation and token generation are blocking native calls. They
//! run on `spawn_blocking`; generated text reaches the async side through a
//! one-slot channel, so generation never runs ahead of the consumer by more
//! than a token.
//!
//! ### Cancellation
//! Every call gets a `CancellationToken` that is a child of the session's
//! lifetime token. It fires on [`SessionRegistry::cancel`], on removal, on
//! an optional caller token, and when the fragment stream is dropped.

mod config;
mod filter;
mod fragment;
mod registry;
mod session;

pub use config::{parse_csv, SessionConfig};
pub use filter::KeywordFilter;
pub use fragment::InferFragment;
pub use registry::SessionRegistry;
pub use session::Session;
