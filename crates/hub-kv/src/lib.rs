//! # hub-kv
//!
//! Per-session token context window for llama-hub.
//!
//! Supports:
//! - **Batched evaluation**: splits token runs into native batches, tracking `past`
//! - **Sliding-window eviction**: keeps the first `tokens_keep` tokens verbatim and
//!   re-feeds the second half of the evicted window
//! - **Prefix reuse**: skips re-evaluating tokens already resident in the native cache
//! - **Last-N window**: fixed-capacity ring of recent tokens for repetition penalties
//! - **State snapshots**: in-memory snapshots and exact-size state files
//! - **Streaming decode**: UTF-8 safe per-token detokenization

mod decode;
mod last_n;
mod window;

pub use decode::Utf8Decoder;
pub use last_n::LastNTokens;
pub use window::{ContextWindow, WindowSnapshot};
