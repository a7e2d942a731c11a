//! # hub-executor
//!
//! Generation loops for llama-hub sessions.
//!
//! An [`Executor`] owns the per-turn state of one context window
//! (prompt-run flag, token budget, wait-for-input flag, pending batch,
//! mirostat `mu`) and runs a single loop shared by every mode. The modes
//! differ only in three hooks:
//!
//! | Mode | preprocess | should continue | post-process |
//! |------|------------|-----------------|--------------|
//! | Interactive | prompt run gets a leading space and BOS; later turns get a trailing newline | budget left and not waiting, or still in the prompt run | anti-prompt or budget ends the turn; EOS becomes a newline plus the first anti-prompt |
//! | Instruct | turns are wrapped in instruction/response markers | as interactive | as interactive; EOS just ends the turn |
//! | Stateless | the text is appended to the primed baseline | not waiting and under `max_tokens` | anti-prompt or EOS ends the call; the baseline is restored afterwards |
//!
//! A call is a [`Generation`]: a pull-based iterator carrying a
//! `CancellationToken` that is checked before every loop pass.

mod executor;
mod generation;
mod params;

pub use executor::{Executor, SharedWindow};
pub use generation::{Generation, StopReason};
pub use params::{ExecutorKind, InferenceParams, INSTRUCTION_PREFIX, RESPONSE_SUFFIX};
