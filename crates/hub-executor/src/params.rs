//! Executor selection and per-call inference parameters.

use std::fmt;
use std::str::FromStr;

use hub_sampling::SamplingParams;
use serde::{Deserialize, Serialize};

/// Instruction marker that opens every instruct-mode turn.
pub const INSTRUCTION_PREFIX: &str = "\n\n### Instruction:\n\n";
/// Marker that hands the turn back to the model in instruct mode.
pub const RESPONSE_SUFFIX: &str = "\n\n### Response:\n\n";

/// Which generation loop a session runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExecutorKind {
    /// Chat-style turns that share one growing context.
    #[default]
    Interactive,
    /// Like interactive, with every turn wrapped in instruction markers.
    Instruct,
    /// Every call starts from the same primed state.
    Stateless,
}

impl fmt::Display for ExecutorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutorKind::Interactive => "interactive",
            ExecutorKind::Instruct => "instruct",
            ExecutorKind::Stateless => "stateless",
        };
        f.write_str(name)
    }
}

impl FromStr for ExecutorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "interactive" => Ok(ExecutorKind::Interactive),
            "instruct" => Ok(ExecutorKind::Instruct),
            "stateless" => Ok(ExecutorKind::Stateless),
            other => Err(format!("unknown executor type {other}")),
        }
    }
}

/// Everything an executor needs besides the context itself.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceParams {
    pub sampling: SamplingParams,
    /// Turn-terminating strings, matched against the end of recent text.
    pub anti_prompts: Vec<String>,
    /// Token budget per turn; negative means unlimited.
    pub max_tokens: i32,
    /// Leading tokens preserved when the context overflows.
    pub tokens_keep: usize,
}

impl Default for InferenceParams {
    fn default() -> Self {
        Self {
            sampling: SamplingParams::default(),
            anti_prompts: Vec::new(),
            max_tokens: -1,
            tokens_keep: 0,
        }
    }
}

impl InferenceParams {
    pub fn with_sampling(mut self, sampling: SamplingParams) -> Self {
        self.sampling = sampling;
        self
    }

    pub fn with_anti_prompt(mut self, anti_prompt: impl Into<String>) -> Self {
        self.anti_prompts.push(anti_prompt.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: i32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_tokens_keep(mut self, tokens_keep: usize) -> Self {
        self.tokens_keep = tokens_keep;
        self
    }

    pub(crate) fn is_unlimited(&self) -> bool {
        self.max_tokens < 0
    }
}
