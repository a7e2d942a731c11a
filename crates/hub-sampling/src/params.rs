//! Sampling configuration.

use std::collections::HashMap;

use hub_engine::TokenId;
use serde::{de, Deserialize, Deserializer, Serialize};

/// Mirostat variant. Serialized as `0`, `1` or `2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum MirostatMode {
    #[default]
    Disabled,
    V1,
    V2,
}

impl TryFrom<u8> for MirostatMode {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MirostatMode::Disabled),
            1 => Ok(MirostatMode::V1),
            2 => Ok(MirostatMode::V2),
            other => Err(format!("unknown mirostat mode {other}")),
        }
    }
}

impl From<MirostatMode> for u8 {
    fn from(mode: MirostatMode) -> Self {
        match mode {
            MirostatMode::Disabled => 0,
            MirostatMode::V1 => 1,
            MirostatMode::V2 => 2,
        }
    }
}

/// Per-session sampling parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SamplingParams {
    /// Values <= 0 select greedily.
    pub temperature: f32,
    /// Values <= 0 keep the whole vocabulary.
    pub top_k: i32,
    pub top_p: f32,
    pub tail_free_z: f32,
    pub typical_p: f32,
    pub mirostat: MirostatMode,
    pub mirostat_tau: f32,
    pub mirostat_eta: f32,
    pub repeat_penalty: f32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
    /// Penalty window length; negative means the whole context.
    pub repeat_window: i32,
    pub penalize_nl: bool,
    /// Keyed by token id; JSON object keys are parsed as integers.
    #[serde(deserialize_with = "token_keyed")]
    pub logit_bias: HashMap<TokenId, f32>,
}

// Map keys arrive as strings both from JSON and through `#[serde(flatten)]`
// buffering, where integer key parsing is not available.
fn token_keyed<'de, D>(deserializer: D) -> Result<HashMap<TokenId, f32>, D::Error>
where
    D: Deserializer<'de>,
{
    HashMap::<String, f32>::deserialize(deserializer)?
        .into_iter()
        .map(|(key, bias)| {
            key.trim()
                .parse::<TokenId>()
                .map(|token| (token, bias))
                .map_err(|_| de::Error::custom(format!("logit bias key {key:?} is not a token id")))
        })
        .collect()
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.8,
            top_k: 40,
            top_p: 0.95,
            tail_free_z: 1.0,
            typical_p: 1.0,
            mirostat: MirostatMode::Disabled,
            mirostat_tau: 5.0,
            mirostat_eta: 0.1,
            repeat_penalty: 1.1,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            repeat_window: 64,
            penalize_nl: true,
            logit_bias: HashMap::new(),
        }
    }
}

impl SamplingParams {
    /// Greedy selection with every penalty disabled.
    pub fn greedy() -> Self {
        Self {
            temperature: 0.0,
            repeat_penalty: 1.0,
            ..Self::default()
        }
    }

    pub fn with_temperature(mut self, temp: f32) -> Self {
        self.temperature = temp;
        self
    }

    pub fn with_top_k(mut self, k: i32) -> Self {
        self.top_k = k;
        self
    }

    pub fn with_top_p(mut self, p: f32) -> Self {
        self.top_p = p;
        self
    }

    pub fn with_mirostat(mut self, mode: MirostatMode, tau: f32, eta: f32) -> Self {
        self.mirostat = mode;
        self.mirostat_tau = tau;
        self.mirostat_eta = eta;
        self
    }

    pub fn with_repeat_penalty(mut self, penalty: f32, window: i32) -> Self {
        self.repeat_penalty = penalty;
        self.repeat_window = window;
        self
    }

    pub fn with_logit_bias(mut self, token: TokenId, bias: f32) -> Self {
        self.logit_bias.insert(token, bias);
        self
    }

    /// Effective penalty window for a context of `n_ctx` tokens holding
    /// `available` recent tokens.
    pub fn penalty_window(&self, available: usize, n_ctx: usize) -> usize {
        let configured = usize::try_from(self.repeat_window).unwrap_or(n_ctx);
        available.min(configured).min(n_ctx)
    }
}
