//! Session creation request.

use hub_executor::{ExecutorKind, InferenceParams};
use hub_sampling::SamplingParams;
use serde::{Deserialize, Serialize};

/// Immutable parameters of one session, as sent by a client:
///
/// ```json
/// { "model": "llama-7b", "prompt": "Transcript...", "antiPrompt": "User:",
///   "executorType": "Interactive", "temperature": 0.7, "maxTokens": 256 }
/// ```
///
/// Sampling fields sit at the top level next to the session fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    pub model: String,
    #[serde(default)]
    pub prompt: String,
    /// Comma-separated turn terminators.
    #[serde(default)]
    pub anti_prompt: String,
    /// Comma-separated keywords removed from the output.
    #[serde(default)]
    pub output_filter: String,
    #[serde(default)]
    pub executor_type: ExecutorKind,
    #[serde(flatten)]
    pub sampling: SamplingParams,
    #[serde(default = "unlimited")]
    pub max_tokens: i32,
    #[serde(default)]
    pub tokens_keep: usize,
}

fn unlimited() -> i32 {
    -1
}

impl SessionConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: String::new(),
            anti_prompt: String::new(),
            output_filter: String::new(),
            executor_type: ExecutorKind::default(),
            sampling: SamplingParams::default(),
            max_tokens: unlimited(),
            tokens_keep: 0,
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    pub fn with_anti_prompt(mut self, csv: impl Into<String>) -> Self {
        self.anti_prompt = csv.into();
        self
    }

    pub fn with_output_filter(mut self, csv: impl Into<String>) -> Self {
        self.output_filter = csv.into();
        self
    }

    pub fn with_executor(mut self, kind: ExecutorKind) -> Self {
        self.executor_type = kind;
        self
    }

    pub fn with_sampling(mut self, sampling: SamplingParams) -> Self {
        self.sampling = sampling;
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

    /// Anti-prompts in order of appearance, without duplicates.
    pub fn anti_prompts(&self) -> Vec<String> {
        let mut unique: Vec<String> = Vec::new();
        for anti_prompt in parse_csv(&self.anti_prompt) {
            if !unique.contains(&anti_prompt) {
                unique.push(anti_prompt);
            }
        }
        unique
    }

    pub fn output_filters(&self) -> Vec<String> {
        parse_csv(&self.output_filter)
    }

    pub fn inference_params(&self) -> InferenceParams {
        InferenceParams {
            sampling: self.sampling.clone(),
            anti_prompts: self.anti_prompts(),
            max_tokens: self.max_tokens,
            tokens_keep: self.tokens_keep,
        }
    }
}

/// Split a comma-separated list, trimming entries and dropping empty ones.
pub fn parse_csv(csv: &str) -> Vec<String> {
    csv.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hub_sampling::MirostatMode;

    #[test]
    fn csv_is_trimmed_and_compacted() {
        assert_eq!(parse_csv(" User: , ,Bob:,"), vec!["User:", "Bob:"]);
        assert!(parse_csv("").is_empty());
    }

    #[test]
    fn anti_prompts_are_deduplicated() {
        let config = SessionConfig::new("m").with_anti_prompt("User:, Bot:, User:");
        assert_eq!(config.anti_prompts(), vec!["User:", "Bot:"]);
    }

    #[test]
    fn deserializes_flat_request() {
        let json = r#"{
            "model": "llama",
            "prompt": "Hi",
            "antiPrompt": "User:",
            "outputFilter": "User:, Assistant:",
            "executorType": "Stateless",
            "temperature": 0.5,
            "topK": 10,
            "tailFreeZ": 0.9,
            "mirostat": 2,
            "repeatWindow": -1,
            "maxTokens": 128,
            "tokensKeep": 16
        }"#;
        let config: SessionConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.model, "llama");
        assert_eq!(config.executor_type, ExecutorKind::Stateless);
        assert_eq!(config.sampling.temperature, 0.5);
        assert_eq!(config.sampling.top_k, 10);
        assert_eq!(config.sampling.top_p, 0.95);
        assert_eq!(config.sampling.mirostat, MirostatMode::V2);
        assert_eq!(config.sampling.repeat_window, -1);
        assert_eq!(config.max_tokens, 128);
        assert_eq!(config.tokens_keep, 16);
        assert_eq!(config.output_filters(), vec!["User:", "Assistant:"]);
    }

    #[test]
    fn flat_request_carries_logit_bias() {
        let json = r#"{"model":"m","temperature":0.2,"logitBias":{"10":-5.0,"65":2}}"#;
        let config: SessionConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.sampling.temperature, 0.2);
        assert_eq!(config.sampling.logit_bias.len(), 2);
        assert_eq!(config.sampling.logit_bias.get(&10), Some(&-5.0));
        assert_eq!(config.sampling.logit_bias.get(&65), Some(&2.0));
        assert_eq!(config.inference_params().sampling.logit_bias.get(&65), Some(&2.0));
    }

    #[test]
    fn minimal_request_uses_defaults() {
        let config: SessionConfig = serde_json::from_str(r#"{"model":"m"}"#).unwrap();
        assert_eq!(config, SessionConfig::new("m"));
        let params = config.inference_params();
        assert_eq!(params.max_tokens, -1);
        assert!(params.anti_prompts.is_empty());
    }
}
