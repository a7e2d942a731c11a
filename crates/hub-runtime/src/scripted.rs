//! A backend that always continues with the same reply.

use std::path::Path;
use std::sync::Arc;

use hub_engine::{HubError, ModelParams, NativeBackend, NativeModel, Result, TokenId};

use crate::context::{BackendStats, LogitSource, ReferenceModel};
use crate::tokenizer;

const SCRIPT_LOGIT: f32 = 10.0;

/// Replays a fixed reply.
///
/// The next token is `reply[k % len]`, where `k` is the length of the
/// longest prefix of the reply that the resident sequence currently ends
/// with. Any input therefore restarts the reply, and each sampled reply
/// token advances it by one, for any greedy or low-temperature sampler.
pub struct ScriptedBackend {
    script: Arc<Script>,
    stats: Arc<BackendStats>,
    fail_after_evals: Option<usize>,
}

struct Script {
    tokens: Vec<TokenId>,
}

impl ScriptedBackend {
    pub fn new(reply: &str) -> Self {
        Self::from_tokens(tokenizer::encode(reply, false))
    }

    /// Reply followed by the end-of-sequence token.
    pub fn with_eos(reply: &str) -> Self {
        let mut tokens = tokenizer::encode(reply, false);
        tokens.push(tokenizer::TOKEN_EOS);
        Self::from_tokens(tokens)
    }

    fn from_tokens(tokens: Vec<TokenId>) -> Self {
        Self {
            script: Arc::new(Script { tokens }),
            stats: Arc::new(BackendStats::default()),
            fail_after_evals: None,
        }
    }

    /// Contexts created after this call fail on evaluation `n + 1`.
    pub fn fail_after_evals(mut self, n: usize) -> Self {
        self.fail_after_evals = Some(n);
        self
    }

    pub fn stats(&self) -> Arc<BackendStats> {
        Arc::clone(&self.stats)
    }
}

impl Script {
    fn progress(&self, resident: &[TokenId]) -> usize {
        (1..=self.tokens.len().min(resident.len()))
            .rev()
            .find(|&k| resident.ends_with(&self.tokens[..k]))
            .unwrap_or(0)
    }
}

impl LogitSource for Script {
    fn logits(&self, resident: &[TokenId], out: &mut [f32]) {
        out.fill(0.0);
        if self.tokens.is_empty() {
            return;
        }
        let next = self.tokens[self.progress(resident) % self.tokens.len()];
        if let Some(slot) = usize::try_from(next).ok().and_then(|i| out.get_mut(i)) {
            *slot = SCRIPT_LOGIT;
        }
    }
}

impl NativeBackend for ScriptedBackend {
    fn load_model(&self, params: &ModelParams) -> Result<Arc<dyn NativeModel>> {
        if let Some(adapter) = &params.lora_adapter {
            if !Path::new(adapter).exists() {
                return Err(HubError::ModelLoad(format!("LoRA adapter {adapter} not found")));
            }
        }
        self.stats.record_load();
        tracing::debug!(model = %params.name, "scripted model loaded");
        Ok(Arc::new(ReferenceModel {
            source: self.script.clone(),
            stats: Arc::clone(&self.stats),
            fail_after_evals: self.fail_after_evals,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(text: &str) -> Vec<TokenId> {
        tokenizer::encode(text, false)
    }

    #[test]
    fn progress_tracks_longest_suffix() {
        let script = Script { tokens: ids("aab") };
        assert_eq!(script.progress(&ids("xx")), 0);
        assert_eq!(script.progress(&ids("xa")), 1);
        assert_eq!(script.progress(&ids("xaa")), 2);
        assert_eq!(script.progress(&ids("xaab")), 3);
    }

    #[test]
    fn logits_point_at_next_reply_token() {
        let script = Script { tokens: ids("Hi") };
        let mut out = vec![0.0; tokenizer::VOCAB_SIZE];
        script.logits(&ids("hello\n"), &mut out);
        assert_eq!(out[tokenizer::byte_token(b'H') as usize], SCRIPT_LOGIT);
        script.logits(&ids("hello\nH"), &mut out);
        assert_eq!(out[tokenizer::byte_token(b'i') as usize], SCRIPT_LOGIT);
        assert_eq!(out[tokenizer::byte_token(b'H') as usize], 0.0);
    }
}
