//! A toy language model with deterministic, seeded weights.

use std::path::Path;
use std::sync::Arc;

use hub_engine::{HubError, ModelParams, NativeBackend, NativeModel, Result, TokenId};

use crate::context::{BackendStats, LogitSource, ReferenceModel};
use crate::tokenizer;

const D_MODEL: usize = 16;
/// Resident tokens mixed into the hidden state.
const WINDOW: usize = 8;
const DECAY: f32 = 0.6;
/// Logit penalty for bytes outside printable ASCII.
const UNPRINTABLE_PENALTY: f32 = 8.0;

/// Seeded RNG for weight initialization (xorshift64).
struct WeightRng {
    state: u64,
}

impl WeightRng {
    fn new(seed: u64) -> Self {
        Self {
            state: if seed == 0 { 1 } else { seed },
        }
    }

    fn next_f32(&mut self) -> f32 {
        self.state ^= self.state << 13;
        self.state ^= self.state >> 7;
        self.state ^= self.state << 17;
        ((self.state >> 40) as f32 / (1u64 << 24) as f32 - 0.5) * 2.0
    }

    fn fill(&mut self, n: usize) -> Vec<f32> {
        (0..n).map(|_| self.next_f32()).collect()
    }
}

/// Embedding-only model: the hidden state is a decayed sum of the last few
/// token embeddings, projected back onto the vocabulary.
struct TinyWeights {
    embeddings: Vec<f32>,
    lm_head: Vec<f32>,
    bias: Vec<f32>,
}

impl TinyWeights {
    fn new(seed: u64) -> Self {
        let mut rng = WeightRng::new(seed);
        let bias = (0..tokenizer::VOCAB_SIZE as TokenId)
            .map(|token| match tokenizer::piece(token).as_slice() {
                [b'\n'] => 0.0,
                [byte] if byte.is_ascii_graphic() || *byte == b' ' => 0.0,
                _ => -UNPRINTABLE_PENALTY,
            })
            .collect();
        Self {
            embeddings: rng.fill(tokenizer::VOCAB_SIZE * D_MODEL),
            lm_head: rng.fill(tokenizer::VOCAB_SIZE * D_MODEL),
            bias,
        }
    }
}

impl LogitSource for TinyWeights {
    fn logits(&self, resident: &[TokenId], out: &mut [f32]) {
        let mut hidden = [0.0f32; D_MODEL];
        let mut weight = 1.0;
        for &token in resident.iter().rev().take(WINDOW) {
            let row = (token.max(0) as usize % tokenizer::VOCAB_SIZE) * D_MODEL;
            for (h, e) in hidden.iter_mut().zip(&self.embeddings[row..row + D_MODEL]) {
                *h += weight * e;
            }
            weight *= DECAY;
        }

        for (v, logit) in out.iter_mut().enumerate().take(tokenizer::VOCAB_SIZE) {
            let row = &self.lm_head[v * D_MODEL..(v + 1) * D_MODEL];
            let dot: f32 = row.iter().zip(&hidden).map(|(w, h)| w * h).sum();
            *logit = dot + self.bias[v];
        }
    }
}

/// Backend serving [`TinyWeights`] models seeded from `ModelParams::seed`.
#[derive(Default)]
pub struct TinyBackend {
    stats: Arc<BackendStats>,
    fail_after_evals: Option<usize>,
}

impl TinyBackend {
    pub fn new() -> Self {
        Self::default()
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

impl NativeBackend for TinyBackend {
    fn load_model(&self, params: &ModelParams) -> Result<Arc<dyn NativeModel>> {
        if let Some(adapter) = &params.lora_adapter {
            if !Path::new(adapter).exists() {
                return Err(HubError::ModelLoad(format!("LoRA adapter {adapter} not found")));
            }
        }
        self.stats.record_load();
        tracing::debug!(model = %params.name, seed = params.seed, "tiny model loaded");
        Ok(Arc::new(ReferenceModel {
            source: Arc::new(TinyWeights::new(params.seed)),
            stats: Arc::clone(&self.stats),
            fail_after_evals: self.fail_after_evals,
        }))
    }
}
