//! # hub-sampling
//!
//! Token selection for llama-hub.
//!
//! Supports:
//! - Logit bias, repetition, frequency and presence penalties
//! - Greedy (argmax)
//! - Top-k, tail-free, typical-p and top-p (nucleus) filtering
//! - Temperature scaling
//! - Mirostat v1 and v2 with caller-owned `mu`
//! - A seeded RNG, so a model seed reproduces its output

mod candidates;
mod params;
mod penalty;

pub use candidates::{Candidates, TokenData};
pub use params::{MirostatMode, SamplingParams};
pub use penalty::apply_penalties;

use hub_engine::{HubError, TokenId};

/// Why a selection step produced no token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingError {
    /// The logit vector was empty or did not match the vocabulary.
    InvalidLogits,
    /// Filtering left nothing to choose from.
    NoValidTokens,
}

impl std::fmt::Display for SamplingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            Self::InvalidLogits => "logit vector does not match the vocabulary",
            Self::NoValidTokens => "no candidate survived filtering",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for SamplingError {}

impl From<SamplingError> for HubError {
    fn from(err: SamplingError) -> Self {
        HubError::Sampling(err.to_string())
    }
}

pub type SamplingResult<T> = std::result::Result<T, SamplingError>;

/// Candidates mirostat v1 inspects when estimating the Zipf exponent.
const MIROSTAT_M: usize = 100;

/// xorshift64 generator seeded through one splitmix64 round, so nearby
/// model seeds still start far apart.
#[derive(Debug, Clone)]
pub struct SeededRng {
    state: u64,
}

impl SeededRng {
    pub fn new(seed: u64) -> Self {
        let mut z = seed.wrapping_add(0x9E37_79B9_7F4A_7C15);
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^= z >> 31;
        // xorshift is stuck at zero.
        Self { state: z.max(1) }
    }

    /// Uniform value in `[0, 1)` built from the top 24 bits.
    pub fn next_f32(&mut self) -> f32 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        (x >> 40) as f32 * (1.0 / 16_777_216.0)
    }
}

/// Selects the next token from a penalized candidate set.
///
/// The only state a sampler carries is its RNG; the mirostat `mu` belongs to
/// the caller so it can live alongside the rest of the executor state.
#[derive(Debug, Clone)]
pub struct Sampler {
    rng: SeededRng,
}

impl Sampler {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: SeededRng::new(seed),
        }
    }

    /// Run the selection stage of the pipeline.
    ///
    /// `mu` is read and updated by the mirostat strategies; a NaN `mu` is
    /// initialized to `2 * tau` first.
    pub fn sample(
        &mut self,
        candidates: &mut Candidates,
        params: &SamplingParams,
        mu: &mut f32,
    ) -> SamplingResult<TokenId> {
        if candidates.is_empty() {
            return Err(SamplingError::InvalidLogits);
        }

        if params.temperature <= 0.0 {
            return candidates.argmax().ok_or(SamplingError::NoValidTokens);
        }

        match params.mirostat {
            MirostatMode::V1 => {
                init_mu(mu, params.mirostat_tau);
                candidates.temperature(params.temperature);
                self.mirostat_v1(candidates, params.mirostat_tau, params.mirostat_eta, mu)
            }
            MirostatMode::V2 => {
                init_mu(mu, params.mirostat_tau);
                candidates.temperature(params.temperature);
                self.mirostat_v2(candidates, params.mirostat_tau, params.mirostat_eta, mu)
            }
            MirostatMode::Disabled => {
                candidates.top_k(params.top_k, 1);
                candidates.tail_free(params.tail_free_z, 1);
                candidates.typical(params.typical_p, 1);
                candidates.top_p(params.top_p, 1);
                candidates.temperature(params.temperature);
                self.sample_token(candidates)
            }
        }
    }

    /// Draw a token from the softmax distribution of `candidates`.
    pub fn sample_token(&mut self, candidates: &mut Candidates) -> SamplingResult<TokenId> {
        candidates.softmax();
        let total: f32 = candidates.as_slice().iter().map(|t| t.p).sum();
        let r = self.rng.next_f32() * total;

        let mut cumsum = 0.0;
        for token in candidates.as_slice() {
            cumsum += token.p;
            if r < cumsum {
                return Ok(token.id);
            }
        }

        // Rounding left `r` past the end.
        candidates
            .as_slice()
            .iter()
            .rev()
            .find(|t| t.p > 0.0)
            .map(|t| t.id)
            .ok_or(SamplingError::NoValidTokens)
    }

    fn mirostat_v1(
        &mut self,
        candidates: &mut Candidates,
        tau: f32,
        eta: f32,
        mu: &mut f32,
    ) -> SamplingResult<TokenId> {
        let n = candidates.len() as f32;
        candidates.softmax();

        // Estimate the Zipf exponent from the head of the distribution.
        let data = candidates.as_slice();
        let mut sum_ti_bi = 0.0f32;
        let mut sum_ti_sq = 0.0f32;
        for i in 0..(MIROSTAT_M - 1).min(data.len().saturating_sub(1)) {
            if data[i + 1].p <= 0.0 {
                break;
            }
            let t_i = ((i + 2) as f32 / (i + 1) as f32).ln();
            let b_i = (data[i].p / data[i + 1].p).ln();
            sum_ti_bi += t_i * b_i;
            sum_ti_sq += t_i * t_i;
        }

        if sum_ti_sq > 0.0 {
            let s_hat = sum_ti_bi / sum_ti_sq;
            let epsilon_hat = s_hat - 1.0;
            let k = ((epsilon_hat * 2f32.powf(*mu)) / (1.0 - n.powf(-epsilon_hat)))
                .powf(1.0 / s_hat);
            let k = if k.is_finite() {
                k.clamp(1.0, i32::MAX as f32) as i32
            } else {
                candidates.len() as i32
            };
            candidates.top_k(k, 1);
        }

        let id = self.sample_token(candidates)?;
        update_mu(candidates, id, tau, eta, mu);
        Ok(id)
    }

    fn mirostat_v2(
        &mut self,
        candidates: &mut Candidates,
        tau: f32,
        eta: f32,
        mu: &mut f32,
    ) -> SamplingResult<TokenId> {
        candidates.softmax();

        // Drop every token more surprising than mu, keeping at least one.
        let keep = candidates
            .as_slice()
            .iter()
            .position(|t| -t.p.log2() > *mu)
            .unwrap_or(candidates.len())
            .max(1);
        candidates.top_k(keep as i32, 1);

        let id = self.sample_token(candidates)?;
        update_mu(candidates, id, tau, eta, mu);
        Ok(id)
    }
}

fn init_mu(mu: &mut f32, tau: f32) {
    if mu.is_nan() {
        *mu = 2.0 * tau;
    }
}

fn update_mu(candidates: &Candidates, id: TokenId, tau: f32, eta: f32, mu: &mut f32) {
    if let Some(token) = candidates.get(id) {
        let observed_surprise = -token.p.log2();
        *mu -= eta * (observed_surprise - tau);
    }
}
