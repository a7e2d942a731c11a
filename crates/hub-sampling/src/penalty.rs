//! Logit bias and repetition penalties.

use hub_engine::TokenId;

use crate::{Candidates, SamplingError, SamplingParams, SamplingResult};

/// Build the candidate set for one step: apply logit bias, then the
/// repetition, frequency and presence penalties over the recent window of
/// `last_n`. With `penalize_nl` off, the newline token keeps its biased logit.
pub fn apply_penalties(
    logits: &[f32],
    last_n: &[TokenId],
    params: &SamplingParams,
    n_ctx: usize,
    token_nl: TokenId,
) -> SamplingResult<Candidates> {
    if logits.is_empty() {
        return Err(SamplingError::InvalidLogits);
    }

    let mut biased = logits.to_vec();
    for (&token, &bias) in &params.logit_bias {
        if let Some(logit) = usize::try_from(token).ok().and_then(|i| biased.get_mut(i)) {
            *logit += bias;
        }
    }

    let mut candidates = Candidates::from_logits(&biased);
    let nl_logit = usize::try_from(token_nl)
        .ok()
        .and_then(|i| biased.get(i).copied());

    let window = params.penalty_window(last_n.len(), n_ctx);
    let recent = &last_n[last_n.len() - window..];
    candidates.repetition_penalty(recent, params.repeat_penalty);
    candidates.frequency_and_presence_penalties(
        recent,
        params.frequency_penalty,
        params.presence_penalty,
    );

    if !params.penalize_nl {
        if let (Some(logit), Some(nl)) = (nl_logit, candidates.get_mut(token_nl)) {
            nl.logit = logit;
        }
    }

    Ok(candidates)
}
