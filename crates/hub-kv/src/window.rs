//! The context window: one session's native context plus its token bookkeeping.

use std::path::{Path, PathBuf};

use hub_engine::{HubError, NativeContext, Result, TokenId};

use crate::{LastNTokens, Utf8Decoder};

/// Captured window state: the native blob plus the bookkeeping needed to
/// resume exactly where the snapshot was taken.
#[derive(Debug, Clone)]
pub struct WindowSnapshot {
    state: Vec<u8>,
    past: usize,
    resident: Vec<TokenId>,
    embed_inputs: Vec<TokenId>,
    consumed: usize,
    last_n: LastNTokens,
}

impl WindowSnapshot {
    pub fn state_len(&self) -> usize {
        self.state.len()
    }

    pub fn past(&self) -> usize {
        self.past
    }

    pub fn resident(&self) -> &[TokenId] {
        &self.resident
    }
}

/// A bounded token history backed by a native evaluation context.
///
/// # Invariants
/// - `past <= n_ctx`
/// - `past <= resident.len()`; `resident[..past]` are the tokens the next
///   evaluation builds on, `resident[past..]` are still-valid cache entries
///   that prefix reuse may pick up again
/// - `consumed <= embed_inputs.len()`
pub struct ContextWindow {
    id: String,
    native: Option<Box<dyn NativeContext>>,
    n_ctx: usize,
    n_batch: usize,
    past: usize,
    resident: Vec<TokenId>,
    embed_inputs: Vec<TokenId>,
    consumed: usize,
    last_n: LastNTokens,
    decoder: Utf8Decoder,
    poisoned: bool,
    submitted: usize,
    evictions: usize,
}

impl std::fmt::Debug for ContextWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextWindow")
            .field("id", &self.id)
            .field("n_ctx", &self.n_ctx)
            .field("past", &self.past)
            .field("consumed", &self.consumed)
            .field("pending_inputs", &(self.embed_inputs.len() - self.consumed))
            .field("released", &self.native.is_none())
            .finish()
    }
}

impl ContextWindow {
    /// Wrap a freshly allocated native context.
    pub fn new(id: impl Into<String>, native: Box<dyn NativeContext>, n_batch: usize) -> Self {
        let n_ctx = native.n_ctx();
        Self {
            id: id.into(),
            native: Some(native),
            n_ctx,
            n_batch: n_batch.max(1),
            past: 0,
            resident: Vec::new(),
            embed_inputs: Vec::new(),
            consumed: 0,
            last_n: LastNTokens::new(n_ctx),
            decoder: Utf8Decoder::new(),
            poisoned: false,
            submitted: 0,
            evictions: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn n_ctx(&self) -> usize {
        self.n_ctx
    }

    pub fn n_batch(&self) -> usize {
        self.n_batch
    }

    /// Tokens the next evaluation builds on.
    pub fn past(&self) -> usize {
        self.past
    }

    pub fn resident(&self) -> &[TokenId] {
        &self.resident
    }

    pub fn embed_inputs(&self) -> &[TokenId] {
        &self.embed_inputs
    }

    pub fn consumed(&self) -> usize {
        self.consumed
    }

    pub fn last_n(&self) -> &LastNTokens {
        &self.last_n
    }

    /// Total tokens handed to the native engine so far.
    pub fn submitted(&self) -> usize {
        self.submitted
    }

    /// Number of overflow eviction cycles so far.
    pub fn evictions(&self) -> usize {
        self.evictions
    }

    pub fn is_released(&self) -> bool {
        self.native.is_none()
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    fn native(&self) -> Result<&dyn NativeContext> {
        self.native
            .as_deref()
            .ok_or_else(|| HubError::ContextReleased(self.id.clone()))
    }

    fn native_mut(&mut self) -> Result<&mut (dyn NativeContext + 'static)> {
        match self.native.as_deref_mut() {
            Some(native) => Ok(native),
            None => Err(HubError::ContextReleased(self.id.clone())),
        }
    }

    /// Drop the native handle. Later operations fail with `ContextReleased`.
    pub fn release(&mut self) {
        if self.native.take().is_some() {
            tracing::debug!(context = %self.id, "native context released");
        }
    }

    // -- Tokens ---------------------------------------------------------------

    pub fn tokenize(&self, text: &str, add_bos: bool) -> Result<Vec<TokenId>> {
        self.native()?.tokenize(text, add_bos)
    }

    /// Concatenate the pieces of `tokens` into text (lossy on invalid UTF-8).
    pub fn detokenize(&self, tokens: &[TokenId]) -> Result<String> {
        let native = self.native()?;
        let mut bytes = Vec::new();
        for &token in tokens {
            bytes.extend(native.token_to_piece(token)?);
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Decode one generated token in streaming fashion.
    pub fn decode_token(&mut self, token: TokenId) -> Result<String> {
        let piece = self.native()?.token_to_piece(token)?;
        Ok(self.decoder.push(&piece))
    }

    /// Text of the newest `n` tokens in the last-N window.
    pub fn tail_text(&self, n: usize) -> Result<String> {
        self.detokenize(&self.last_n.tail(n))
    }

    pub fn token_bos(&self) -> Result<TokenId> {
        Ok(self.native()?.token_bos())
    }

    pub fn token_eos(&self) -> Result<TokenId> {
        Ok(self.native()?.token_eos())
    }

    pub fn token_nl(&self) -> Result<TokenId> {
        Ok(self.native()?.token_nl())
    }

    pub fn logits(&self) -> Result<&[f32]> {
        Ok(self.native()?.logits())
    }

    // -- Input queue ----------------------------------------------------------

    /// Queue tokens for evaluation.
    pub fn push_inputs(&mut self, tokens: &[TokenId]) {
        self.embed_inputs.extend_from_slice(tokens);
    }

    /// Whether every queued input has been moved into a batch.
    pub fn inputs_drained(&self) -> bool {
        self.consumed >= self.embed_inputs.len()
    }

    /// Treat everything queued so far as consumed.
    pub fn skip_queued_inputs(&mut self) {
        self.consumed = self.embed_inputs.len();
    }

    /// Largest batch that a single overflow cycle can always make room for.
    pub fn batch_limit(&self, tokens_keep: usize) -> usize {
        let keep = tokens_keep.min(self.n_ctx.saturating_sub(1)).max(1);
        self.n_batch.min(self.n_ctx.saturating_sub(keep)).max(1)
    }

    /// Move queued inputs into `pending` until it holds `limit` tokens.
    /// Consumed inputs also enter the last-N window.
    pub fn consume_inputs(&mut self, pending: &mut Vec<TokenId>, limit: usize) {
        while self.consumed < self.embed_inputs.len() && pending.len() < limit {
            let token = self.embed_inputs[self.consumed];
            pending.push(token);
            self.last_n.push(token);
            self.consumed += 1;
        }
    }

    /// Record a sampled token in the last-N window.
    pub fn record_sampled(&mut self, token: TokenId) {
        self.last_n.push(token);
    }

    // -- Evaluation -----------------------------------------------------------

    /// Evaluate `tokens` starting at `n_past`, in batches of at most
    /// `n_batch`, returning the new past count.
    ///
    /// # Errors
    /// - `NativeEval`: a batch failed, `n_past` skips unevaluated positions,
    ///   or the tokens would not fit in the context. A native failure also
    ///   poisons the window; every later evaluation fails.
    pub fn evaluate(&mut self, tokens: &[TokenId], n_past: usize) -> Result<usize> {
        if self.poisoned {
            return Err(HubError::NativeEval(format!(
                "context {} is unusable after an earlier evaluation failure",
                self.id
            )));
        }
        if n_past > self.resident.len() {
            return Err(HubError::NativeEval(format!(
                "n_past {} is beyond the {} resident tokens",
                n_past,
                self.resident.len()
            )));
        }
        if tokens.is_empty() {
            self.past = n_past;
            return Ok(n_past);
        }
        if n_past + tokens.len() > self.n_ctx {
            return Err(HubError::NativeEval(format!(
                "{} tokens at n_past {} exceed context size {}",
                tokens.len(),
                n_past,
                self.n_ctx
            )));
        }

        self.resident.truncate(n_past);
        let mut past = n_past;
        let n_batch = self.n_batch;
        for batch in tokens.chunks(n_batch) {
            let result = self.native_mut()?.eval(batch, past);
            if let Err(err) = result {
                self.poisoned = true;
                self.past = past;
                tracing::warn!(context = %self.id, past, error = %err, "native evaluation failed");
                return Err(match err {
                    HubError::NativeEval(msg) => HubError::NativeEval(msg),
                    other => HubError::NativeEval(other.to_string()),
                });
            }
            self.resident.extend_from_slice(batch);
            self.submitted += batch.len();
            past += batch.len();
        }
        self.past = past;
        Ok(past)
    }

    /// Make room for `pending` when it does not fit after `past`.
    ///
    /// Keeps the first `tokens_keep` tokens (at least one, and never so many
    /// that `pending` no longer fits beside them), drops the rest of
    /// the resident window and re-queues the second half of what was dropped,
    /// taken from the last-N window, in front of `pending`. The re-queued run
    /// is clamped so that `past + pending.len() <= n_ctx` afterwards whenever
    /// `pending` itself fits beside the kept prefix.
    ///
    /// Returns whether an eviction happened.
    pub fn handle_overflow(&mut self, pending: &mut Vec<TokenId>, tokens_keep: usize) -> bool {
        if self.past + pending.len() <= self.n_ctx {
            return false;
        }

        let old_past = self.past;
        let keep = tokens_keep
            .min(self.n_ctx.saturating_sub(pending.len().max(1)))
            .min(self.past);
        let n_left = self.past - keep;
        self.past = keep.max(1).min(self.past);

        // Slice [n_ctx - n_left/2 - pending, len - pending) of last-N,
        // clamped into range and trimmed to the space actually free.
        let end = self.last_n.len().saturating_sub(pending.len());
        let start = self
            .n_ctx
            .saturating_sub(n_left / 2)
            .saturating_sub(pending.len())
            .min(end);
        let free = self.n_ctx.saturating_sub(self.past + pending.len());
        let start = start.max(end.saturating_sub(free));
        let reinserted = self.last_n.range(start, end);

        tracing::debug!(
            context = %self.id,
            old_past,
            new_past = self.past,
            reinserted = reinserted.len(),
            pending = pending.len(),
            "context overflow, evicting"
        );

        pending.splice(0..0, reinserted);
        self.evictions += 1;
        true
    }

    /// Skip the leading run of `pending` that is already resident at
    /// `past`, advancing `past` over it. At least one token is always left
    /// so the logits reflect the end of the sequence.
    ///
    /// Returns the number of reused tokens.
    pub fn reuse_prefix(&mut self, pending: &mut Vec<TokenId>) -> usize {
        let mut matched = 0;
        while matched + 1 < pending.len()
            && self.past + matched < self.resident.len()
            && self.resident[self.past + matched] == pending[matched]
        {
            matched += 1;
        }
        if matched > 0 {
            self.past += matched;
            pending.drain(..matched);
            tracing::debug!(context = %self.id, matched, past = self.past, "reused resident prefix");
        }
        matched
    }

    /// Evaluate one batch of pending tokens: evict if it does not fit,
    /// optionally reuse a resident prefix, then evaluate and clear `pending`.
    pub fn eval_pending(
        &mut self,
        pending: &mut Vec<TokenId>,
        tokens_keep: usize,
        reuse: bool,
    ) -> Result<usize> {
        self.handle_overflow(pending, tokens_keep);
        if reuse {
            self.reuse_prefix(pending);
        }
        if !pending.is_empty() {
            let past = self.past;
            self.evaluate(pending, past)?;
        }
        pending.clear();
        Ok(self.past)
    }

    /// Evaluate a complete token sequence from position zero, reusing the
    /// longest resident prefix. Only the divergent suffix reaches the native
    /// engine.
    ///
    /// Returns the number of tokens submitted.
    pub fn submit_sequence(&mut self, tokens: &[TokenId]) -> Result<usize> {
        self.past = 0;
        let mut pending = tokens.to_vec();
        self.reuse_prefix(&mut pending);
        let submitted = pending.len();
        let past = self.past;
        self.evaluate(&pending, past)?;
        Ok(submitted)
    }

    // -- State ----------------------------------------------------------------

    /// Serialize the native state, truncated to the bytes actually written.
    pub fn save_state(&self) -> Result<Vec<u8>> {
        let native = self.native()?;
        let mut buf = vec![0u8; native.state_size()];
        let written = native.copy_state(&mut buf)?;
        buf.truncate(written);
        tracing::debug!(context = %self.id, estimated = native.state_size(), written, "state saved");
        Ok(buf)
    }

    /// Restore native state from `blob`.
    ///
    /// # Errors
    /// - `StateSizeMismatch`: the blob is larger than the native state size;
    ///   the context is left untouched.
    pub fn load_state(&mut self, blob: &[u8]) -> Result<()> {
        let capacity = self.native()?.state_size();
        if blob.len() > capacity {
            tracing::warn!(context = %self.id, blob = blob.len(), capacity, "rejected state blob");
            return Err(HubError::StateSizeMismatch {
                blob: blob.len(),
                capacity,
            });
        }
        self.native_mut()?.set_state(blob)?;
        self.decoder.clear();
        Ok(())
    }

    /// Capture native state and bookkeeping.
    pub fn snapshot(&self) -> Result<WindowSnapshot> {
        Ok(WindowSnapshot {
            state: self.save_state()?,
            past: self.past,
            resident: self.resident.clone(),
            embed_inputs: self.embed_inputs.clone(),
            consumed: self.consumed,
            last_n: self.last_n.clone(),
        })
    }

    /// Return to a snapshot taken from this window. A poisoned window
    /// stays poisoned.
    pub fn restore(&mut self, snapshot: &WindowSnapshot) -> Result<()> {
        self.load_state(&snapshot.state)?;
        self.past = snapshot.past;
        self.resident = snapshot.resident.clone();
        self.embed_inputs = snapshot.embed_inputs.clone();
        self.consumed = snapshot.consumed;
        self.last_n = snapshot.last_n.clone();
        Ok(())
    }

    fn tokens_sidecar(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_os_string();
        name.push(".tokens.json");
        PathBuf::from(name)
    }

    /// Persist the native state to `path`; the file length equals the bytes
    /// written by the engine. Resident tokens go to `<path>.tokens.json`.
    pub fn save_state_file(&self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        let blob = self.save_state()?;
        std::fs::write(path, &blob)?;
        let tokens = serde_json::to_vec(&self.resident[..self.past])?;
        std::fs::write(Self::tokens_sidecar(path), tokens)?;
        Ok(blob.len())
    }

    /// Load state written by [`save_state_file`](Self::save_state_file).
    ///
    /// With a token sidecar present the window continues after the saved
    /// tokens; without one, only the native state is restored. A loaded
    /// file replaces the whole native state, so it also clears the poison
    /// left by an earlier evaluation failure.
    pub fn load_state_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let blob = std::fs::read(path)?;
        let sidecar = Self::tokens_sidecar(path);
        let tokens: Option<Vec<TokenId>> = if sidecar.exists() {
            Some(serde_json::from_slice(&std::fs::read(sidecar)?)?)
        } else {
            None
        };
        self.load_state(&blob)?;
        self.poisoned = false;

        if let Some(tokens) = tokens {
            let tokens: Vec<TokenId> = tokens.into_iter().take(self.n_ctx).collect();
            self.past = tokens.len();
            self.last_n = LastNTokens::new(self.n_ctx);
            for &token in &tokens {
                self.last_n.push(token);
            }
            self.embed_inputs = tokens.clone();
            self.consumed = tokens.len();
            self.resident = tokens;
        }
        Ok(())
    }
}
