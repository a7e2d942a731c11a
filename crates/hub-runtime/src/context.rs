//! Shared native context for the reference backends.

use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use hub_engine::{HubError, ModelParams, NativeContext, NativeModel, Result, TokenId};

use crate::tokenizer;

const STATE_MAGIC: u32 = 0x4855_4253;

/// Computes next-token logits from the resident token sequence.
pub(crate) trait LogitSource: Send + Sync {
    fn logits(&self, resident: &[TokenId], out: &mut [f32]);
}

/// Counters shared by a backend and everything it creates.
#[derive(Debug, Default)]
pub struct BackendStats {
    loads: AtomicUsize,
    live_contexts: AtomicUsize,
    eval_calls: AtomicUsize,
}

impl BackendStats {
    /// Models loaded so far.
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Contexts allocated and not yet dropped.
    pub fn live_contexts(&self) -> usize {
        self.live_contexts.load(Ordering::SeqCst)
    }

    /// Native evaluation calls across all contexts.
    pub fn eval_calls(&self) -> usize {
        self.eval_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn record_load(&self) {
        self.loads.fetch_add(1, Ordering::SeqCst);
    }
}

/// Weights of a reference model: a logit source plus backend bookkeeping.
pub(crate) struct ReferenceModel {
    pub(crate) source: Arc<dyn LogitSource>,
    pub(crate) stats: Arc<BackendStats>,
    pub(crate) fail_after_evals: Option<usize>,
}

impl NativeModel for ReferenceModel {
    fn new_context(&self, params: &ModelParams) -> Result<Box<dyn NativeContext>> {
        if params.context_size == 0 {
            return Err(HubError::ModelLoad("context size must be positive".into()));
        }
        self.stats.live_contexts.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ReferenceContext {
            source: Arc::clone(&self.source),
            stats: Arc::clone(&self.stats),
            n_ctx: params.context_size,
            resident: Vec::new(),
            logits: vec![0.0; tokenizer::VOCAB_SIZE],
            evals_left: self.fail_after_evals,
        }))
    }

    fn n_vocab(&self) -> usize {
        tokenizer::VOCAB_SIZE
    }
}

/// A native context holding its resident tokens and last logits.
///
/// The state blob is `magic, n_tokens, tokens.., n_logits, logits..`, all
/// little-endian.
pub(crate) struct ReferenceContext {
    source: Arc<dyn LogitSource>,
    stats: Arc<BackendStats>,
    n_ctx: usize,
    resident: Vec<TokenId>,
    logits: Vec<f32>,
    evals_left: Option<usize>,
}

impl Drop for ReferenceContext {
    fn drop(&mut self) {
        self.stats.live_contexts.fetch_sub(1, Ordering::SeqCst);
    }
}

impl NativeContext for ReferenceContext {
    fn n_ctx(&self) -> usize {
        self.n_ctx
    }

    fn n_vocab(&self) -> usize {
        tokenizer::VOCAB_SIZE
    }

    fn token_bos(&self) -> TokenId {
        tokenizer::TOKEN_BOS
    }

    fn token_eos(&self) -> TokenId {
        tokenizer::TOKEN_EOS
    }

    fn token_nl(&self) -> TokenId {
        tokenizer::token_nl()
    }

    fn tokenize(&self, text: &str, add_bos: bool) -> Result<Vec<TokenId>> {
        Ok(tokenizer::encode(text, add_bos))
    }

    fn token_to_piece(&self, token: TokenId) -> Result<Vec<u8>> {
        Ok(tokenizer::piece(token))
    }

    fn eval(&mut self, tokens: &[TokenId], n_past: usize) -> Result<()> {
        self.stats.eval_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(left) = self.evals_left.as_mut() {
            if *left == 0 {
                return Err(HubError::NativeEval("injected evaluation failure".into()));
            }
            *left -= 1;
        }
        if n_past > self.resident.len() {
            return Err(HubError::NativeEval(format!(
                "n_past {} beyond {} cached tokens",
                n_past,
                self.resident.len()
            )));
        }
        if n_past + tokens.len() > self.n_ctx {
            return Err(HubError::NativeEval(format!(
                "context overflow: {} + {} > {}",
                n_past,
                tokens.len(),
                self.n_ctx
            )));
        }
        if let Some(&bad) = tokens
            .iter()
            .find(|&&t| t < 0 || t as usize >= tokenizer::VOCAB_SIZE)
        {
            return Err(HubError::NativeEval(format!("token {bad} out of vocabulary")));
        }

        self.resident.truncate(n_past);
        self.resident.extend_from_slice(tokens);
        self.source.logits(&self.resident, &mut self.logits);
        Ok(())
    }

    fn logits(&self) -> &[f32] {
        &self.logits
    }

    fn state_size(&self) -> usize {
        4 + 4 + 4 * self.n_ctx + 4 + 4 * tokenizer::VOCAB_SIZE
    }

    fn copy_state(&self, dst: &mut [u8]) -> Result<usize> {
        let mut cursor = Cursor::new(dst);
        cursor.write_u32::<LittleEndian>(STATE_MAGIC)?;
        cursor.write_u32::<LittleEndian>(self.resident.len() as u32)?;
        for &token in &self.resident {
            cursor.write_i32::<LittleEndian>(token)?;
        }
        cursor.write_u32::<LittleEndian>(self.logits.len() as u32)?;
        for &logit in &self.logits {
            cursor.write_f32::<LittleEndian>(logit)?;
        }
        Ok(cursor.position() as usize)
    }

    fn set_state(&mut self, src: &[u8]) -> Result<usize> {
        let malformed = |what: &str| HubError::NativeEval(format!("malformed state blob: {what}"));
        let mut cursor = Cursor::new(src);

        let magic = cursor
            .read_u32::<LittleEndian>()
            .map_err(|_| malformed("missing header"))?;
        if magic != STATE_MAGIC {
            return Err(malformed("bad magic"));
        }

        let n_tokens = cursor
            .read_u32::<LittleEndian>()
            .map_err(|_| malformed("missing token count"))? as usize;
        if n_tokens > self.n_ctx {
            return Err(malformed("more tokens than context size"));
        }
        let mut resident = Vec::with_capacity(n_tokens);
        for _ in 0..n_tokens {
            resident.push(
                cursor
                    .read_i32::<LittleEndian>()
                    .map_err(|_| malformed("truncated tokens"))?,
            );
        }

        let n_logits = cursor
            .read_u32::<LittleEndian>()
            .map_err(|_| malformed("missing logit count"))? as usize;
        if n_logits != tokenizer::VOCAB_SIZE {
            return Err(malformed("vocabulary mismatch"));
        }
        let mut logits = Vec::with_capacity(n_logits);
        for _ in 0..n_logits {
            logits.push(
                cursor
                    .read_f32::<LittleEndian>()
                    .map_err(|_| malformed("truncated logits"))?,
            );
        }

        self.resident = resident;
        self.logits = logits;
        Ok(cursor.position() as usize)
    }
}
