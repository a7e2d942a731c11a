//! The shared generation loop and its per-mode hooks.

use std::path::Path;
use std::sync::Arc;

use hub_engine::{HubError, Result, TokenId};
use hub_kv::{ContextWindow, WindowSnapshot};
use hub_sampling::{apply_penalties, Sampler};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::generation::{Generation, StopReason};
use crate::params::{ExecutorKind, InferenceParams, INSTRUCTION_PREFIX, RESPONSE_SUFFIX};

/// A context window shared with the model that allocated it.
pub type SharedWindow = Arc<Mutex<ContextWindow>>;

#[derive(Debug)]
enum Mode {
    Interactive,
    Instruct {
        prefix: Vec<TokenId>,
        suffix: Vec<TokenId>,
    },
    Stateless {
        baseline: WindowSnapshot,
    },
}

/// Outcome of one pass through the loop.
pub(crate) enum Step {
    /// Inputs were moved or evaluated; no token yet.
    Idle,
    /// One token was sampled. `stop` ends the turn after this token.
    Token {
        text: String,
        stop: Option<StopReason>,
    },
    Stop(StopReason),
}

/// Drives one context window through prompt processing and token
/// generation.
///
/// Interactive and instruct executors keep their context between calls:
/// each turn continues where the previous one stopped. Turns only append,
/// so the shared prefix with the previous turn is the whole resident
/// history and only the new input reaches the engine. A stateless executor
/// returns to its primed baseline after every call.
///
/// A native evaluation failure leaves the executor unusable: every later
/// call fails with `NativeEval`, in every mode.
///
/// The window is locked for one loop pass at a time, so releasing the
/// context from another thread makes the next pass fail with
/// `ContextReleased` instead of blocking.
#[derive(Debug)]
pub struct Executor {
    kind: ExecutorKind,
    mode: Mode,
    window: SharedWindow,
    params: InferenceParams,
    anti_prompts: Vec<String>,
    sampler: Sampler,
    mu: f32,
    embeds: Vec<TokenId>,
    is_prompt_run: bool,
    wait_for_input: bool,
    remaining: i64,
    call_tokens: usize,
}

impl Executor {
    /// Build an executor over `window`.
    ///
    /// A stateless executor evaluates a single leading space (with the
    /// beginning-of-sequence marker) and snapshots it as its baseline.
    pub fn new(
        kind: ExecutorKind,
        window: SharedWindow,
        params: InferenceParams,
        seed: u64,
    ) -> Result<Self> {
        let mut anti_prompts: Vec<String> = Vec::new();
        for anti_prompt in &params.anti_prompts {
            if !anti_prompt.is_empty() && !anti_prompts.contains(anti_prompt) {
                anti_prompts.push(anti_prompt.clone());
            }
        }

        let mode = {
            let mut guard = window.lock();
            match kind {
                ExecutorKind::Interactive => Mode::Interactive,
                ExecutorKind::Instruct => {
                    if !anti_prompts.iter().any(|a| a == INSTRUCTION_PREFIX) {
                        anti_prompts.push(INSTRUCTION_PREFIX.to_string());
                    }
                    Mode::Instruct {
                        prefix: guard.tokenize(INSTRUCTION_PREFIX, true)?,
                        suffix: guard.tokenize(RESPONSE_SUFFIX, false)?,
                    }
                }
                ExecutorKind::Stateless => {
                    let tokens = guard.tokenize(" ", true)?;
                    guard.submit_sequence(&tokens)?;
                    Mode::Stateless {
                        baseline: guard.snapshot()?,
                    }
                }
            }
        };

        Ok(Self {
            kind,
            mode,
            window,
            remaining: i64::from(params.max_tokens),
            params,
            anti_prompts,
            sampler: Sampler::new(seed),
            mu: f32::NAN,
            embeds: Vec::new(),
            is_prompt_run: true,
            wait_for_input: false,
            call_tokens: 0,
        })
    }

    pub fn kind(&self) -> ExecutorKind {
        self.kind
    }

    pub fn window(&self) -> &SharedWindow {
        &self.window
    }

    pub fn params(&self) -> &InferenceParams {
        &self.params
    }

    /// Effective anti-prompts: the configured ones plus mode markers.
    pub fn anti_prompts(&self) -> &[String] {
        &self.anti_prompts
    }

    pub fn is_prompt_run(&self) -> bool {
        self.is_prompt_run
    }

    pub fn is_waiting_for_input(&self) -> bool {
        self.wait_for_input
    }

    pub fn remaining_tokens(&self) -> i64 {
        self.remaining
    }

    pub fn mirostat_mu(&self) -> f32 {
        self.mu
    }

    /// Evaluate `prompt` without sampling anything.
    ///
    /// Stateful executors treat it as the prompt run. A stateless executor
    /// appends it to its baseline and snapshots the result, so every later
    /// call starts right after the prompt.
    pub fn prime(&mut self, prompt: &str) -> Result<()> {
        let shared = Arc::clone(&self.window);
        let mut window = shared.lock();

        if matches!(self.mode, Mode::Stateless { .. }) {
            if !prompt.is_empty() {
                let tokens = window.tokenize(prompt, false)?;
                window.push_inputs(&tokens);
                self.drain_inputs(&mut window)?;
            }
            self.mode = Mode::Stateless {
                baseline: window.snapshot()?,
            };
        } else {
            if prompt.is_empty() {
                return Ok(());
            }
            self.preprocess(&mut window, prompt)?;
            self.drain_inputs(&mut window)?;
        }

        tracing::debug!(
            context = %window.id(),
            kind = %self.kind,
            past = window.past(),
            "executor primed"
        );
        Ok(())
    }

    /// Start a call on `text`. The returned iterator yields decoded text
    /// as it is generated.
    pub fn infer(
        &mut self,
        text: &str,
        cancel: CancellationToken,
    ) -> Result<Generation<&mut Executor>> {
        Generation::start(self, text, cancel)
    }

    pub fn save_state_file(&self, path: impl AsRef<Path>) -> Result<usize> {
        self.window.lock().save_state_file(path)
    }

    /// Load a saved window. A stateless executor adopts it as its baseline.
    pub fn load_state_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let shared = Arc::clone(&self.window);
        let mut window = shared.lock();
        window.load_state_file(path)?;
        self.embeds.clear();
        self.is_prompt_run = false;
        self.wait_for_input = false;
        if let Mode::Stateless { baseline } = &mut self.mode {
            *baseline = window.snapshot()?;
        }
        Ok(())
    }

    // -- Call lifecycle -------------------------------------------------------

    pub(crate) fn begin_call(&mut self, text: &str) -> Result<()> {
        let shared = Arc::clone(&self.window);
        let mut window = shared.lock();
        if window.is_poisoned() {
            return Err(HubError::NativeEval(format!(
                "context {} is unusable after an earlier evaluation failure",
                window.id()
            )));
        }
        self.call_tokens = 0;

        if matches!(self.mode, Mode::Stateless { .. }) {
            self.embeds.clear();
            self.mu = f32::NAN;
            self.wait_for_input = false;
            let tokens = window.tokenize(text, false)?;
            window.push_inputs(&tokens);
            Ok(())
        } else {
            self.preprocess(&mut window, text)
        }
    }

    pub(crate) fn end_call(&mut self) -> Result<()> {
        if let Mode::Stateless { baseline } = &self.mode {
            self.window.lock().restore(baseline)?;
            self.embeds.clear();
            self.wait_for_input = false;
        }
        Ok(())
    }

    /// One pass of the loop: evaluate what is pending, then either move
    /// the next batch of inputs or sample one token.
    pub(crate) fn step(&mut self, cancel: &CancellationToken) -> Result<Step> {
        if !self.should_continue() {
            return Ok(Step::Stop(StopReason::TokenLimit));
        }
        let shared = Arc::clone(&self.window);
        let mut window = shared.lock();
        // Checked under the lock: a remover cancels before releasing.
        if cancel.is_cancelled() {
            tracing::debug!(kind = %self.kind, "generation cancelled");
            return Ok(Step::Stop(StopReason::Cancelled));
        }
        let keep = self.params.tokens_keep;

        if !self.embeds.is_empty() {
            self.is_prompt_run = false;
            window.eval_pending(&mut self.embeds, keep, true)?;
        }

        if !window.inputs_drained() {
            let limit = window.batch_limit(keep);
            window.consume_inputs(&mut self.embeds, limit);
            return Ok(Step::Idle);
        }
        if self.wait_for_input {
            self.is_prompt_run = false;
            return Ok(Step::Idle);
        }

        let sampled = self.sample(&window)?;
        let (token, eos_stop) = self.on_sampled(&mut window, sampled)?;
        window.record_sampled(token);
        self.embeds.push(token);
        self.remaining -= 1;
        self.call_tokens += 1;

        let text = window.decode_token(token)?;
        let stop = self.post_process(&window, eos_stop)?;
        Ok(Step::Token { text, stop })
    }

    fn drain_inputs(&mut self, window: &mut ContextWindow) -> Result<()> {
        let keep = self.params.tokens_keep;
        loop {
            if !self.embeds.is_empty() {
                self.is_prompt_run = false;
                window.eval_pending(&mut self.embeds, keep, true)?;
            }
            if window.inputs_drained() {
                return Ok(());
            }
            let limit = window.batch_limit(keep);
            window.consume_inputs(&mut self.embeds, limit);
        }
    }

    fn sample(&mut self, window: &ContextWindow) -> Result<TokenId> {
        let last_n: Vec<TokenId> = window.last_n().iter().copied().collect();
        let mut candidates = apply_penalties(
            window.logits()?,
            &last_n,
            &self.params.sampling,
            window.n_ctx(),
            window.token_nl()?,
        )?;
        let token = self
            .sampler
            .sample(&mut candidates, &self.params.sampling, &mut self.mu)?;
        Ok(token)
    }

    // -- Per-mode hooks -------------------------------------------------------

    fn preprocess(&mut self, window: &mut ContextWindow, text: &str) -> Result<()> {
        if self.is_prompt_run {
            let tokens = window.tokenize(&format!(" {text}"), true)?;
            window.push_inputs(&tokens);
        } else {
            let mut line = text.to_string();
            if !line.ends_with('\n') {
                line.push('\n');
            }
            let line_tokens = window.tokenize(&line, false)?;
            match &self.mode {
                Mode::Instruct { prefix, suffix } => {
                    window.skip_queued_inputs();
                    window.push_inputs(prefix);
                    window.push_inputs(&line_tokens);
                    window.push_inputs(suffix);
                }
                _ => window.push_inputs(&line_tokens),
            }
            self.remaining -= line_tokens.len() as i64;
        }
        self.wait_for_input = false;
        Ok(())
    }

    fn should_continue(&self) -> bool {
        match self.mode {
            Mode::Stateless { .. } => {
                !self.wait_for_input
                    && (self.params.is_unlimited()
                        || self.call_tokens < self.params.max_tokens as usize)
            }
            _ => (self.remaining != 0 && !self.wait_for_input) || self.is_prompt_run,
        }
    }

    /// End-of-sequence handling. Interactive turns replace the marker with a
    /// newline and queue the first anti-prompt so the next turn reads as a
    /// reply to it.
    fn on_sampled(
        &mut self,
        window: &mut ContextWindow,
        token: TokenId,
    ) -> Result<(TokenId, Option<StopReason>)> {
        if token != window.token_eos()? {
            return Ok((token, None));
        }
        self.wait_for_input = true;
        match self.mode {
            Mode::Interactive => {
                if let Some(first) = self.anti_prompts.first() {
                    let queued = window.tokenize(first, false)?;
                    window.push_inputs(&queued);
                }
                Ok((window.token_nl()?, Some(StopReason::EndOfSequence)))
            }
            _ => Ok((token, Some(StopReason::EndOfSequence))),
        }
    }

    fn post_process(
        &mut self,
        window: &ContextWindow,
        stop: Option<StopReason>,
    ) -> Result<Option<StopReason>> {
        let mut stop = stop;
        if stop.is_none() && self.ends_with_anti_prompt(window)? {
            self.wait_for_input = true;
            stop = Some(StopReason::AntiPrompt);
        }
        if !matches!(self.mode, Mode::Stateless { .. })
            && self.remaining <= 0
            && !self.params.is_unlimited()
        {
            self.remaining = i64::from(self.params.max_tokens);
            self.wait_for_input = true;
            stop = stop.or(Some(StopReason::TokenLimit));
        }
        Ok(stop)
    }

    fn ends_with_anti_prompt(&self, window: &ContextWindow) -> Result<bool> {
        let longest = self.anti_prompts.iter().map(String::len).max().unwrap_or(0);
        if longest == 0 {
            return Ok(false);
        }
        let tail = window.tail_text(longest)?;
        Ok(self
            .anti_prompts
            .iter()
            .any(|anti_prompt| tail.ends_with(anti_prompt.as_str())))
    }
}
