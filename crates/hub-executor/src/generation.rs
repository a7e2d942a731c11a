//! Lazily pulled generation.

use std::iter::FusedIterator;
use std::ops::DerefMut;

use hub_engine::Result;
use tokio_util::sync::CancellationToken;

use crate::executor::{Executor, Step};

/// Why a call stopped producing text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The recent text ended with an anti-prompt.
    AntiPrompt,
    /// The model produced its end-of-sequence token.
    EndOfSequence,
    /// The token budget ran out.
    TokenLimit,
    Cancelled,
    /// Generation failed; the error was the last item yielded.
    Failed,
}

/// One call on an [`Executor`], yielding decoded text per generated token.
///
/// Nothing runs until the iterator is pulled. Dropping it early ends the
/// call; a stateless executor returns to its baseline on every exit path.
///
/// `E` is anything that dereferences to the executor: a plain `&mut
/// Executor`, or a lock guard that keeps other callers out for as long as
/// the generation lives.
pub struct Generation<E: DerefMut<Target = Executor>> {
    executor: E,
    cancel: CancellationToken,
    stop: Option<StopReason>,
    tokens: usize,
    finished: bool,
}

impl<E: DerefMut<Target = Executor>> Generation<E> {
    /// Queue `text` as the next turn.
    pub fn start(executor: E, text: &str, cancel: CancellationToken) -> Result<Self> {
        let mut generation = Self {
            executor,
            cancel,
            stop: None,
            tokens: 0,
            finished: false,
        };
        generation.executor.begin_call(text)?;
        Ok(generation)
    }

    /// Set once the call has ended.
    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop
    }

    pub fn is_cancelled(&self) -> bool {
        self.stop == Some(StopReason::Cancelled)
    }

    /// Tokens sampled so far in this call.
    pub fn tokens_generated(&self) -> usize {
        self.tokens
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    fn finish(&mut self, reason: StopReason) {
        self.stop.get_or_insert(reason);
        if self.finished {
            return;
        }
        self.finished = true;
        if let Err(err) = self.executor.end_call() {
            tracing::warn!(error = %err, "failed to reset executor after call");
        }
        tracing::debug!(
            kind = %self.executor.kind(),
            tokens = self.tokens,
            reason = ?self.stop,
            "generation finished"
        );
    }
}

impl<E: DerefMut<Target = Executor>> Iterator for Generation<E> {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(reason) = self.stop {
            self.finish(reason);
            return None;
        }

        loop {
            match self.executor.step(&self.cancel) {
                Ok(Step::Idle) => continue,
                Ok(Step::Token { text, stop }) => {
                    self.tokens += 1;
                    if stop.is_some() {
                        self.stop = stop;
                    }
                    if !text.is_empty() {
                        return Some(Ok(text));
                    }
                    if let Some(reason) = self.stop {
                        self.finish(reason);
                        return None;
                    }
                }
                Ok(Step::Stop(reason)) => {
                    self.finish(reason);
                    return None;
                }
                Err(err) => {
                    self.finish(StopReason::Failed);
                    return Some(Err(err));
                }
            }
        }
    }
}

impl<E: DerefMut<Target = Executor>> FusedIterator for Generation<E> {}

impl<E: DerefMut<Target = Executor>> Drop for Generation<E> {
    fn drop(&mut self) {
        self.finish(StopReason::Cancelled);
    }
}
