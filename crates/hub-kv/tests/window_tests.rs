//! Integration tests for hub-kv.
//!
//! Validates:
//! - Batched evaluation and failure poisoning
//! - Overflow eviction bounds (keep prefix, capacity) across sizes
//! - Prefix reuse on resubmitted sequences
//! - State snapshots, state files and size checks
//! - Release semantics and streaming decode

use hub_engine::{HubError, ModelParams, NativeBackend, TokenId};
use hub_kv::ContextWindow;
use hub_runtime::{tokenizer, ScriptedBackend, TinyBackend};

fn window_from(backend: &dyn NativeBackend, n_ctx: usize, n_batch: usize) -> ContextWindow {
    let params = ModelParams::new("m", "/dev/null")
        .with_context_size(n_ctx)
        .with_batch_size(n_batch);
    let model = backend.load_model(&params).unwrap();
    ContextWindow::new("ctx", model.new_context(&params).unwrap(), n_batch)
}

fn tiny_window(n_ctx: usize, n_batch: usize) -> ContextWindow {
    window_from(&TinyBackend::new(), n_ctx, n_batch)
}

fn argmax(logits: &[f32]) -> TokenId {
    logits
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
        .map(|(i, _)| i as TokenId)
        .unwrap()
}

fn greedy_continue(window: &mut ContextWindow, steps: usize) -> Vec<TokenId> {
    let mut out = Vec::new();
    for _ in 0..steps {
        let token = argmax(window.logits().unwrap());
        let past = window.past();
        window.evaluate(&[token], past).unwrap();
        out.push(token);
    }
    out
}

/// Queue `n` distinct tokens and evaluate them in batch-limited chunks.
fn fill(window: &mut ContextWindow, n: usize, keep: usize) {
    let tokens: Vec<TokenId> = (0..n).map(|i| tokenizer::byte_token(b'a' + (i % 26) as u8)).collect();
    window.push_inputs(&tokens);
    let mut pending = Vec::new();
    while !window.inputs_drained() {
        window.consume_inputs(&mut pending, window.batch_limit(keep));
        window.eval_pending(&mut pending, keep, false).unwrap();
    }
}

// ===========================================================================
// Evaluation
// ===========================================================================

#[test]
fn evaluate_splits_into_batches() {
    let backend = TinyBackend::new();
    let stats = backend.stats();
    let mut window = window_from(&backend, 64, 4);

    let tokens = tokenizer::encode("abcdefghij", false);
    assert_eq!(window.evaluate(&tokens, 0).unwrap(), 10);
    assert_eq!(stats.eval_calls(), 3);
    assert_eq!(window.past(), 10);
    assert_eq!(window.resident(), tokens.as_slice());
}

#[test]
fn evaluation_failure_poisons_window() {
    let backend = ScriptedBackend::new("x").fail_after_evals(1);
    let mut window = window_from(&backend, 64, 4);

    let err = window
        .evaluate(&tokenizer::encode("abcdefgh", false), 0)
        .unwrap_err();
    assert!(matches!(err, HubError::NativeEval(_)));
    assert!(window.is_poisoned());
    assert_eq!(window.past(), 4);

    let err = window.evaluate(&tokenizer::encode("z", false), 4).unwrap_err();
    assert!(matches!(err, HubError::NativeEval(_)));
}

#[test]
fn restoring_a_snapshot_keeps_the_window_poisoned() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ctx.bin");
    let backend = ScriptedBackend::new("x").fail_after_evals(1);
    let mut window = window_from(&backend, 64, 4);
    let baseline = window.snapshot().unwrap();

    window
        .evaluate(&tokenizer::encode("abcdefgh", false), 0)
        .unwrap_err();
    window.restore(&baseline).unwrap();
    assert!(window.is_poisoned());
    assert_eq!(window.past(), 0);
    let err = window.evaluate(&tokenizer::encode("z", false), 0).unwrap_err();
    assert!(matches!(err, HubError::NativeEval(_)));

    // Loading a persisted state replaces everything, poison included.
    window.save_state_file(&path).unwrap();
    window.load_state_file(&path).unwrap();
    assert!(!window.is_poisoned());
}

#[test]
fn evaluate_rejects_oversized_input() {
    let mut window = tiny_window(8, 8);
    let err = window
        .evaluate(&tokenizer::encode("way too long", false), 0)
        .unwrap_err();
    assert!(matches!(err, HubError::NativeEval(_)));
    assert!(!window.is_poisoned());
}

#[test]
fn consume_inputs_respects_limit() {
    let mut window = tiny_window(32, 32);
    window.push_inputs(&tokenizer::encode("abcdef", false));
    let mut pending = Vec::new();
    window.consume_inputs(&mut pending, 4);
    assert_eq!(pending.len(), 4);
    assert_eq!(window.consumed(), 4);
    assert!(!window.inputs_drained());
    assert_eq!(window.last_n().last(), Some(tokenizer::byte_token(b'd')));
}

// ===========================================================================
// Overflow
// ===========================================================================

#[test]
fn overflow_keeps_prefix_and_fits_capacity() {
    let n_ctx = 32;
    for keep in [0usize, 1, 4, 8, 16] {
        for extra in 1..=n_ctx {
            let mut window = tiny_window(n_ctx, n_ctx);
            fill(&mut window, 30, keep);
            let prefix: Vec<TokenId> = window.resident()[..keep.max(1).min(30)].to_vec();

            let limit = window.batch_limit(keep);
            let mut pending: Vec<TokenId> = (0..extra.min(limit))
                .map(|_| tokenizer::byte_token(b'!'))
                .collect();
            let p = pending.len();
            let evicted = window.handle_overflow(&mut pending, keep);

            assert_eq!(evicted, 30 + p > n_ctx, "keep={keep} extra={extra}");
            assert!(window.past() + pending.len() <= n_ctx, "keep={keep} extra={extra}");
            assert!(pending.ends_with(&vec![tokenizer::byte_token(b'!'); p]));

            let past = window.past();
            window.evaluate(&pending, past).unwrap();
            assert_eq!(&window.resident()[..prefix.len()], prefix.as_slice());
        }
    }
}

#[test]
fn overflow_reinserts_second_half_of_evicted_window() {
    let mut window = tiny_window(32, 32);
    fill(&mut window, 30, 4);
    let last_n: Vec<TokenId> = window.last_n().iter().copied().collect();

    let mut pending = vec![tokenizer::byte_token(b'!'); 4];
    assert!(window.handle_overflow(&mut pending, 4));
    assert_eq!(window.past(), 4);

    // n_left = 26, so 13 tokens come back from last-N ending before the pending run
    let reinserted = &pending[..pending.len() - 4];
    assert_eq!(reinserted.len(), 13);
    assert_eq!(reinserted, &last_n[32 - 13 - 4..32 - 4]);
}

#[test]
fn single_eviction_for_long_input() {
    // 600 tokens into a 512 context with 8 kept tokens
    let mut window = tiny_window(512, 512);
    window.push_inputs(&tokenizer::encode(" Hello", true));
    let mut pending = Vec::new();
    window.consume_inputs(&mut pending, window.batch_limit(8));
    window.eval_pending(&mut pending, 8, true).unwrap();

    let input: Vec<TokenId> = (0..600).map(|i| tokenizer::byte_token(b'a' + (i % 26) as u8)).collect();
    window.push_inputs(&input);
    while !window.inputs_drained() {
        window.consume_inputs(&mut pending, window.batch_limit(8));
        window.eval_pending(&mut pending, 8, true).unwrap();
        assert!(window.past() <= 512);
    }
    assert_eq!(window.evictions(), 1);
    assert_eq!(&window.resident()[..7], tokenizer::encode(" Hello", true).as_slice());
}

#[test]
fn keep_at_or_above_capacity_still_makes_room() {
    let n_ctx = 32;
    for keep in [n_ctx, n_ctx + 8] {
        let mut window = tiny_window(n_ctx, n_ctx);
        fill(&mut window, n_ctx, keep);
        assert_eq!(window.past(), n_ctx);
        let prefix: Vec<TokenId> = window.resident()[..n_ctx - 1].to_vec();

        let mut pending = vec![tokenizer::byte_token(b'!')];
        assert!(window.handle_overflow(&mut pending, keep), "keep={keep}");
        assert!(window.past() + pending.len() <= n_ctx, "keep={keep}");

        let past = window.past();
        window.evaluate(&pending, past).unwrap();
        assert!(!window.is_poisoned());
        assert_eq!(&window.resident()[..n_ctx - 1], prefix.as_slice());
    }
}

#[test]
fn no_eviction_when_it_fits() {
    let mut window = tiny_window(32, 32);
    fill(&mut window, 10, 4);
    let mut pending = vec![tokenizer::byte_token(b'x'); 5];
    assert!(!window.handle_overflow(&mut pending, 4));
    assert_eq!(pending.len(), 5);
    assert_eq!(window.evictions(), 0);
}

// ===========================================================================
// Prefix reuse
// ===========================================================================

#[test]
fn resubmitted_prefix_is_not_reevaluated() {
    let mut window = tiny_window(64, 64);
    let abc = tokenizer::encode("abc", false);
    window.evaluate(&abc, 0).unwrap();
    let before = window.submitted();

    let abcde = tokenizer::encode("abcde", false);
    assert_eq!(window.submit_sequence(&abcde).unwrap(), 2);
    assert_eq!(window.submitted() - before, 2);
    assert_eq!(window.resident(), abcde.as_slice());
    assert_eq!(window.past(), 5);
}

#[test]
fn identical_sequence_reevaluates_last_token_only() {
    let mut window = tiny_window(64, 64);
    let abc = tokenizer::encode("abc", false);
    window.evaluate(&abc, 0).unwrap();
    assert_eq!(window.submit_sequence(&abc).unwrap(), 1);
    assert_eq!(window.past(), 3);
}

#[test]
fn divergent_suffix_replaces_resident_tail() {
    let mut window = tiny_window(64, 64);
    window.evaluate(&tokenizer::encode("abcd", false), 0).unwrap();
    let abxy = tokenizer::encode("abxy", false);
    assert_eq!(window.submit_sequence(&abxy).unwrap(), 2);
    assert_eq!(window.resident(), abxy.as_slice());
}

#[test]
fn reused_prefix_gives_same_logits_as_full_evaluation() {
    let mut reused = tiny_window(64, 64);
    reused.evaluate(&tokenizer::encode("abc", false), 0).unwrap();
    reused.submit_sequence(&tokenizer::encode("abcde", false)).unwrap();

    let mut full = tiny_window(64, 64);
    full.evaluate(&tokenizer::encode("abcde", false), 0).unwrap();

    assert_eq!(reused.logits().unwrap(), full.logits().unwrap());
}

// ===========================================================================
// State
// ===========================================================================

#[test]
fn save_load_roundtrip_preserves_greedy_output() {
    let prompt = tokenizer::encode("Once upon", true);

    let mut plain = tiny_window(64, 64);
    plain.evaluate(&prompt, 0).unwrap();
    let expected = greedy_continue(&mut plain, 8);

    let mut cycled = tiny_window(64, 64);
    cycled.evaluate(&prompt, 0).unwrap();
    let blob = cycled.save_state().unwrap();
    cycled.load_state(&blob).unwrap();
    assert_eq!(greedy_continue(&mut cycled, 8), expected);
}

#[test]
fn snapshot_restore_rewinds_bookkeeping() {
    let mut window = tiny_window(64, 64);
    window.push_inputs(&tokenizer::encode("seed", true));
    let mut pending = Vec::new();
    window.consume_inputs(&mut pending, 64);
    window.eval_pending(&mut pending, 0, false).unwrap();

    let snapshot = window.snapshot().unwrap();
    let first = greedy_continue(&mut window, 5);
    window.push_inputs(&tokenizer::encode("more", false));

    window.restore(&snapshot).unwrap();
    assert_eq!(window.past(), snapshot.past());
    assert_eq!(window.embed_inputs().len(), 5);
    assert!(window.inputs_drained());
    assert_eq!(greedy_continue(&mut window, 5), first);
}

#[test]
fn oversized_blob_rejected_and_state_unchanged() {
    let mut window = tiny_window(16, 16);
    window.evaluate(&tokenizer::encode("abc", true), 0).unwrap();
    let before = window.logits().unwrap().to_vec();

    let huge = vec![0u8; window.save_state().unwrap().len() * 100];
    let err = window.load_state(&huge).unwrap_err();
    assert!(matches!(err, HubError::StateSizeMismatch { .. }));
    assert_eq!(window.logits().unwrap(), before.as_slice());
}

#[test]
fn state_file_has_exact_length_and_restores() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.bin");

    let mut window = tiny_window(64, 64);
    window.evaluate(&tokenizer::encode("persist me", true), 0).unwrap();
    let written = window.save_state_file(&path).unwrap();
    assert_eq!(std::fs::metadata(&path).unwrap().len() as usize, written);
    assert_eq!(written, window.save_state().unwrap().len());

    let mut restored = tiny_window(64, 64);
    restored.load_state_file(&path).unwrap();
    assert_eq!(restored.past(), window.past());
    assert_eq!(restored.resident(), window.resident());
    assert_eq!(greedy_continue(&mut restored, 4), greedy_continue(&mut window, 4));
}

// ===========================================================================
// Release and decode
// ===========================================================================

#[test]
fn released_window_reports_context_released() {
    let backend = TinyBackend::new();
    let stats = backend.stats();
    let mut window = window_from(&backend, 16, 16);
    assert_eq!(stats.live_contexts(), 1);

    window.release();
    assert!(window.is_released());
    assert_eq!(stats.live_contexts(), 0);
    assert!(matches!(
        window.tokenize("a", false),
        Err(HubError::ContextReleased(_))
    ));
    assert!(matches!(
        window.evaluate(&[5], 0),
        Err(HubError::ContextReleased(_))
    ));
}

#[test]
fn decode_token_streams_multibyte_text() {
    let mut window = tiny_window(16, 16);
    let tokens = window.tokenize("é!", false).unwrap();
    assert_eq!(tokens.len(), 3);
    assert_eq!(window.decode_token(tokens[0]).unwrap(), "");
    assert_eq!(window.decode_token(tokens[1]).unwrap(), "é");
    assert_eq!(window.decode_token(tokens[2]).unwrap(), "!");
}

#[test]
fn tail_text_reads_recent_tokens() {
    let mut window = tiny_window(16, 16);
    window.push_inputs(&tokenizer::encode("User:", false));
    let mut pending = Vec::new();
    window.consume_inputs(&mut pending, 16);
    assert!(window.tail_text(5).unwrap().ends_with("User:"));
}
