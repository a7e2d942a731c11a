//! Integration tests for the reference backends.
//!
//! Validates:
//! - Native context contract (tokenize, eval, logits)
//! - State blob save/restore and rejection of malformed blobs
//! - Failure injection and context lifetime accounting

use hub_engine::{HubError, ModelParams, NativeBackend, NativeContext};
use hub_runtime::{tokenizer, ScriptedBackend, TinyBackend};

fn params(n_ctx: usize) -> ModelParams {
    ModelParams::new("test", "/dev/null").with_context_size(n_ctx)
}

fn argmax(logits: &[f32]) -> usize {
    logits
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
        .map(|(i, _)| i)
        .unwrap()
}

// ===========================================================================
// Context contract
// ===========================================================================

#[test]
fn scripted_context_follows_reply() {
    let backend = ScriptedBackend::new("ok");
    let model = backend.load_model(&params(64)).unwrap();
    let mut ctx = model.new_context(&params(64)).unwrap();

    let prompt = ctx.tokenize("hi", true).unwrap();
    ctx.eval(&prompt, 0).unwrap();
    let first = argmax(ctx.logits()) as i32;
    assert_eq!(ctx.token_to_piece(first).unwrap(), b"o");

    ctx.eval(&[first], prompt.len()).unwrap();
    let second = argmax(ctx.logits()) as i32;
    assert_eq!(ctx.token_to_piece(second).unwrap(), b"k");
}

#[test]
fn eval_rejects_overflow_and_gaps() {
    let backend = TinyBackend::new();
    let model = backend.load_model(&params(4)).unwrap();
    let mut ctx = model.new_context(&params(4)).unwrap();

    let err = ctx.eval(&tokenizer::encode("hello", false), 0).unwrap_err();
    assert!(matches!(err, HubError::NativeEval(_)));

    let err = ctx.eval(&tokenizer::encode("a", false), 2).unwrap_err();
    assert!(matches!(err, HubError::NativeEval(_)));
}

#[test]
fn special_tokens() {
    let backend = TinyBackend::new();
    let model = backend.load_model(&params(8)).unwrap();
    let ctx = model.new_context(&params(8)).unwrap();
    assert_eq!(ctx.token_bos(), tokenizer::TOKEN_BOS);
    assert_eq!(ctx.token_eos(), tokenizer::TOKEN_EOS);
    assert_eq!(ctx.token_to_piece(ctx.token_nl()).unwrap(), b"\n");
    assert_eq!(ctx.n_vocab(), tokenizer::VOCAB_SIZE);
}

// ===========================================================================
// State blobs
// ===========================================================================

#[test]
fn state_roundtrip_restores_logits() {
    let backend = TinyBackend::new();
    let model = backend.load_model(&params(32)).unwrap();
    let mut ctx = model.new_context(&params(32)).unwrap();

    ctx.eval(&tokenizer::encode("abc", true), 0).unwrap();
    let mut blob = vec![0u8; ctx.state_size()];
    let written = ctx.copy_state(&mut blob).unwrap();
    assert!(written < ctx.state_size());
    blob.truncate(written);
    let before = ctx.logits().to_vec();

    ctx.eval(&tokenizer::encode("zzz", false), 4).unwrap();
    assert_ne!(ctx.logits(), before.as_slice());

    assert_eq!(ctx.set_state(&blob).unwrap(), written);
    assert_eq!(ctx.logits(), before.as_slice());
}

#[test]
fn malformed_state_leaves_context_unchanged() {
    let backend = TinyBackend::new();
    let model = backend.load_model(&params(32)).unwrap();
    let mut ctx = model.new_context(&params(32)).unwrap();
    ctx.eval(&tokenizer::encode("abc", true), 0).unwrap();
    let before = ctx.logits().to_vec();

    assert!(ctx.set_state(&[1, 2, 3, 4, 5, 6, 7, 8]).is_err());
    assert!(ctx.set_state(&[]).is_err());
    assert_eq!(ctx.logits(), before.as_slice());
}

// ===========================================================================
// Failure injection and lifetimes
// ===========================================================================

#[test]
fn injected_failure_after_n_evals() {
    let backend = ScriptedBackend::new("x").fail_after_evals(1);
    let model = backend.load_model(&params(16)).unwrap();
    let mut ctx = model.new_context(&params(16)).unwrap();

    ctx.eval(&tokenizer::encode("a", true), 0).unwrap();
    let err = ctx.eval(&tokenizer::encode("b", false), 2).unwrap_err();
    assert!(matches!(err, HubError::NativeEval(_)));
}

#[test]
fn contexts_are_counted_until_dropped() {
    let backend = TinyBackend::new();
    let stats = backend.stats();
    let model = backend.load_model(&params(16)).unwrap();
    assert_eq!(stats.loads(), 1);

    let a = model.new_context(&params(16)).unwrap();
    let b = model.new_context(&params(16)).unwrap();
    assert_eq!(stats.live_contexts(), 2);
    drop(a);
    assert_eq!(stats.live_contexts(), 1);
    drop(b);
    assert_eq!(stats.live_contexts(), 0);
}

#[test]
fn missing_lora_adapter_fails_load() {
    let backend = TinyBackend::new();
    let mut p = params(16);
    p.lora_adapter = Some("/nonexistent/adapter.bin".into());
    assert!(matches!(backend.load_model(&p), Err(HubError::ModelLoad(_))));
}
