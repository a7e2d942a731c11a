//! # hub-engine
//!
//! The "narrow waist" of the llama-hub stack. Defines the native engine traits
//! ([`NativeBackend`], [`NativeModel`], [`NativeContext`]), the error taxonomy
//! shared by every crate, and the per-model configuration [`ModelParams`].
//! Context windows, executors and sessions are written against these traits
//! only, so a real FFI backend and the reference backends in `hub-runtime`
//! are interchangeable.
//!
//! ## Design Notes
//!
//! ### Ownership
//! A [`NativeModel`] is shared read-only between every context created from
//! it (`Arc<dyn NativeModel>`). A [`NativeContext`] is exclusively owned by a
//! single context window and is released when dropped; there is no explicit
//! free call anywhere in the stack.
//!
//! ### Token Type
//! `TokenId` is aliased as `i32` for FFI compatibility, though token IDs are logically
//! non-negative.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub type Result<T> = std::result::Result<T, HubError>;

/// Token ID type (i32 for FFI compat; logically non-negative).
pub type TokenId = i32;

/// Top-level error type for all hub operations.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("Model not found: {0}")]
    ModelNotFound(String),
    #[error("Model loading failed: {0}")]
    ModelLoad(String),
    #[error("Context {0} already exists")]
    ContextAlreadyExists(String),
    #[error("Model {model} reached its instance limit of {max}")]
    MaxInstancesReached { model: String, max: i32 },
    #[error("Native evaluation failed: {0}")]
    NativeEval(String),
    #[error("State blob of {blob} bytes exceeds context state size {capacity}")]
    StateSizeMismatch { blob: usize, capacity: usize },
    #[error("Tokenization failed: {0}")]
    Tokenization(String),
    #[error("Context {0} has been released")]
    ContextReleased(String),
    #[error("Session not found: {0}")]
    SessionNotFound(String),
    #[error("Session {0} is busy with another request")]
    SessionBusy(String),
    #[error("Sampling failed: {0}")]
    Sampling(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl HubError {
    /// Whether the error leaves the owning session unusable.
    pub fn is_fatal(&self) -> bool {
        matches!(self, HubError::NativeEval(_) | HubError::ContextReleased(_))
    }
}

/// Configuration for one named model, as found in the hub config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelParams {
    pub name: String,
    pub model_path: String,
    pub context_size: usize,
    pub batch_size: usize,
    pub gpu_layer_count: i32,
    pub main_gpu: i32,
    pub threads: usize,
    pub seed: u64,
    pub use_fp16_memory: bool,
    pub use_memory_map: bool,
    pub use_memory_lock: bool,
    pub lora_adapter: Option<String>,
    pub lora_base: Option<String>,
    /// Maximum concurrent sessions bound to this model; negative means unlimited.
    pub max_instances: i32,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            name: String::new(),
            model_path: String::new(),
            context_size: 512,
            batch_size: 512,
            gpu_layer_count: 20,
            main_gpu: 0,
            threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            seed: 1_686_349_486,
            use_fp16_memory: true,
            use_memory_map: true,
            use_memory_lock: false,
            lora_adapter: None,
            lora_base: None,
            max_instances: -1,
        }
    }
}

impl ModelParams {
    pub fn new(name: impl Into<String>, model_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model_path: model_path.into(),
            ..Self::default()
        }
    }

    pub fn with_context_size(mut self, n_ctx: usize) -> Self {
        self.context_size = n_ctx;
        self
    }

    pub fn with_batch_size(mut self, n_batch: usize) -> Self {
        self.batch_size = n_batch;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_max_instances(mut self, max: i32) -> Self {
        self.max_instances = max;
        self
    }

    /// `Some(cap)` when the model limits its concurrent sessions.
    pub fn instance_cap(&self) -> Option<usize> {
        usize::try_from(self.max_instances).ok()
    }
}

/// Loads model weights. One backend serves every configured model.
pub trait NativeBackend: Send + Sync {
    /// Load weights (and the optional LoRA adapter) described by `params`.
    fn load_model(&self, params: &ModelParams) -> Result<Arc<dyn NativeModel>>;
}

/// Loaded, immutable model weights.
pub trait NativeModel: Send + Sync {
    /// Allocate a fresh evaluation context sized per `params`.
    fn new_context(&self, params: &ModelParams) -> Result<Box<dyn NativeContext>>;

    /// Vocabulary size.
    fn n_vocab(&self) -> usize;
}

/// A native evaluation context: the KV cache of one session.
///
/// `eval` always receives at most one batch; splitting long inputs into
/// batches is the caller's job.
pub trait NativeContext: Send {
    /// Context capacity in tokens.
    fn n_ctx(&self) -> usize;

    fn n_vocab(&self) -> usize;

    fn token_bos(&self) -> TokenId;

    fn token_eos(&self) -> TokenId;

    fn token_nl(&self) -> TokenId;

    /// Tokenize `text`, optionally prefixed with the BOS marker.
    fn tokenize(&self, text: &str, add_bos: bool) -> Result<Vec<TokenId>>;

    /// Raw bytes of a single token. May be a partial UTF-8 sequence.
    fn token_to_piece(&self, token: TokenId) -> Result<Vec<u8>>;

    /// Evaluate `tokens` starting at position `n_past`, discarding any
    /// resident entries at or after that position.
    fn eval(&mut self, tokens: &[TokenId], n_past: usize) -> Result<()>;

    /// Logits for the last evaluated position (`n_vocab` entries).
    fn logits(&self) -> &[f32];

    /// Upper bound on the serialized state size in bytes.
    fn state_size(&self) -> usize;

    /// Serialize state into `dst`, returning the number of bytes written.
    fn copy_state(&self, dst: &mut [u8]) -> Result<usize>;

    /// Restore state from `src`, returning the number of bytes read.
    fn set_state(&mut self, src: &[u8]) -> Result<usize>;
}
