//! # llama-engine
//!
//! The "narrow waist" of the session stack. Defines the [`LlamaEngine`] trait that
//! describes the native inference library a session sits on: model loading,
//! context creation, tokenization, batched decoding, and output accessors.
//! Everything above this crate (tokenizer protocol, sampling, sessions) talks to
//! the engine only through this trait, so a native binding and the in-process
//! reference engine are interchangeable.
//!
//! ## Design Notes
//!
//! ### Buffer-filling calls
//! [`LlamaEngine::tokenize`] and [`LlamaEngine::token_to_piece`] keep the native
//! convention: they return the number of elements written, or a negative count
//! whose magnitude is the capacity that would have been required. The retry
//! protocol built on top of that lives in `llama-tokenizer`.
//!
//! ### Ownership
//! Models and contexts are engine-defined associated types handed back to the
//! engine for release. The engine never frees them on its own; the session layer
//! owns them and decides the release order (context first, then model).
//!
//! ### Token Type
//! `TokenId` is aliased as `i32` for FFI compatibility, though token IDs are logically
//! non-negative.

use std::path::Path;

mod batch;

pub use batch::Batch;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Token ID type (i32 for FFI compat; logically non-negative).
pub type TokenId = i32;

/// Absolute position of a token within a sequence.
pub type Position = i32;

/// Sequence slot a batch entry belongs to. Sessions only ever use slot 0.
pub type SeqId = i32;

/// Errors reported by an engine implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("model loading failed: {0}")]
    ModelLoad(String),
    #[error("context creation failed: {0}")]
    ContextCreate(String),
    #[error("decode failed with status {status}")]
    Decode { status: i32 },
    #[error("batch is full (capacity {capacity})")]
    BatchFull { capacity: usize },
    #[error("invalid batch: {0}")]
    InvalidBatch(String),
}

/// Parameters applied when loading model weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModelParams {
    /// Number of layers offloaded to an accelerator. 0 keeps everything on CPU;
    /// a negative count offloads every layer.
    pub n_gpu_layers: i32,
}

/// Parameters applied when creating an inference context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextParams {
    /// Maximum context length in tokens.
    pub n_ctx: u32,
    /// Maximum number of tokens submitted in one decode call.
    pub n_batch: u32,
    /// Threads used for single-token decode.
    pub n_threads: u32,
    /// Threads used for batched (prompt) decode.
    pub n_threads_batch: u32,
    /// Ask the context to produce pooled embeddings alongside logits.
    pub embeddings: bool,
}

impl Default for ContextParams {
    fn default() -> Self {
        Self {
            n_ctx: 2048,
            n_batch: 512,
            n_threads: 4,
            n_threads_batch: 4,
            embeddings: true,
        }
    }
}

/// The native inference engine boundary.
///
/// Implementations are shared between sessions (`&self` everywhere), but a
/// single `Context` is never used from two call sites at once: every method that
/// touches a context receives it explicitly, and the session layer guarantees
/// exclusive access.
pub trait LlamaEngine: Send + Sync {
    /// Loaded model weights and vocabulary.
    type Model: Send;
    /// Inference context (KV cache, output buffers) bound to one model.
    type Context: Send;

    /// Initialize process-wide backend state.
    fn backend_init(&self);

    /// Tear down process-wide backend state.
    fn backend_free(&self);

    /// Load a model from a weight file.
    fn load_model(&self, path: &Path, params: &ModelParams) -> Result<Self::Model>;

    /// Create an inference context for a loaded model.
    fn new_context(&self, model: &Self::Model, params: &ContextParams) -> Result<Self::Context>;

    /// Release a context. Must be called before the owning model is released.
    fn free_context(&self, ctx: Self::Context);

    /// Release a model.
    fn free_model(&self, model: Self::Model);

    /// Tokenize `text` into `tokens`.
    ///
    /// Returns the number of tokens written, or the negated required capacity
    /// when `tokens` is too small (nothing is written in that case).
    fn tokenize(
        &self,
        model: &Self::Model,
        text: &str,
        tokens: &mut [TokenId],
        add_special: bool,
        parse_special: bool,
    ) -> i32;

    /// Render a single token into `buf` as raw bytes.
    ///
    /// Same return convention as [`LlamaEngine::tokenize`]. Pieces are not
    /// guaranteed to be valid UTF-8 on their own.
    fn token_to_piece(&self, model: &Self::Model, token: TokenId, buf: &mut [u8], special: bool)
        -> i32;

    /// Submit a batch. Synchronous: returns once the batch is fully processed.
    fn decode(&self, ctx: &mut Self::Context, batch: &Batch) -> Result<()>;

    /// Logits for the `i`-th output row of the last decode. Negative `i` counts
    /// from the end (`-1` is the last row).
    fn logits_ith<'a>(&self, ctx: &'a Self::Context, i: i32) -> Option<&'a [f32]>;

    /// Pooled embedding for the `i`-th output row, if the model and context
    /// produce one.
    fn embeddings_ith<'a>(&self, ctx: &'a Self::Context, i: i32) -> Option<&'a [f32]>;

    /// Vocabulary size.
    fn n_vocab(&self, model: &Self::Model) -> usize;

    /// Embedding width of the model.
    fn n_embd(&self, model: &Self::Model) -> usize;

    /// Whether `token` marks end of generation.
    fn is_eog(&self, model: &Self::Model, token: TokenId) -> bool;

    /// Resident size of the model weights in bytes.
    fn model_size(&self, model: &Self::Model) -> u64;

    /// Drop all cached key/value state so the next decode starts at position 0.
    fn kv_cache_clear(&self, ctx: &mut Self::Context);
}

/// Resolve a possibly negative output-row index against `len` rows.
///
/// Shared by engine implementations that follow the native `-1 == last`
/// convention.
pub fn resolve_output_index(i: i32, len: usize) -> Option<usize> {
    if i < 0 {
        let back = i.unsigned_abs() as usize;
        len.checked_sub(back)
    } else {
        let idx = i as usize;
        (idx < len).then_some(idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_index_counts_from_end() {
        assert_eq!(resolve_output_index(-1, 3), Some(2));
        assert_eq!(resolve_output_index(-3, 3), Some(0));
        assert_eq!(resolve_output_index(-4, 3), None);
    }

    #[test]
    fn positive_index_is_bounds_checked() {
        assert_eq!(resolve_output_index(0, 1), Some(0));
        assert_eq!(resolve_output_index(1, 1), None);
        assert_eq!(resolve_output_index(-1, 0), None);
    }

    #[test]
    fn error_display() {
        assert_eq!(
            EngineError::Decode { status: 1 }.to_string(),
            "decode failed with status 1"
        );
        assert_eq!(
            EngineError::BatchFull { capacity: 8 }.to_string(),
            "batch is full (capacity 8)"
        );
    }

    #[test]
    fn default_context_params() {
        let params = ContextParams::default();
        assert_eq!(params.n_ctx, 2048);
        assert_eq!(params.n_batch, 512);
        assert!(params.embeddings);
    }
}
