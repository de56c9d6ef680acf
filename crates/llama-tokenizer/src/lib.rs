//! # llama-tokenizer
//!
//! Text ↔ token conversion on top of a [`llama_engine::LlamaEngine`].
//!
//! This crate provides:
//! - The retry-on-resize buffer protocol used by every engine conversion
//!   ([`fill_with_retry`], [`tokenize`], [`token_to_piece`])
//! - Streaming decoding of token pieces with partial UTF-8 handling ([`DecodingState`])
//! - Stop-sequence detection over streamed text ([`StopMatcher`])

mod buffer;
mod stop;
mod stream;

pub use buffer::{
    fill_with_retry, token_capacity_hint, token_to_piece, tokenize, PIECE_CAPACITY_HINT,
};
pub use stop::{StopMatcher, StopScan};
pub use stream::DecodingState;

/// Error type for tokenization operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenizerError {
    #[error("buffer still too small after resize: allocated {requested}, engine requires {required}")]
    BufferExhausted { requested: usize, required: usize },
    #[error("engine reported {count} elements for a buffer of {capacity}")]
    InvalidCount { count: usize, capacity: usize },
}

pub type TokenizerResult<T> = std::result::Result<T, TokenizerError>;
