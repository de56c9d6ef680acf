//! Error types for the llama-session crate.

use std::fmt;
use std::path::PathBuf;

use llama_engine::EngineError;
use llama_sampling::SamplingError;
use llama_tokenizer::TokenizerError;
use thiserror::Error;

/// Where a decode failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStage {
    /// Submitting prompt chunks.
    Prefill,
    /// Submitting a generated token.
    Generate,
}

impl fmt::Display for DecodeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeStage::Prefill => write!(f, "prefill"),
            DecodeStage::Generate => write!(f, "generate"),
        }
    }
}

/// Top-level error type for session operations.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("invalid session handle: {0}")]
    InvalidHandle(u64),

    #[error("failed to load model {}: {source}", path.display())]
    ModelLoad {
        path: PathBuf,
        #[source]
        source: EngineError,
    },

    #[error("failed to create inference context: {source}")]
    ContextCreate {
        #[source]
        source: EngineError,
    },

    #[error("tokenization failed: {0}")]
    Tokenization(#[from] TokenizerError),

    #[error("decode failed during {stage} at position {position}: {source}")]
    Decode {
        stage: DecodeStage,
        position: usize,
        #[source]
        source: EngineError,
    },

    #[error("input needs {required} tokens but the context holds {available}")]
    ContextOverflow { required: usize, available: usize },

    #[error("input produced no tokens")]
    EmptyInput,

    #[error("engine produced no output for the final position")]
    OutputUnavailable,

    #[error("sampling failed: {0}")]
    Sampling(#[from] SamplingError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SessionError>;
