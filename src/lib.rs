//! On-device text generation sessions over a llama.cpp-style engine.
//!
//! A [`Session`] owns one model and one inference context. It prefills prompts
//! in batches, runs the decode loop with a pluggable [`SamplingStrategy`],
//! streams text to a [`TokenSink`], and extracts embeddings. The engine itself
//! sits behind the [`LlamaEngine`] trait; [`SessionRegistry`] exposes sessions
//! through opaque integer handles.

pub mod config;
pub mod embed;
pub mod error;
pub mod generate;
pub mod prefill;
pub mod registry;
pub mod session;

pub use config::SessionConfig;
pub use embed::{Embedding, EmbeddingBatch, FALLBACK_DIM};
pub use error::{DecodeStage, Result, SessionError};
pub use generate::{
    ChannelSink, GenerateRequest, GenerationSummary, StopReason, TokenSink,
};
pub use registry::{SessionRegistry, NULL_HANDLE};
pub use session::Session;

pub use llama_engine::{LlamaEngine, TokenId};
pub use llama_runtime::{
    InferenceMetrics, LogTelemetry, NoopTelemetry, Runtime, TelemetryHook, TracingTelemetry,
};
pub use llama_sampling::{SamplingConfig, SamplingStrategy};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
