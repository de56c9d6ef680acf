//! Session configuration.
//!
//! Loaded from JSON or built in code. Every field except `model_path` has a
//! default, so a minimal config file is just `{"model_path": "model.gguf"}`.

use std::path::{Path, PathBuf};

use llama_engine::{ContextParams, ModelParams};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SessionError};

/// Parameters for loading a model and creating its context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Path to the GGUF weight file.
    pub model_path: PathBuf,

    /// Maximum context length in tokens.
    #[serde(default = "default_context_length")]
    pub context_length: u32,

    /// Maximum tokens per decode submission.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Threads for single-token decode and batched prefill.
    #[serde(default = "default_threads")]
    pub threads: u32,

    /// Layers offloaded to an accelerator (0 = CPU only, negative = all).
    #[serde(default)]
    pub accelerator_layers: i32,

    /// Request pooled embeddings from the context.
    #[serde(default = "default_embeddings")]
    pub embeddings: bool,
}

fn default_context_length() -> u32 {
    2048
}
fn default_batch_size() -> u32 {
    512
}
fn default_threads() -> u32 {
    4
}
fn default_embeddings() -> bool {
    true
}

impl SessionConfig {
    pub fn new(model_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            context_length: default_context_length(),
            batch_size: default_batch_size(),
            threads: default_threads(),
            accelerator_layers: 0,
            embeddings: default_embeddings(),
        }
    }

    /// Load from a JSON file and validate.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let config: SessionConfig = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_context_length(mut self, context_length: u32) -> Self {
        self.context_length = context_length;
        self
    }

    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_threads(mut self, threads: u32) -> Self {
        self.threads = threads;
        self
    }

    pub fn with_accelerator_layers(mut self, layers: i32) -> Self {
        self.accelerator_layers = layers;
        self
    }

    pub fn with_embeddings(mut self, embeddings: bool) -> Self {
        self.embeddings = embeddings;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.model_path.as_os_str().is_empty() {
            return Err(SessionError::Config("model_path is empty".into()));
        }
        if self.context_length == 0 {
            return Err(SessionError::Config("context_length must be at least 1".into()));
        }
        if self.batch_size == 0 {
            return Err(SessionError::Config("batch_size must be at least 1".into()));
        }
        if self.threads == 0 {
            return Err(SessionError::Config("threads must be at least 1".into()));
        }
        Ok(())
    }

    pub fn model_params(&self) -> ModelParams {
        ModelParams {
            n_gpu_layers: self.accelerator_layers,
        }
    }

    /// The same thread count serves single-token decode and batched prefill.
    pub fn context_params(&self) -> ContextParams {
        ContextParams {
            n_ctx: self.context_length,
            n_batch: self.batch_size,
            n_threads: self.threads,
            n_threads_batch: self.threads,
            embeddings: self.embeddings,
        }
    }
}
