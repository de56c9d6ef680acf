//! Owned inference sessions.
//!
//! A [`Session`] owns one loaded model and one inference context bound to it.
//! It is move-only: dropping it (or calling [`Session::close`]) releases the
//! context, then the model, then its reference on the engine backend. A
//! session is a single-writer resource; every operation that touches the
//! context takes `&mut self`.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use llama_engine::{LlamaEngine, TokenId};
use llama_runtime::{BackendGuard, Runtime, TelemetryHook, TracingTelemetry};
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use crate::prefill;

/// A loaded model plus its inference context.
pub struct Session<E: LlamaEngine> {
    pub(crate) id: Uuid,
    /// Model and context; `None` only once `drop` has released them.
    parts: Option<(E::Model, E::Context)>,
    pub(crate) context_length: usize,
    pub(crate) batch_capacity: usize,
    pub(crate) telemetry: Arc<dyn TelemetryHook>,
    // Declared last: the backend reference outlives the model and context.
    pub(crate) guard: BackendGuard<E>,
}

impl<E: LlamaEngine> Session<E> {
    /// Load the model named by `config` and create its context.
    ///
    /// The engine backend is initialized if this is the first live session on
    /// `runtime`. If context creation fails the model is released before the
    /// error is returned.
    pub fn load(runtime: &Runtime<E>, config: &SessionConfig) -> Result<Self> {
        config.validate()?;

        let guard = runtime.acquire();
        let engine = guard.engine();

        let model = engine
            .load_model(&config.model_path, &config.model_params())
            .map_err(|source| SessionError::ModelLoad {
                path: config.model_path.clone(),
                source,
            })?;

        let context = match engine.new_context(&model, &config.context_params()) {
            Ok(context) => context,
            Err(source) => {
                engine.free_model(model);
                return Err(SessionError::ContextCreate { source });
            }
        };

        let id = Uuid::new_v4();
        tracing::info!(
            session = %id,
            model = %config.model_path.display(),
            context_length = config.context_length,
            batch_size = config.batch_size,
            threads = config.threads,
            accelerator_layers = config.accelerator_layers,
            "session loaded"
        );

        Ok(Self {
            id,
            parts: Some((model, context)),
            context_length: config.context_length as usize,
            batch_capacity: config.batch_size as usize,
            telemetry: Arc::new(TracingTelemetry),
            guard,
        })
    }

    /// Shorthand for [`Session::load`] with default parameters.
    pub fn open(runtime: &Runtime<E>, model_path: impl AsRef<Path>) -> Result<Self> {
        Self::load(runtime, &SessionConfig::new(model_path.as_ref()))
    }

    /// Replace the telemetry hook (defaults to [`TracingTelemetry`]).
    pub fn with_telemetry(mut self, hook: Arc<dyn TelemetryHook>) -> Self {
        self.telemetry = hook;
        self
    }

    /// Release the session now. Equivalent to dropping it.
    pub fn close(self) {}

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn context_length(&self) -> usize {
        self.context_length
    }

    pub fn batch_capacity(&self) -> usize {
        self.batch_capacity
    }

    pub fn engine(&self) -> &E {
        self.guard.engine()
    }

    pub fn model(&self) -> &E::Model {
        &self.parts().0
    }

    pub fn context(&self) -> &E::Context {
        &self.parts().1
    }

    fn parts(&self) -> &(E::Model, E::Context) {
        match &self.parts {
            Some(parts) => parts,
            None => unreachable!("session {} used after release", self.id),
        }
    }

    /// Engine, model and context borrowed together, the context mutably.
    pub(crate) fn split_mut(&mut self) -> (&E, &E::Model, &mut E::Context) {
        match &mut self.parts {
            Some((model, context)) => (self.guard.engine(), &*model, context),
            None => unreachable!("session {} used after release", self.id),
        }
    }

    pub fn n_vocab(&self) -> usize {
        self.engine().n_vocab(self.model())
    }

    pub fn n_embd(&self) -> usize {
        self.engine().n_embd(self.model())
    }

    /// Engine-reported resident size of the model weights, in bytes.
    ///
    /// Excludes the KV cache and activation buffers.
    pub fn memory_usage(&self) -> u64 {
        self.engine().model_size(self.model())
    }

    /// Tokenize `text` against this session's vocabulary. Control-token
    /// markup in `text` is parsed.
    pub fn tokenize(&self, text: &str, add_special: bool) -> Result<Vec<TokenId>> {
        Ok(llama_tokenizer::tokenize(
            self.engine(),
            self.model(),
            text,
            add_special,
            true,
        )?)
    }

    /// Raw bytes of one token.
    pub fn token_to_piece(&self, token: TokenId, special: bool) -> Result<Vec<u8>> {
        Ok(llama_tokenizer::token_to_piece(
            self.engine(),
            self.model(),
            token,
            special,
        )?)
    }

    /// Clear the KV cache and feed `tokens` from position 0, requesting output
    /// for the final token only.
    pub fn prefill(&mut self, tokens: &[TokenId]) -> Result<()> {
        self.check_fits(tokens.len())?;
        let batch_capacity = self.batch_capacity;
        let (engine, _, context) = self.split_mut();
        prefill::run(engine, context, tokens, batch_capacity)
    }

    /// Tokenize `text` with BOS and prefill it, checking the context bound.
    pub(crate) fn tokenize_and_prefill(
        &mut self,
        text: &str,
        add_special: bool,
    ) -> Result<Vec<TokenId>> {
        let tokens = self.tokenize(text, add_special)?;
        self.prefill(&tokens)?;
        Ok(tokens)
    }

    fn check_fits(&self, len: usize) -> Result<()> {
        if len == 0 {
            return Err(SessionError::EmptyInput);
        }
        if len > self.context_length {
            return Err(SessionError::ContextOverflow {
                required: len,
                available: self.context_length,
            });
        }
        Ok(())
    }
}

impl<E: LlamaEngine> fmt::Debug for Session<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("context_length", &self.context_length)
            .field("batch_capacity", &self.batch_capacity)
            .finish_non_exhaustive()
    }
}

impl<E: LlamaEngine> Drop for Session<E> {
    fn drop(&mut self) {
        if let Some((model, context)) = self.parts.take() {
            let engine = self.guard.engine();
            engine.free_context(context);
            engine.free_model(model);
        }
        tracing::info!(session = %self.id, "session closed");
    }
}
