//! Handle-based session table.
//!
//! Exposes sessions through opaque non-zero `u64` handles for callers that
//! cannot hold a [`Session`] directly (FFI layers, host-language bindings).
//! Handles are never reused, so a stale handle is detected instead of
//! aliasing a newer session. Handle 0 is the null handle: freeing it is a
//! no-op and its memory usage is 0.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use llama_engine::LlamaEngine;
use llama_runtime::Runtime;

use crate::config::SessionConfig;
use crate::embed::{Embedding, EmbeddingBatch};
use crate::error::{Result, SessionError};
use crate::generate::{GenerateRequest, GenerationSummary, TokenSink};
use crate::session::Session;

/// The handle that never names a session.
pub const NULL_HANDLE: u64 = 0;

/// Owns sessions on behalf of handle-holding callers.
///
/// Not internally synchronized: wrap it in a `Mutex` to share it.
pub struct SessionRegistry<E: LlamaEngine> {
    runtime: Runtime<E>,
    sessions: HashMap<u64, Session<E>>,
    next_handle: u64,
}

impl<E: LlamaEngine> fmt::Debug for SessionRegistry<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.sessions.len())
            .field("next_handle", &self.next_handle)
            .finish()
    }
}

impl<E: LlamaEngine> SessionRegistry<E> {
    pub fn new(engine: E) -> Self {
        Self::with_runtime(Runtime::new(engine))
    }

    /// Share an existing runtime (and its backend refcount).
    pub fn with_runtime(runtime: Runtime<E>) -> Self {
        Self {
            runtime,
            sessions: HashMap::new(),
            next_handle: NULL_HANDLE + 1,
        }
    }

    pub fn runtime(&self) -> &Runtime<E> {
        &self.runtime
    }

    /// Load a model and return its handle.
    pub fn load_model(
        &mut self,
        path: impl AsRef<Path>,
        context_length: u32,
        batch_size: u32,
        threads: u32,
        accelerator_layers: i32,
    ) -> Result<u64> {
        let config = SessionConfig::new(path.as_ref())
            .with_context_length(context_length)
            .with_batch_size(batch_size)
            .with_threads(threads)
            .with_accelerator_layers(accelerator_layers);
        self.load(&config)
    }

    pub fn load(&mut self, config: &SessionConfig) -> Result<u64> {
        let session = Session::load(&self.runtime, config)?;
        Ok(self.insert(session))
    }

    /// Take ownership of an already loaded session.
    pub fn insert(&mut self, session: Session<E>) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        tracing::debug!(handle, session = %session.id(), "handle issued");
        self.sessions.insert(handle, session);
        handle
    }

    /// Release the session behind `handle`. Null and stale handles are ignored.
    pub fn free_model(&mut self, handle: u64) {
        if handle == NULL_HANDLE {
            return;
        }
        match self.sessions.remove(&handle) {
            Some(session) => session.close(),
            None => tracing::warn!(handle, "free of unknown session handle ignored"),
        }
    }

    /// Detach the session behind `handle` without closing it.
    pub fn remove(&mut self, handle: u64) -> Result<Session<E>> {
        self.sessions
            .remove(&handle)
            .ok_or(SessionError::InvalidHandle(handle))
    }

    /// Greedy below or at zero temperature, temperature-scaled argmax above.
    pub fn generate<S>(
        &mut self,
        handle: u64,
        prompt: &str,
        max_tokens: usize,
        temperature: f32,
        sink: &mut S,
    ) -> Result<GenerationSummary>
    where
        S: TokenSink + ?Sized,
    {
        let request = GenerateRequest::new(prompt, max_tokens).with_temperature(temperature);
        self.generate_request(handle, &request, sink)
    }

    pub fn generate_request<S>(
        &mut self,
        handle: u64,
        request: &GenerateRequest,
        sink: &mut S,
    ) -> Result<GenerationSummary>
    where
        S: TokenSink + ?Sized,
    {
        self.session_mut(handle)?.generate(request, sink)
    }

    pub fn embed(&mut self, handle: u64, text: &str) -> Result<Embedding> {
        self.session_mut(handle)?.embed(text)
    }

    pub fn embed_batch<S: AsRef<str>>(
        &mut self,
        handle: u64,
        texts: &[S],
    ) -> Result<EmbeddingBatch> {
        self.session_mut(handle)?.embed_batch(texts)
    }

    /// Model size in bytes, or 0 for a null or stale handle.
    pub fn memory_usage(&self, handle: u64) -> u64 {
        self.sessions
            .get(&handle)
            .map_or(0, |session| session.memory_usage())
    }

    pub fn session(&self, handle: u64) -> Result<&Session<E>> {
        self.sessions
            .get(&handle)
            .ok_or(SessionError::InvalidHandle(handle))
    }

    pub fn session_mut(&mut self, handle: u64) -> Result<&mut Session<E>> {
        self.sessions
            .get_mut(&handle)
            .ok_or(SessionError::InvalidHandle(handle))
    }

    pub fn contains(&self, handle: u64) -> bool {
        self.sessions.contains_key(&handle)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
