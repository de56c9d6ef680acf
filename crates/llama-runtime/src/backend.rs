//! Backend lifecycle for llama.rs.
//!
//! Provides:
//! - [`Runtime`]: owns the engine and counts live sessions
//! - [`BackendGuard`]: one per session; the first guard initializes the
//!   engine backend, dropping the last one frees it

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use llama_engine::LlamaEngine;

struct Shared<E> {
    engine: E,
    /// Number of live guards. Held across init/free so the two never race.
    guards: Mutex<usize>,
}

impl<E> Shared<E> {
    fn guards(&self) -> MutexGuard<'_, usize> {
        self.guards.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Shared owner of an engine and its process-wide backend state.
///
/// Cloning is cheap; all clones refer to the same engine and counter.
pub struct Runtime<E: LlamaEngine> {
    shared: Arc<Shared<E>>,
}

impl<E: LlamaEngine> Clone for Runtime<E> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<E: LlamaEngine> fmt::Debug for Runtime<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("active_sessions", &self.active_sessions())
            .finish()
    }
}

impl<E: LlamaEngine> Runtime<E> {
    /// Wrap an engine. The backend is not initialized until the first
    /// [`Runtime::acquire`].
    pub fn new(engine: E) -> Self {
        Self {
            shared: Arc::new(Shared {
                engine,
                guards: Mutex::new(0),
            }),
        }
    }

    pub fn engine(&self) -> &E {
        &self.shared.engine
    }

    /// Take a reference on the backend, initializing it on the 0 → 1 transition.
    pub fn acquire(&self) -> BackendGuard<E> {
        let mut guards = self.shared.guards();
        if *guards == 0 {
            tracing::info!("initializing engine backend");
            self.shared.engine.backend_init();
        }
        *guards += 1;
        BackendGuard {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Number of live guards (one per open session).
    pub fn active_sessions(&self) -> usize {
        *self.shared.guards()
    }

    /// Whether the backend is currently initialized.
    pub fn is_initialized(&self) -> bool {
        self.active_sessions() > 0
    }
}

/// Keeps the engine backend alive. Dropping the last guard frees it.
pub struct BackendGuard<E: LlamaEngine> {
    shared: Arc<Shared<E>>,
}

impl<E: LlamaEngine> BackendGuard<E> {
    pub fn engine(&self) -> &E {
        &self.shared.engine
    }
}

impl<E: LlamaEngine> fmt::Debug for BackendGuard<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendGuard").finish_non_exhaustive()
    }
}

impl<E: LlamaEngine> Drop for BackendGuard<E> {
    fn drop(&mut self) {
        let mut guards = self.shared.guards();
        *guards = guards.saturating_sub(1);
        if *guards == 0 {
            tracing::info!("freeing engine backend");
            self.shared.engine.backend_free();
        }
    }
}
