//! Per-generation timing.
//!
//! A session starts an [`InferenceTimer`] for every `generate` call. The timer
//! forwards three events to a [`TelemetryHook`]: prefill done, one per
//! generated token, and the final [`InferenceMetrics`].

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Timing summary of one generation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InferenceMetrics {
    /// Start of the call until the prompt was decoded, in milliseconds.
    pub ttft_ms: f64,
    /// Generated tokens over decode time; prefill is excluded.
    pub tokens_per_sec: f64,
    pub prompt_tokens: usize,
    pub generated_tokens: usize,
    /// Whole call, in milliseconds.
    pub total_time_ms: f64,
}

impl InferenceMetrics {
    /// Time spent after prefill, in milliseconds.
    pub fn decode_time_ms(&self) -> f64 {
        (self.total_time_ms - self.ttft_ms).max(0.0)
    }
}

/// Receives timing events. Every method defaults to doing nothing.
pub trait TelemetryHook: Send + Sync {
    fn on_prefill_complete(&self, _ttft_ms: f64) {}

    /// `token_idx` counts from 1.
    fn on_token_generated(&self, _token_idx: usize, _elapsed_ms: f64) {}

    fn on_generation_complete(&self, _metrics: &InferenceMetrics) {}
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTelemetry;

impl TelemetryHook for NoopTelemetry {}

/// Keeps the metrics of the most recent generation. Clones share storage.
#[derive(Debug, Clone, Default)]
pub struct LogTelemetry {
    last: Arc<Mutex<Option<InferenceMetrics>>>,
}

impl LogTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_metrics(&self) -> Option<InferenceMetrics> {
        self.last
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl TelemetryHook for LogTelemetry {
    fn on_generation_complete(&self, metrics: &InferenceMetrics) {
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        *last = Some(metrics.clone());
    }
}

/// Emits events through `tracing`; the default hook of a session.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTelemetry;

impl TelemetryHook for TracingTelemetry {
    fn on_prefill_complete(&self, ttft_ms: f64) {
        tracing::debug!(ttft_ms, "prefill complete");
    }

    fn on_token_generated(&self, token_idx: usize, elapsed_ms: f64) {
        tracing::trace!(token_idx, elapsed_ms, "token generated");
    }

    fn on_generation_complete(&self, metrics: &InferenceMetrics) {
        tracing::info!(
            prompt_tokens = metrics.prompt_tokens,
            generated_tokens = metrics.generated_tokens,
            ttft_ms = metrics.ttft_ms,
            tokens_per_sec = metrics.tokens_per_sec,
            total_time_ms = metrics.total_time_ms,
            "generation complete"
        );
    }
}

/// Clock for one generation.
///
/// Create it when the call starts, then `mark_prefill_complete`, one
/// `mark_token` per emitted token, and `finish`.
pub struct InferenceTimer {
    hook: Arc<dyn TelemetryHook>,
    started: Instant,
    prefilled: Option<Instant>,
    prompt_tokens: usize,
    tokens: usize,
}

impl InferenceTimer {
    pub fn new(prompt_tokens: usize, hook: Arc<dyn TelemetryHook>) -> Self {
        Self {
            hook,
            started: Instant::now(),
            prefilled: None,
            prompt_tokens,
            tokens: 0,
        }
    }

    /// The prompt length is usually only known after tokenizing, which is
    /// already inside the timed region.
    pub fn set_prompt_tokens(&mut self, prompt_tokens: usize) {
        self.prompt_tokens = prompt_tokens;
    }

    pub fn mark_prefill_complete(&mut self) {
        let now = Instant::now();
        self.prefilled = Some(now);
        self.hook
            .on_prefill_complete(millis(now.duration_since(self.started)));
    }

    pub fn mark_token(&mut self) {
        self.tokens += 1;
        self.hook
            .on_token_generated(self.tokens, millis(self.started.elapsed()));
    }

    pub fn token_count(&self) -> usize {
        self.tokens
    }

    pub fn finish(self) -> InferenceMetrics {
        let total = self.started.elapsed();
        let ttft = self
            .prefilled
            .map_or(Duration::ZERO, |t| t.duration_since(self.started));
        let decode = total.saturating_sub(ttft);

        let tokens_per_sec = if self.tokens > 0 && !decode.is_zero() {
            self.tokens as f64 / decode.as_secs_f64()
        } else {
            0.0
        };

        let metrics = InferenceMetrics {
            ttft_ms: millis(ttft),
            tokens_per_sec,
            prompt_tokens: self.prompt_tokens,
            generated_tokens: self.tokens,
            total_time_ms: millis(total),
        };
        self.hook.on_generation_complete(&metrics);
        metrics
    }
}
