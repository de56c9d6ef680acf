//! The generation loop.
//!
//! Prefill the prompt, then repeat: read the last output row, select a token,
//! stop on end-of-generation, otherwise render the token, hand complete text
//! to the sink, and decode the token at the cursor. The sink runs on the
//! decoding thread, so a slow consumer throttles generation directly.

use std::borrow::Cow;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::Sender;
use llama_engine::{Batch, LlamaEngine, TokenId};
use llama_runtime::{InferenceMetrics, InferenceTimer};
use llama_sampling::{SamplingConfig, SamplingStrategy};
use llama_tokenizer::{DecodingState, StopMatcher, StopScan};
use serde::Serialize;

use crate::error::{Result, SessionError};
use crate::prefill;
use crate::session::Session;

/// Receives generated text, one fragment at a time.
///
/// Fragments are never empty and always valid UTF-8. Returning
/// `ControlFlow::Break(())` stops generation before the next decode step.
pub trait TokenSink {
    fn on_text(&mut self, text: &str) -> ControlFlow<()>;
}

impl<F> TokenSink for F
where
    F: FnMut(&str) -> ControlFlow<()>,
{
    fn on_text(&mut self, text: &str) -> ControlFlow<()> {
        self(text)
    }
}

/// Forwards fragments into a channel.
///
/// With a bounded channel the producer blocks when the consumer falls behind.
/// A dropped receiver stops generation.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: Sender<String>,
}

impl ChannelSink {
    pub fn new(tx: Sender<String>) -> Self {
        Self { tx }
    }
}

impl TokenSink for ChannelSink {
    fn on_text(&mut self, text: &str) -> ControlFlow<()> {
        match self.tx.send(text.to_string()) {
            Ok(()) => ControlFlow::Continue(()),
            Err(_) => ControlFlow::Break(()),
        }
    }
}

/// Why generation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The model produced an end-of-generation token.
    EndOfGeneration,
    /// `max_tokens` tokens were generated.
    MaxTokens,
    /// A stop sequence appeared in the output.
    StopSequence,
    /// The sink or the cancel flag asked to stop.
    Cancelled,
    /// The cursor reached the context length.
    ContextFull,
}

/// Outcome of a successful generation.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationSummary {
    pub prompt_tokens: usize,
    /// Tokens selected and rendered, excluding the end-of-generation token.
    pub tokens_generated: usize,
    pub stop_reason: StopReason,
    /// Bytes of text delivered to the sink.
    pub text_bytes: usize,
    pub metrics: InferenceMetrics,
}

/// Parameters for one generation.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub prompt: String,
    /// Wrapped with `prompt` into the chat template when set.
    pub system_prompt: Option<String>,
    pub max_tokens: usize,
    pub sampling: SamplingConfig,
    /// Text that ends generation when it appears. Not delivered to the sink.
    pub stop: Vec<String>,
    /// Prepend BOS (and any other model-defined prefix tokens).
    pub add_special: bool,
    /// Render control tokens as text instead of dropping them.
    pub render_special: bool,
    /// Checked before every step; `true` stops generation.
    pub cancel: Option<Arc<AtomicBool>>,
}

impl GenerateRequest {
    pub fn new(prompt: impl Into<String>, max_tokens: usize) -> Self {
        Self {
            prompt: prompt.into(),
            system_prompt: None,
            max_tokens,
            sampling: SamplingConfig::Greedy,
            stop: Vec::new(),
            add_special: true,
            render_special: true,
            cancel: None,
        }
    }

    /// `<= 0` is greedy, anything else is temperature-scaled argmax.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.sampling = SamplingConfig::from_temperature(temperature);
        self
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    /// Text fed to the tokenizer: the bare prompt, or the system/user/assistant
    /// template when a system prompt is set.
    pub fn prompt_text(&self) -> Cow<'_, str> {
        match &self.system_prompt {
            Some(system) => Cow::Owned(format!(
                "<|system|>\n{system}\n<|end|>\n<|user|>\n{}\n<|end|>\n<|assistant|>\n",
                self.prompt
            )),
            None => Cow::Borrowed(&self.prompt),
        }
    }

    pub fn with_sampling(mut self, sampling: SamplingConfig) -> Self {
        self.sampling = sampling;
        self
    }

    pub fn with_stop(mut self, stop: impl Into<String>) -> Self {
        self.stop.push(stop.into());
        self
    }

    pub fn with_add_special(mut self, add_special: bool) -> Self {
        self.add_special = add_special;
        self
    }

    pub fn with_render_special(mut self, render_special: bool) -> Self {
        self.render_special = render_special;
        self
    }

    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Acquire))
    }
}

/// Mutable loop state.
#[derive(Debug, Clone, Copy, Default)]
struct GenerationState {
    tokens_generated: usize,
    /// Absolute position of the next token to decode.
    cursor: usize,
}

/// Text path from token pieces to the sink.
struct Emitter<'s, S: ?Sized> {
    sink: &'s mut S,
    utf8: DecodingState,
    stops: StopMatcher,
    bytes: usize,
}

impl<S: TokenSink + ?Sized> Emitter<'_, S> {
    fn deliver(&mut self, text: &str) -> ControlFlow<()> {
        if text.is_empty() {
            return ControlFlow::Continue(());
        }
        self.bytes += text.len();
        self.sink.on_text(text)
    }

    /// Push one piece. `Some` means generation must stop.
    fn piece(&mut self, bytes: &[u8]) -> Option<StopReason> {
        let text = self.utf8.push(bytes);
        if text.is_empty() {
            return None;
        }
        match self.stops.push(&text) {
            StopScan::Continue(ready) => match self.deliver(&ready) {
                ControlFlow::Continue(()) => None,
                ControlFlow::Break(()) => Some(StopReason::Cancelled),
            },
            StopScan::Matched(before) => match self.deliver(&before) {
                // Both outcomes stop; the match outranks a late cancel.
                ControlFlow::Continue(()) | ControlFlow::Break(()) => {
                    Some(StopReason::StopSequence)
                }
            },
        }
    }

    /// Release held-back text after a natural stop.
    fn flush(&mut self) {
        let tail = self.utf8.finish();
        let rest = match self.stops.push(&tail) {
            StopScan::Continue(ready) => ready + &self.stops.flush(),
            StopScan::Matched(before) => before,
        };
        // Generation is already over, so a Break has nothing left to stop.
        if let ControlFlow::Break(()) = self.deliver(&rest) {
            tracing::trace!("sink asked to stop after the final flush");
        }
    }
}

impl<E: LlamaEngine> Session<E> {
    /// Generate text for `request`, streaming fragments to `sink`.
    ///
    /// On a decode error the loop aborts and the error is returned; fragments
    /// already delivered stay delivered.
    pub fn generate<S>(
        &mut self,
        request: &GenerateRequest,
        sink: &mut S,
    ) -> Result<GenerationSummary>
    where
        S: TokenSink + ?Sized,
    {
        let mut strategy = request.sampling.build();
        self.generate_with(request, strategy.as_mut(), sink)
    }

    /// [`Session::generate`] with a caller-supplied strategy;
    /// `request.sampling` is ignored.
    pub fn generate_with<S>(
        &mut self,
        request: &GenerateRequest,
        strategy: &mut dyn SamplingStrategy,
        sink: &mut S,
    ) -> Result<GenerationSummary>
    where
        S: TokenSink + ?Sized,
    {
        let mut timer = InferenceTimer::new(0, Arc::clone(&self.telemetry));
        let prompt = self.tokenize_and_prefill(&request.prompt_text(), request.add_special)?;
        let prompt_tokens = prompt.len();
        timer.set_prompt_tokens(prompt_tokens);
        timer.mark_prefill_complete();

        let id = self.id;
        let context_length = self.context_length;
        let (engine, model, ctx) = self.split_mut();

        let mut state = GenerationState {
            tokens_generated: 0,
            cursor: prompt_tokens,
        };
        let mut history: Vec<TokenId> = Vec::new();
        let mut batch = Batch::new(1);
        let mut emitter = Emitter {
            sink,
            utf8: DecodingState::new(),
            stops: StopMatcher::new(request.stop.iter().cloned()),
            bytes: 0,
        };

        let stop_reason = loop {
            if state.tokens_generated >= request.max_tokens {
                break StopReason::MaxTokens;
            }
            if request.cancelled() {
                break StopReason::Cancelled;
            }

            let logits = engine
                .logits_ith(ctx, -1)
                .ok_or(SessionError::OutputUnavailable)?;
            let token = strategy.select(logits, &history)?;
            if engine.is_eog(model, token) {
                break StopReason::EndOfGeneration;
            }

            let piece =
                llama_tokenizer::token_to_piece(engine, model, token, request.render_special)?;
            history.push(token);
            state.tokens_generated += 1;
            timer.mark_token();
            tracing::trace!(session = %id, token, position = state.cursor, "token");

            if let Some(reason) = emitter.piece(&piece) {
                break reason;
            }
            if state.tokens_generated >= request.max_tokens {
                break StopReason::MaxTokens;
            }
            if state.cursor >= context_length {
                break StopReason::ContextFull;
            }

            prefill::step(engine, ctx, &mut batch, token, state.cursor)?;
            state.cursor += 1;
        };

        if matches!(
            stop_reason,
            StopReason::EndOfGeneration | StopReason::MaxTokens | StopReason::ContextFull
        ) {
            emitter.flush();
        }

        let metrics = timer.finish();
        tracing::debug!(
            session = %id,
            prompt_tokens,
            tokens_generated = state.tokens_generated,
            ?stop_reason,
            "generation finished"
        );

        Ok(GenerationSummary {
            prompt_tokens,
            tokens_generated: state.tokens_generated,
            stop_reason,
            text_bytes: emitter.bytes,
            metrics,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closures_are_sinks() {
        let mut seen = Vec::new();
        let mut sink = |text: &str| {
            seen.push(text.to_string());
            ControlFlow::Continue(())
        };
        assert_eq!(sink.on_text("a"), ControlFlow::Continue(()));
        drop(sink);
        assert_eq!(seen, vec!["a"]);
    }

    #[test]
    fn channel_sink_breaks_on_disconnect() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut sink = ChannelSink::new(tx);
        assert_eq!(sink.on_text("hi"), ControlFlow::Continue(()));
        assert_eq!(rx.recv().unwrap(), "hi");
        drop(rx);
        assert_eq!(sink.on_text("again"), ControlFlow::Break(()));
    }

    #[test]
    fn request_defaults() {
        let request = GenerateRequest::new("Hello", 5);
        assert_eq!(request.sampling, SamplingConfig::Greedy);
        assert!(request.add_special);
        assert!(request.render_special);
        assert!(!request.cancelled());
        assert_eq!(
            request.with_temperature(0.5).sampling,
            SamplingConfig::Temperature { temperature: 0.5 }
        );
    }

    #[test]
    fn system_prompt_applies_template() {
        let bare = GenerateRequest::new("Hi", 1);
        assert!(matches!(bare.prompt_text(), Cow::Borrowed("Hi")));

        let chat = bare.with_system_prompt("Be brief.");
        assert_eq!(
            chat.prompt_text(),
            "<|system|>\nBe brief.\n<|end|>\n<|user|>\nHi\n<|end|>\n<|assistant|>\n"
        );
    }

    #[test]
    fn cancel_flag_is_observed() {
        let flag = Arc::new(AtomicBool::new(false));
        let request = GenerateRequest::new("x", 1).with_cancel_flag(Arc::clone(&flag));
        assert!(!request.cancelled());
        flag.store(true, Ordering::Release);
        assert!(request.cancelled());
    }

    #[test]
    fn emitter_holds_stop_prefixes_until_flush() {
        let mut out = String::new();
        let mut sink = |text: &str| {
            out.push_str(text);
            ControlFlow::Continue(())
        };
        let mut emitter = Emitter {
            sink: &mut sink,
            utf8: DecodingState::new(),
            stops: StopMatcher::new(["##"]),
            bytes: 0,
        };
        assert_eq!(emitter.piece(b"ab#"), None);
        assert_eq!(emitter.bytes, 2);
        emitter.flush();
        assert_eq!(emitter.bytes, 3);
        drop(emitter);
        assert_eq!(out, "ab#");
    }

    #[test]
    fn stop_match_wins_over_a_breaking_sink() {
        let mut calls = Vec::new();
        let mut sink = |text: &str| {
            calls.push(text.to_string());
            ControlFlow::Break(())
        };
        let mut emitter = Emitter {
            sink: &mut sink,
            utf8: DecodingState::new(),
            stops: StopMatcher::new(["."]),
            bytes: 0,
        };
        assert_eq!(emitter.piece(b"done. more"), Some(StopReason::StopSequence));
        assert_eq!(emitter.bytes, 4);
        drop(emitter);
        assert_eq!(calls, vec!["done"]);
    }
}
