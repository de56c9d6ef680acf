//! Integration tests for llama-tokenizer.
//!
//! Validates:
//! - Buffer protocol against a real engine implementation: short and long text,
//!   the single resize retry, and long control-token pieces
//! - Piece round trip: concatenated pieces reproduce the input bytes
//! - Streaming decode across split multi-byte characters
//! - Stop sequences spanning fragments
//! - Thread safety (concurrent tokenization on one model)

use std::path::Path;
use std::sync::Arc;

use llama_engine::{LlamaEngine, ModelParams, TokenId};
use llama_runtime::{byte_token, MockEngine, MockModel, BOS_TOKEN, EOS_TOKEN};
use llama_tokenizer::*;

fn setup() -> (MockEngine, MockModel) {
    let engine = MockEngine::new();
    let model = engine
        .load_model(Path::new("tok.gguf"), &ModelParams::default())
        .unwrap();
    (engine, model)
}

fn detokenize(engine: &MockEngine, model: &MockModel, tokens: &[TokenId]) -> String {
    let mut state = DecodingState::new();
    let mut text = String::new();
    for &t in tokens {
        let piece = token_to_piece(engine, model, t, false).unwrap();
        text.push_str(&state.push(&piece));
    }
    text.push_str(&state.finish());
    text
}

// ===========================================================================
// Buffer protocol
// ===========================================================================

#[test]
fn short_text_fits_initial_guess() {
    let (engine, model) = setup();
    let tokens = tokenize(&engine, &model, "Hello", true, true).unwrap();
    assert_eq!(tokens.len(), 6);
    assert!(tokens.len() <= token_capacity_hint("Hello".len()));
    assert_eq!(tokens[0], BOS_TOKEN);
}

#[test]
fn long_text_needs_the_retry() {
    let (engine, model) = setup();
    let text = "x".repeat(10_000);
    assert!(token_capacity_hint(text.len()) < text.len());

    let tokens = tokenize(&engine, &model, &text, false, false).unwrap();
    assert_eq!(tokens.len(), 10_000);
    assert!(tokens.iter().all(|&t| t == byte_token(b'x')));
}

#[test]
fn empty_text_without_bos_is_empty() {
    let (engine, model) = setup();
    assert!(tokenize(&engine, &model, "", false, false).unwrap().is_empty());
    assert_eq!(tokenize(&engine, &model, "", true, false).unwrap(), vec![BOS_TOKEN]);
}

#[test]
fn long_control_piece_uses_the_retry() {
    let (engine, model) = setup();
    let piece = token_to_piece(&engine, &model, 300, true).unwrap();
    assert!(piece.len() > PIECE_CAPACITY_HINT);
    assert_eq!(piece, b"<|reserved_special_41|>");
}

#[test]
fn control_tokens_render_only_when_special() {
    let (engine, model) = setup();
    assert_eq!(token_to_piece(&engine, &model, EOS_TOKEN, true).unwrap(), b"</s>");
    assert!(token_to_piece(&engine, &model, EOS_TOKEN, false).unwrap().is_empty());
}

// ===========================================================================
// Round trip
// ===========================================================================

#[test]
fn pieces_reproduce_input() {
    let (engine, model) = setup();
    let inputs = [
        "hello world",
        "  leading and trailing  ",
        "日本語のテキスト",
        "emoji 🦀 and accents: café",
        "tabs\tand\nnewlines",
    ];
    for input in inputs {
        let tokens = tokenize(&engine, &model, input, true, false).unwrap();
        assert_eq!(detokenize(&engine, &model, &tokens), input, "input: {input:?}");
    }
}

#[test]
fn tokenization_is_deterministic() {
    let (engine, model) = setup();
    let a = tokenize(&engine, &model, "same input", true, true).unwrap();
    let b = tokenize(&engine, &model, "same input", true, true).unwrap();
    assert_eq!(a, b);
}

// ===========================================================================
// Streaming
// ===========================================================================

#[test]
fn streaming_never_splits_characters() {
    let (engine, model) = setup();
    let tokens = tokenize(&engine, &model, "a🦀b", false, false).unwrap();
    assert_eq!(tokens.len(), 6);

    let mut state = DecodingState::new();
    let mut fragments = Vec::new();
    for &t in &tokens {
        let piece = token_to_piece(&engine, &model, t, false).unwrap();
        let text = state.push(&piece);
        if !text.is_empty() {
            fragments.push(text);
        }
    }
    assert_eq!(fragments, vec!["a", "🦀", "b"]);
    assert_eq!(state.pending_len(), 0);
}

#[test]
fn truncated_character_is_flushed_lossily() {
    let mut state = DecodingState::new();
    assert_eq!(state.push(&[0xF0, 0x9F]), "");
    assert_eq!(state.finish(), "\u{FFFD}");
    assert_eq!(state.finish(), "");
}

// ===========================================================================
// Stop sequences
// ===========================================================================

#[test]
fn stop_sequence_across_fragments() {
    let mut matcher = StopMatcher::new(["\nUser:"]);
    let mut emitted = String::new();
    for fragment in ["Sure", ".", "\n", "Us", "er", ":", " more"] {
        match matcher.push(fragment) {
            StopScan::Continue(text) => emitted.push_str(&text),
            StopScan::Matched(text) => {
                emitted.push_str(&text);
                break;
            }
        }
    }
    assert_eq!(emitted, "Sure.");
}

#[test]
fn diverging_prefix_is_released() {
    let mut matcher = StopMatcher::new(["END"]);
    assert_eq!(matcher.push("EN"), StopScan::Continue(String::new()));
    assert_eq!(matcher.push("d"), StopScan::Continue("ENd".into()));
    assert_eq!(matcher.push("E"), StopScan::Continue(String::new()));
    assert_eq!(matcher.flush(), "E");
}

// ===========================================================================
// Concurrency
// ===========================================================================

#[test]
fn concurrent_tokenization() {
    let (engine, model) = setup();
    let shared = Arc::new((engine, model));
    let handles: Vec<_> = (0..4)
        .map(|i| {
            let shared = Arc::clone(&shared);
            std::thread::spawn(move || {
                let (engine, model) = &*shared;
                let text = format!("thread {i} says hello");
                let tokens = tokenize(engine, model, &text, true, false).unwrap();
                assert_eq!(detokenize(engine, model, &tokens), text);
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
}
