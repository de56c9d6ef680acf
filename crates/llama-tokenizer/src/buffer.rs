//! Retry-on-resize buffer protocol.
//!
//! The engine fills a caller-provided buffer and returns how many elements it
//! wrote. When the buffer is too small it writes nothing and returns the
//! negated required size. We start from a small guess, and on a negative
//! answer reallocate to exactly the required size and try once more. A second
//! negative answer is an error.

use llama_engine::{LlamaEngine, TokenId};

use crate::{TokenizerError, TokenizerResult};

/// Initial byte capacity for a single token piece.
pub const PIECE_CAPACITY_HINT: usize = 16;

/// Initial token capacity for `text_len` bytes of input.
///
/// Subword vocabularies average several bytes per token, so this undershoots
/// only for unusual input, which costs one retry.
pub fn token_capacity_hint(text_len: usize) -> usize {
    text_len / 3 + 8
}

/// Run `fill` against a buffer of `initial` elements, growing it once if the
/// callee reports a larger requirement.
pub fn fill_with_retry<T, F>(initial: usize, mut fill: F) -> TokenizerResult<Vec<T>>
where
    T: Copy + Default,
    F: FnMut(&mut [T]) -> i32,
{
    let mut buf = vec![T::default(); initial];
    let n = fill(&mut buf);
    if n >= 0 {
        return truncate_to(buf, n);
    }

    let required = n.unsigned_abs() as usize;
    tracing::trace!(initial, required, "buffer too small, retrying");
    buf.clear();
    buf.resize(required, T::default());

    let n = fill(&mut buf);
    if n < 0 {
        return Err(TokenizerError::BufferExhausted {
            requested: required,
            required: n.unsigned_abs() as usize,
        });
    }
    truncate_to(buf, n)
}

fn truncate_to<T>(mut buf: Vec<T>, n: i32) -> TokenizerResult<Vec<T>> {
    let count = n as usize;
    if count > buf.len() {
        return Err(TokenizerError::InvalidCount {
            count,
            capacity: buf.len(),
        });
    }
    buf.truncate(count);
    Ok(buf)
}

/// Tokenize `text` against the model's vocabulary.
pub fn tokenize<E: LlamaEngine>(
    engine: &E,
    model: &E::Model,
    text: &str,
    add_special: bool,
    parse_special: bool,
) -> TokenizerResult<Vec<TokenId>> {
    fill_with_retry(token_capacity_hint(text.len()), |buf| {
        engine.tokenize(model, text, buf, add_special, parse_special)
    })
}

/// Render one token to its raw bytes.
pub fn token_to_piece<E: LlamaEngine>(
    engine: &E,
    model: &E::Model,
    token: TokenId,
    special: bool,
) -> TokenizerResult<Vec<u8>> {
    fill_with_retry(PIECE_CAPACITY_HINT, |buf| {
        engine.token_to_piece(model, token, buf, special)
    })
}
