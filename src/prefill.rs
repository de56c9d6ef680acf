//! Batched prompt prefill.
//!
//! A token sequence of length `L` is fed to the engine in consecutive chunks
//! of at most `batch_capacity` tokens. Every entry carries its absolute
//! position and sequence slot 0. Only the last token of the last chunk asks
//! for output, so exactly one row of logits (or one pooled embedding) is
//! available afterwards. Chunks are submitted strictly in order because the
//! engine's KV cache accumulates across them.

use std::ops::Range;

use llama_engine::{Batch, EngineError, LlamaEngine, Position, SeqId, TokenId};

use crate::error::{DecodeStage, Result, SessionError};

/// The only sequence slot sessions use.
pub const SEQUENCE: SeqId = 0;

/// Chunk boundaries for `len` tokens at `batch_capacity` per chunk.
///
/// Yields `ceil(len / batch_capacity)` ranges; a zero capacity is treated as 1.
pub fn chunk_ranges(len: usize, batch_capacity: usize) -> impl Iterator<Item = Range<usize>> {
    let step = batch_capacity.max(1);
    (0..len)
        .step_by(step)
        .map(move |start| start..(start + step).min(len))
}

/// Clear the cache and decode `tokens` from position 0.
pub(crate) fn run<E: LlamaEngine>(
    engine: &E,
    ctx: &mut E::Context,
    tokens: &[TokenId],
    batch_capacity: usize,
) -> Result<()> {
    engine.kv_cache_clear(ctx);

    let last = tokens.len().saturating_sub(1);
    let mut batch = Batch::new(batch_capacity.max(1));

    for chunk in chunk_ranges(tokens.len(), batch_capacity) {
        batch.clear();
        let start = chunk.start;
        for i in chunk {
            batch
                .add(tokens[i], i as Position, &[SEQUENCE], i == last)
                .map_err(|source| SessionError::Decode {
                    stage: DecodeStage::Prefill,
                    position: i,
                    source,
                })?;
        }

        tracing::debug!(start, len = batch.len(), "prefill chunk");
        engine
            .decode(ctx, &batch)
            .map_err(|source| SessionError::Decode {
                stage: DecodeStage::Prefill,
                position: start,
                source,
            })?;
    }

    Ok(())
}

/// Decode a single generated token at `position`, requesting its output.
pub(crate) fn step<E: LlamaEngine>(
    engine: &E,
    ctx: &mut E::Context,
    batch: &mut Batch,
    token: TokenId,
    position: usize,
) -> Result<()> {
    let decode_err = |source: EngineError| SessionError::Decode {
        stage: DecodeStage::Generate,
        position,
        source,
    };
    batch.clear();
    batch
        .add(token, position as Position, &[SEQUENCE], true)
        .map_err(decode_err)?;
    engine.decode(ctx, batch).map_err(decode_err)
}
