//! Embedding extraction.
//!
//! Prefill the text and read the pooled embedding of the final position. A
//! model that produces no pooled embedding gets a degraded substitute: the
//! first `min(n_vocab, 384)` logits of the final position. The two are
//! tagged so callers can tell them apart; they are not comparable.

use std::time::Instant;

use llama_engine::{LlamaEngine, TokenId};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SessionError};
use crate::session::Session;

/// Width of a fallback embedding, before clamping to the vocabulary size.
pub const FALLBACK_DIM: usize = 384;

/// An embedding vector and where it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "values", rename_all = "snake_case")]
pub enum Embedding {
    /// The model's pooled embedding; width is the model's embedding size.
    Pooled(Vec<f32>),
    /// Truncated logits standing in for a missing pooled embedding.
    Fallback(Vec<f32>),
}

impl Embedding {
    pub fn values(&self) -> &[f32] {
        match self {
            Embedding::Pooled(v) | Embedding::Fallback(v) => v,
        }
    }

    pub fn into_values(self) -> Vec<f32> {
        match self {
            Embedding::Pooled(v) | Embedding::Fallback(v) => v,
        }
    }

    pub fn dimension(&self) -> usize {
        self.values().len()
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Embedding::Fallback(_))
    }

    /// L2-normalized copy. A zero vector is returned unchanged.
    pub fn normalized(&self) -> Embedding {
        let norm = self.values().iter().map(|v| v * v).sum::<f32>().sqrt();
        let scale = |v: &[f32]| -> Vec<f32> {
            if norm > 0.0 {
                v.iter().map(|x| x / norm).collect()
            } else {
                v.to_vec()
            }
        };
        match self {
            Embedding::Pooled(v) => Embedding::Pooled(scale(v)),
            Embedding::Fallback(v) => Embedding::Fallback(scale(v)),
        }
    }
}

/// Embeddings of several inputs, in input order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbeddingBatch {
    pub embeddings: Vec<Embedding>,
    /// Width shared by every vector in `embeddings`.
    pub dimension: usize,
    pub duration_ms: f64,
}

impl<E: LlamaEngine> Session<E> {
    /// Embed `text`.
    ///
    /// The KV cache is cleared first; each call starts a fresh sequence.
    pub fn embed(&mut self, text: &str) -> Result<Embedding> {
        let tokens = self.tokenize(text, true)?;
        self.embed_tokens(&tokens)
    }

    /// Embed each of `texts` as its own sequence.
    ///
    /// An input that tokenizes to nothing gets a zero vector with the width
    /// and kind of the other results (the model's embedding size when every
    /// input is empty). The first failing input aborts the whole batch.
    pub fn embed_batch<S: AsRef<str>>(&mut self, texts: &[S]) -> Result<EmbeddingBatch> {
        let started = Instant::now();
        let mut slots = Vec::with_capacity(texts.len());
        for text in texts {
            let tokens = self.tokenize(text.as_ref(), true)?;
            if tokens.is_empty() {
                slots.push(None);
            } else {
                slots.push(Some(self.embed_tokens(&tokens)?));
            }
        }

        let blank = match slots.iter().flatten().next() {
            Some(Embedding::Fallback(v)) => Embedding::Fallback(vec![0.0; v.len()]),
            Some(Embedding::Pooled(v)) => Embedding::Pooled(vec![0.0; v.len()]),
            None => Embedding::Pooled(vec![0.0; self.n_embd()]),
        };
        let dimension = blank.dimension();
        let embeddings: Vec<Embedding> = slots
            .into_iter()
            .map(|slot| slot.unwrap_or_else(|| blank.clone()))
            .collect();

        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        tracing::debug!(
            session = %self.id,
            inputs = embeddings.len(),
            dimension,
            duration_ms,
            "embedded batch"
        );
        Ok(EmbeddingBatch {
            embeddings,
            dimension,
            duration_ms,
        })
    }

    fn embed_tokens(&mut self, tokens: &[TokenId]) -> Result<Embedding> {
        self.prefill(tokens)?;
        let engine = self.engine();

        if let Some(pooled) = engine
            .embeddings_ith(self.context(), -1)
            .filter(|v| !v.is_empty())
        {
            tracing::debug!(
                session = %self.id,
                tokens = tokens.len(),
                dim = pooled.len(),
                "pooled embedding"
            );
            return Ok(Embedding::Pooled(pooled.to_vec()));
        }

        let logits = engine
            .logits_ith(self.context(), -1)
            .ok_or(SessionError::OutputUnavailable)?;
        let dim = engine.n_vocab(self.model()).min(FALLBACK_DIM).min(logits.len());
        tracing::warn!(
            session = %self.id,
            dim,
            "model has no pooled embedding, returning truncated logits"
        );
        Ok(Embedding::Fallback(logits[..dim].to_vec()))
    }
}
