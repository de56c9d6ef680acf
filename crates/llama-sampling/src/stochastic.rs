//! Seeded stochastic sampling.
//!
//! Logits are turned into a candidate list and pushed through a fixed chain:
//! repetition penalty, temperature, top-k, softmax, top-p, then one draw from
//! the surviving distribution.

use std::cmp::Ordering;

use llama_engine::TokenId;

use crate::{SamplingError, SamplingResult, SamplingStrategy};

/// Below this temperature the draw is replaced by argmax.
const ARGMAX_TEMPERATURE: f32 = 1e-3;

/// xorshift64 generator; the same seed always yields the same stream.
#[derive(Debug, Clone)]
pub struct SeededRng {
    state: u64,
}

impl SeededRng {
    pub fn new(seed: u64) -> Self {
        // Zero is a fixed point of xorshift.
        Self {
            state: seed.max(1),
        }
    }

    fn next_u64(&mut self) -> u64 {
        self.state ^= self.state << 13;
        self.state ^= self.state >> 7;
        self.state ^= self.state << 17;
        self.state
    }

    /// Uniform in `[0, 1)`.
    pub fn next_f32(&mut self) -> f32 {
        (self.next_u64() >> 40) as f32 / (1u64 << 24) as f32
    }
}

/// One vocabulary entry still in play.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    index: usize,
    logit: f32,
    p: f32,
}

/// Candidates ordered by descending logit; equal logits keep ascending index.
#[derive(Debug)]
struct Candidates(Vec<Candidate>);

impl Candidates {
    fn from_logits(logits: &[f32]) -> Self {
        Self(
            logits
                .iter()
                .enumerate()
                .map(|(index, &logit)| Candidate {
                    index,
                    logit,
                    p: 0.0,
                })
                .collect(),
        )
    }

    fn penalize(&mut self, history: &[usize], penalty: f32) {
        let mut seen = history.to_vec();
        seen.sort_unstable();
        seen.dedup();
        for &index in &seen {
            if let Some(c) = self.0.get_mut(index) {
                // Shrink towards zero from above, push away from zero below.
                c.logit = if c.logit > 0.0 {
                    c.logit / penalty
                } else {
                    c.logit * penalty
                };
            }
        }
    }

    fn scale(&mut self, temperature: f32) {
        for c in &mut self.0 {
            c.logit /= temperature;
        }
    }

    fn sort(&mut self) {
        self.0
            .sort_by(|a, b| b.logit.partial_cmp(&a.logit).unwrap_or(Ordering::Equal));
    }

    fn truncate(&mut self, k: usize) {
        if k > 0 {
            self.0.truncate(k);
        }
    }

    /// Fill `p` with the softmax over the remaining logits.
    fn softmax(&mut self) {
        let Some(max) = self.0.first().map(|c| c.logit) else {
            return;
        };
        let mut total = 0.0;
        for c in &mut self.0 {
            c.p = (c.logit - max).exp();
            total += c.p;
        }
        if total > 0.0 && total.is_finite() {
            for c in &mut self.0 {
                c.p /= total;
            }
        } else {
            let uniform = 1.0 / self.0.len() as f32;
            for c in &mut self.0 {
                c.p = uniform;
            }
        }
    }

    /// Keep the shortest head whose mass reaches `top_p`, then renormalize.
    fn nucleus(&mut self, top_p: f32) {
        let mut mass = 0.0;
        let mut keep = self.0.len();
        for (i, c) in self.0.iter().enumerate() {
            mass += c.p;
            if mass >= top_p {
                keep = i + 1;
                break;
            }
        }
        self.0.truncate(keep);
        let total: f32 = self.0.iter().map(|c| c.p).sum();
        if total > 0.0 {
            for c in &mut self.0 {
                c.p /= total;
            }
        }
    }

    fn draw(&self, r: f32) -> Option<usize> {
        let mut mass = 0.0;
        for c in &self.0 {
            mass += c.p;
            if r < mass {
                return Some(c.index);
            }
        }
        // Rounding left `r` past the total.
        self.0.iter().rev().find(|c| c.p > 0.0).map(|c| c.index)
    }
}

/// Stochastic sampler: repetition penalty, temperature, top-k and top-p
/// followed by a seeded categorical draw.
#[derive(Debug, Clone)]
pub struct Sampler {
    /// Softmax temperature. Above 1 flattens the distribution, below 1 sharpens it.
    pub temperature: f32,

    /// Keep only the `k` highest logits. 0 disables.
    pub top_k: Option<usize>,

    /// Keep the smallest set of tokens whose probability mass reaches `p`.
    pub top_p: Option<f32>,

    /// Divisor applied to the logits of tokens already in the history.
    pub repetition_penalty: Option<f32>,

    rng: SeededRng,
}

impl Sampler {
    pub fn new() -> Self {
        Self {
            temperature: 1.0,
            top_k: None,
            top_p: None,
            repetition_penalty: None,
            rng: SeededRng::new(42),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_top_k(mut self, k: usize) -> Self {
        self.top_k = Some(k);
        self
    }

    pub fn with_top_p(mut self, p: f32) -> Self {
        self.top_p = Some(p);
        self
    }

    pub fn with_repetition_penalty(mut self, penalty: f32) -> Self {
        self.repetition_penalty = Some(penalty);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = SeededRng::new(seed);
        self
    }

    /// Draw a vocabulary index from `logits`.
    pub fn sample(&mut self, logits: &[f32]) -> SamplingResult<usize> {
        self.sample_with_history(logits, &[])
    }

    /// Like [`Sampler::sample`], penalizing indices in `history`.
    pub fn sample_with_history(
        &mut self,
        logits: &[f32],
        history: &[usize],
    ) -> SamplingResult<usize> {
        if logits.is_empty() {
            return Err(SamplingError::InvalidLogits);
        }
        if self.temperature.is_nan() || self.temperature <= 0.0 {
            return Err(SamplingError::InvalidTemperature);
        }

        let mut candidates = Candidates::from_logits(logits);
        if let Some(penalty) = self.repetition_penalty {
            candidates.penalize(history, penalty);
        }
        candidates.sort();

        if self.temperature < ARGMAX_TEMPERATURE {
            return candidates
                .0
                .first()
                .map(|c| c.index)
                .ok_or(SamplingError::NoValidTokens);
        }

        candidates.scale(self.temperature);
        if let Some(k) = self.top_k {
            candidates.truncate(k);
        }
        candidates.softmax();
        if let Some(p) = self.top_p {
            candidates.nucleus(p);
        }

        let r = self.rng.next_f32();
        candidates.draw(r).ok_or(SamplingError::NoValidTokens)
    }
}

impl Default for Sampler {
    fn default() -> Self {
        Self::new()
    }
}

impl SamplingStrategy for Sampler {
    fn select(&mut self, logits: &[f32], history: &[TokenId]) -> SamplingResult<TokenId> {
        let history: Vec<usize> = history
            .iter()
            .filter_map(|&t| usize::try_from(t).ok())
            .collect();
        let index = self.sample_with_history(logits, &history)?;
        TokenId::try_from(index).map_err(|_| SamplingError::InvalidLogits)
    }
}
