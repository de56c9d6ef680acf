//! Deterministic strategies.

use llama_engine::TokenId;

use crate::{SamplingError, SamplingResult, SamplingStrategy};

/// Index of the largest value. Ties go to the lowest index; NaN never wins.
///
/// Returns `None` for an empty slice.
pub fn argmax(values: &[f32]) -> Option<usize> {
    let first = values.first()?;
    let mut best = 0;
    let mut best_value = *first;
    for (i, &v) in values.iter().enumerate().skip(1) {
        if v > best_value || (best_value.is_nan() && !v.is_nan()) {
            best = i;
            best_value = v;
        }
    }
    Some(best)
}

/// Select a token from `logits` at `temperature`.
///
/// The rescaled distribution is `logits / temperature`, but dividing by a
/// positive constant preserves order, so every temperature selects the raw
/// argmax. The division itself is skipped: it can overflow to infinity and
/// turn the true maximum into a tie with a smaller logit.
pub fn select_with_temperature(logits: &[f32], _temperature: f32) -> SamplingResult<TokenId> {
    if logits.is_empty() {
        return Err(SamplingError::InvalidLogits);
    }

    argmax(logits)
        .map(|i| i as TokenId)
        .ok_or(SamplingError::InvalidLogits)
}

/// Greedy argmax selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Greedy;

impl SamplingStrategy for Greedy {
    fn select(&mut self, logits: &[f32], _history: &[TokenId]) -> SamplingResult<TokenId> {
        select_with_temperature(logits, 0.0)
    }
}

/// Temperature rescale followed by argmax.
///
/// This is not a random draw: use [`crate::Sampler`] for stochastic output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemperatureArgmax {
    pub temperature: f32,
}

impl TemperatureArgmax {
    pub fn new(temperature: f32) -> Self {
        Self { temperature }
    }
}

impl SamplingStrategy for TemperatureArgmax {
    fn select(&mut self, logits: &[f32], _history: &[TokenId]) -> SamplingResult<TokenId> {
        select_with_temperature(logits, self.temperature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argmax_first_occurrence_wins() {
        assert_eq!(argmax(&[1.0, 3.0, 3.0, 2.0]), Some(1));
        assert_eq!(argmax(&[5.0, 5.0]), Some(0));
    }

    #[test]
    fn argmax_empty() {
        assert_eq!(argmax(&[]), None);
    }

    #[test]
    fn argmax_skips_nan() {
        assert_eq!(argmax(&[f32::NAN, 1.0, 0.5]), Some(1));
        assert_eq!(argmax(&[0.5, f32::NAN, 2.0]), Some(2));
    }

    #[test]
    fn argmax_negative_infinity() {
        assert_eq!(argmax(&[f32::NEG_INFINITY, f32::NEG_INFINITY, -1.0]), Some(2));
    }

    #[test]
    fn greedy_matches_temperature_path() {
        let logits = [0.3, -1.0, 2.5, 2.4];
        let mut greedy = Greedy;
        let mut warm = TemperatureArgmax::new(1.7);
        assert_eq!(greedy.select(&logits, &[]).unwrap(), 2);
        assert_eq!(warm.select(&logits, &[]).unwrap(), 2);
    }

    #[test]
    fn extreme_temperatures_agree_with_greedy() {
        let tiny = [1.0, 2.0];
        assert_eq!(Greedy.select(&tiny, &[]).unwrap(), 1);
        assert_eq!(TemperatureArgmax::new(1e-39).select(&tiny, &[]).unwrap(), 1);

        let huge = [1e37, 3e37];
        assert_eq!(Greedy.select(&huge, &[]).unwrap(), 1);
        assert_eq!(TemperatureArgmax::new(0.01).select(&huge, &[]).unwrap(), 1);

        let negative = [-3e38, -1e38];
        assert_eq!(TemperatureArgmax::new(1e-3).select(&negative, &[]).unwrap(), 1);
    }

    #[test]
    fn empty_logits_rejected() {
        assert_eq!(Greedy.select(&[], &[]), Err(SamplingError::InvalidLogits));
        assert_eq!(
            select_with_temperature(&[], 0.5),
            Err(SamplingError::InvalidLogits)
        );
    }
}
