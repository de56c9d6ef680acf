//! # llama-sampling
//!
//! Token selection strategies for llama.rs sessions.
//!
//! Every strategy implements [`SamplingStrategy`] and turns one position's
//! output distribution into one token id:
//! - [`Greedy`]: argmax, lowest index wins ties
//! - [`TemperatureArgmax`]: argmax of the temperature-rescaled logits. The
//!   rescale preserves order, so it always agrees with greedy
//! - [`Sampler`]: seeded stochastic sampling with temperature, top-k, top-p and
//!   repetition penalty
//!
//! [`SamplingConfig`] is the serializable description used by requests and
//! config files.

use llama_engine::TokenId;
use serde::{Deserialize, Serialize};

mod greedy;
mod stochastic;

pub use greedy::{argmax, select_with_temperature, Greedy, TemperatureArgmax};
pub use stochastic::{Sampler, SeededRng};

/// Sampling error type.
#[derive(Debug, Clone, PartialEq)]
pub enum SamplingError {
    InvalidLogits,
    InvalidTemperature,
    NoValidTokens,
}

impl std::fmt::Display for SamplingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SamplingError::InvalidLogits => write!(f, "Invalid logits array"),
            SamplingError::InvalidTemperature => write!(f, "Temperature must be > 0"),
            SamplingError::NoValidTokens => write!(f, "No valid tokens after filtering"),
        }
    }
}

impl std::error::Error for SamplingError {}

pub type SamplingResult<T> = std::result::Result<T, SamplingError>;

/// A token-selection policy applied to one output distribution.
///
/// `history` holds the tokens generated so far in the current request, for
/// strategies that penalize repetition. Stateless strategies ignore it.
pub trait SamplingStrategy: Send {
    fn select(&mut self, logits: &[f32], history: &[TokenId]) -> SamplingResult<TokenId>;
}

impl<S: SamplingStrategy + ?Sized> SamplingStrategy for Box<S> {
    fn select(&mut self, logits: &[f32], history: &[TokenId]) -> SamplingResult<TokenId> {
        (**self).select(logits, history)
    }
}

fn default_temperature() -> f32 {
    0.7
}

fn default_seed() -> u64 {
    42
}

/// Serializable sampling configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum SamplingConfig {
    /// Argmax.
    #[default]
    Greedy,

    /// Temperature rescale followed by argmax.
    Temperature { temperature: f32 },

    /// Seeded random draw from the filtered distribution.
    Stochastic {
        #[serde(default = "default_temperature")]
        temperature: f32,
        #[serde(default)]
        top_k: Option<usize>,
        #[serde(default)]
        top_p: Option<f32>,
        #[serde(default)]
        repetition_penalty: Option<f32>,
        #[serde(default = "default_seed")]
        seed: u64,
    },
}

impl SamplingConfig {
    /// Map a bare temperature: `<= 0` is greedy, anything else is the
    /// deterministic temperature-argmax policy.
    pub fn from_temperature(temperature: f32) -> Self {
        if temperature <= 0.0 {
            SamplingConfig::Greedy
        } else {
            SamplingConfig::Temperature { temperature }
        }
    }

    /// Seeded stochastic sampling at `temperature` with no filtering.
    pub fn stochastic(temperature: f32, seed: u64) -> Self {
        SamplingConfig::Stochastic {
            temperature,
            top_k: None,
            top_p: None,
            repetition_penalty: None,
            seed,
        }
    }

    /// Whether repeated calls over the same distribution always return the
    /// same token.
    pub fn is_deterministic(&self) -> bool {
        !matches!(self, SamplingConfig::Stochastic { .. })
    }

    /// Instantiate the strategy.
    pub fn build(&self) -> Box<dyn SamplingStrategy> {
        match *self {
            SamplingConfig::Greedy => Box::new(Greedy),
            SamplingConfig::Temperature { temperature } => {
                Box::new(TemperatureArgmax::new(temperature))
            }
            SamplingConfig::Stochastic {
                temperature,
                top_k,
                top_p,
                repetition_penalty,
                seed,
            } => {
                let mut sampler = Sampler::new().with_temperature(temperature).with_seed(seed);
                if let Some(k) = top_k {
                    sampler = sampler.with_top_k(k);
                }
                if let Some(p) = top_p {
                    sampler = sampler.with_top_p(p);
                }
                if let Some(penalty) = repetition_penalty {
                    sampler = sampler.with_repetition_penalty(penalty);
                }
                Box::new(sampler)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_temperature_maps_non_positive_to_greedy() {
        assert_eq!(SamplingConfig::from_temperature(0.0), SamplingConfig::Greedy);
        assert_eq!(SamplingConfig::from_temperature(-2.0), SamplingConfig::Greedy);
        assert_eq!(
            SamplingConfig::from_temperature(0.8),
            SamplingConfig::Temperature { temperature: 0.8 }
        );
    }

    #[test]
    fn built_strategies_select_argmax() {
        let logits = [0.1, 3.0, 0.2];
        for config in [
            SamplingConfig::Greedy,
            SamplingConfig::Temperature { temperature: 0.5 },
        ] {
            let mut strategy = config.build();
            assert_eq!(strategy.select(&logits, &[]).unwrap(), 1);
        }
    }

    #[test]
    fn stochastic_build_applies_options() {
        let config = SamplingConfig::Stochastic {
            temperature: 1.0,
            top_k: Some(1),
            top_p: None,
            repetition_penalty: None,
            seed: 7,
        };
        let mut strategy = config.build();
        for _ in 0..20 {
            assert_eq!(strategy.select(&[1.0, 5.0, 2.0], &[]).unwrap(), 1);
        }
    }

    #[test]
    fn determinism_flag() {
        assert!(SamplingConfig::Greedy.is_deterministic());
        assert!(SamplingConfig::from_temperature(1.0).is_deterministic());
        assert!(!SamplingConfig::stochastic(1.0, 1).is_deterministic());
    }

    #[test]
    fn default_is_greedy() {
        assert_eq!(SamplingConfig::default(), SamplingConfig::Greedy);
    }
}
