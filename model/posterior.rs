use serde::{Deserialize, Serialize};
use std::ops::Deref;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PosteriorError {
    #[error("cannot recover state probabilities from an empty term vector")]
    EmptyTerms,
    #[error("every latent state has zero density; conditional probabilities are undefined")]
    DegenerateMarginal,
    #[error("marginal log-likelihood must not be NaN or +inf (got {0})")]
    InvalidMarginal(f64),
}

/// Conditional distribution of a latent state given one observation and one draw.
#[repr(transparent)]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateProbabilities(pub Vec<f64>);

impl StateProbabilities {
    /// Rebuilds the marginal log-likelihood as `ln Σ_s P(s) e^M`.
    pub fn reconstruct_marginal(&self, marginal: f64) -> f64 {
        let total: f64 = self.0.iter().sum();
        total.ln() + marginal
    }
}

impl Deref for StateProbabilities {
    type Target = [f64];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// `P(state = s | data) = exp(term[s] - M)`, clamped into `[0, 1]`.
///
/// This is a reporting quantity: call it once per posterior draw rather than
/// inside the log-density used for sampling.
pub fn state_probabilities(terms: &[f64], marginal: f64) -> Result<StateProbabilities, PosteriorError> {
    if terms.is_empty() {
        return Err(PosteriorError::EmptyTerms);
    }
    if marginal == f64::NEG_INFINITY {
        return Err(PosteriorError::DegenerateMarginal);
    }
    if !marginal.is_finite() {
        return Err(PosteriorError::InvalidMarginal(marginal));
    }
    Ok(StateProbabilities(
        terms
            .iter()
            .map(|&term| (term - marginal).exp().clamp(0.0, 1.0))
            .collect(),
    ))
}
