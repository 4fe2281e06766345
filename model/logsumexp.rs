//! Log-domain marginalization over a small discrete support.
//!
//! A likelihood that is formally a finite sum over an unobserved state,
//! `p(y) = Σ_s p(y, s)`, is evaluated from the per-state joint log-densities
//! `term[s] = ln p(y, s)` as
//!
//! ```text
//! M = max_s term[s] + ln Σ_s exp(term[s] - max_s term[s])
//! ```
//!
//! which stays finite whenever every `term[s]` is finite, even when the raw
//! densities underflow to zero.
//!
//! The per-state log-density is supplied as a callback, so the mismeasurement
//! model (binary true covariate), the normal mixture (component label) and any
//! other finite latent state share this one implementation.
//!
//! # Degenerate marginals
//!
//! When every term is `-∞` the observation is impossible under the current
//! parameters. The marginal is then `-∞` (never `NaN`) and the gradient
//! contribution is zero; the sampler is expected to move away from such points.
//!
//! # Gradients
//!
//! For a parameter `θ`, `∂M/∂θ = Σ_s P(s | y) ∂term[s]/∂θ` with
//! `P(s | y) = exp(term[s] - M)`. [`marginalize_with_gradient`] collects the
//! per-state gradients in a scratch matrix and folds them with these weights.

use crate::density::DensityError;
use crate::posterior::{PosteriorError, StateProbabilities, state_probabilities};
use ndarray::{Array1, Array2, ArrayViewMut1};

/// Numerically stable `ln Σ_i exp(x_i)`.
///
/// Returns `-∞` for an empty slice or when every entry is `-∞`.
pub fn log_sum_exp(terms: &[f64]) -> f64 {
    let max = terms.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY || max == f64::INFINITY {
        return max;
    }
    let scaled: f64 = terms.iter().map(|&t| (t - max).exp()).sum();
    max + scaled.ln()
}

/// Two-term specialization used for binary latent states.
#[inline]
pub fn log_sum_exp2(a: f64, b: f64) -> f64 {
    let max = a.max(b);
    if max == f64::NEG_INFINITY || max == f64::INFINITY {
        return max;
    }
    max + (-(a - b).abs()).exp().ln_1p()
}

/// Per-state joint log-densities of one observation together with their marginal.
#[derive(Debug, Clone, PartialEq)]
pub struct MarginalTerms {
    terms: Vec<f64>,
    marginal: f64,
}

impl MarginalTerms {
    pub fn from_terms(terms: Vec<f64>) -> Self {
        let marginal = if terms.len() == 2 {
            log_sum_exp2(terms[0], terms[1])
        } else {
            log_sum_exp(&terms)
        };
        Self { terms, marginal }
    }

    #[inline]
    pub fn terms(&self) -> &[f64] {
        &self.terms
    }

    #[inline]
    pub fn marginal(&self) -> f64 {
        self.marginal
    }

    #[inline]
    pub fn support(&self) -> usize {
        self.terms.len()
    }

    /// True when every state is impossible under the current parameters.
    #[inline]
    pub fn is_degenerate(&self) -> bool {
        self.marginal == f64::NEG_INFINITY
    }

    pub fn state_probabilities(&self) -> Result<StateProbabilities, PosteriorError> {
        state_probabilities(&self.terms, self.marginal)
    }
}

fn checked_term(state: usize, term: f64) -> Result<f64, DensityError> {
    if term.is_nan() || term == f64::INFINITY {
        return Err(DensityError::UndefinedTerm { state, value: term });
    }
    Ok(term)
}

/// Sums a joint density over the states `0..support` in the log domain.
pub fn marginalize<F, E>(support: usize, mut per_state: F) -> Result<MarginalTerms, E>
where
    F: FnMut(usize) -> Result<f64, E>,
    E: From<DensityError>,
{
    if support == 0 {
        return Err(DensityError::EmptySupport.into());
    }
    let mut terms = Vec::with_capacity(support);
    for state in 0..support {
        let term = per_state(state)?;
        terms.push(checked_term(state, term)?);
    }
    let marginal = MarginalTerms::from_terms(terms);
    if marginal.is_degenerate() {
        log::trace!("All {support} latent states have zero density; marginal is -inf");
    }
    Ok(marginal)
}

/// Like [`marginalize`], additionally accumulating `∂M/∂θ` into `gradient`.
///
/// The callback receives a zeroed gradient buffer for its state and must add
/// `∂term[s]/∂θ` into it. Degenerate marginals leave `gradient` untouched.
pub fn marginalize_with_gradient<F, E>(
    support: usize,
    gradient: &mut Array1<f64>,
    mut per_state: F,
) -> Result<MarginalTerms, E>
where
    F: FnMut(usize, ArrayViewMut1<'_, f64>) -> Result<f64, E>,
    E: From<DensityError>,
{
    if support == 0 {
        return Err(DensityError::EmptySupport.into());
    }
    let mut state_gradients = Array2::<f64>::zeros((support, gradient.len()));
    let mut terms = Vec::with_capacity(support);
    for state in 0..support {
        let term = per_state(state, state_gradients.row_mut(state))?;
        terms.push(checked_term(state, term)?);
    }
    let marginal = MarginalTerms::from_terms(terms);
    if marginal.is_degenerate() {
        log::trace!("All {support} latent states have zero density; gradient contribution dropped");
        return Ok(marginal);
    }
    for (state, &term) in marginal.terms().iter().enumerate() {
        let weight = (term - marginal.marginal()).exp();
        if weight > 0.0 {
            gradient.scaled_add(weight, &state_gradients.row(state));
        }
    }
    Ok(marginal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn matches_naive_sum_for_moderate_terms() {
        let terms = [-1.0, -2.0, -0.5, -3.25];
        let naive = terms.iter().map(|t: &f64| t.exp()).sum::<f64>().ln();
        assert_relative_eq!(log_sum_exp(&terms), naive, epsilon = 1e-14);
    }

    #[test]
    fn survives_underflow_and_overflow() {
        let low = [-1000.0, -1001.0];
        let expected = -1000.0 + (1.0 + (-1.0f64).exp()).ln();
        assert_relative_eq!(log_sum_exp(&low), expected, epsilon = 1e-12);
        let high = [1000.0, 1000.0];
        assert_relative_eq!(log_sum_exp(&high), 1000.0 + 2.0f64.ln(), epsilon = 1e-12);
    }

    #[test]
    fn all_negative_infinity_is_negative_infinity() {
        let terms = [f64::NEG_INFINITY; 3];
        let value = log_sum_exp(&terms);
        assert_eq!(value, f64::NEG_INFINITY);
        assert_eq!(log_sum_exp2(f64::NEG_INFINITY, f64::NEG_INFINITY), f64::NEG_INFINITY);
        assert_eq!(log_sum_exp(&[]), f64::NEG_INFINITY);
    }

    #[test]
    fn one_impossible_state_is_ignored() {
        assert_relative_eq!(log_sum_exp2(f64::NEG_INFINITY, -3.0), -3.0);
        assert_relative_eq!(log_sum_exp(&[-3.0, f64::NEG_INFINITY, -3.0]), -3.0 + 2.0f64.ln());
    }

    #[test]
    fn pairwise_specialization_agrees() {
        for &(a, b) in &[(0.0, 0.0), (-5.0, 3.0), (700.0, -700.0), (-1e-3, -2e-3)] {
            assert_relative_eq!(log_sum_exp2(a, b), log_sum_exp(&[a, b]), epsilon = 1e-12);
        }
    }

    #[test]
    fn marginalize_rejects_nan_terms_and_empty_support() {
        let err = marginalize::<_, DensityError>(2, |s| Ok(if s == 0 { 0.0 } else { f64::NAN }))
            .unwrap_err();
        assert!(matches!(err, DensityError::UndefinedTerm { state: 1, .. }));
        let err = marginalize::<_, DensityError>(0, |_| Ok(0.0)).unwrap_err();
        assert_eq!(err, DensityError::EmptySupport);
    }

    #[test]
    fn marginalize_propagates_callback_errors() {
        let err = marginalize::<_, DensityError>(3, |s| {
            crate::density::bernoulli_ln_pmf(1, if s == 2 { 1.5 } else { 0.5 })
        })
        .unwrap_err();
        assert!(matches!(err, DensityError::InvalidParameter { .. }));
    }

    #[test]
    fn gradient_is_probability_weighted() {
        // term[s] = θ * s  ⇒  ∂M/∂θ = E[s]
        let theta = 0.7;
        let mut gradient = Array1::zeros(1);
        let terms = marginalize_with_gradient::<_, DensityError>(3, &mut gradient, |s, mut g| {
            g[0] += s as f64;
            Ok(theta * s as f64)
        })
        .unwrap();
        let probs = terms.state_probabilities().unwrap();
        let expected: f64 = probs.iter().enumerate().map(|(s, p)| s as f64 * p).sum();
        assert_relative_eq!(gradient[0], expected, epsilon = 1e-14);
    }

    #[test]
    fn degenerate_marginal_leaves_gradient_untouched() {
        let mut gradient = Array1::from_vec(vec![1.5]);
        let terms = marginalize_with_gradient::<_, DensityError>(2, &mut gradient, |_, mut g| {
            g[0] += 10.0;
            Ok(f64::NEG_INFINITY)
        })
        .unwrap();
        assert!(terms.is_degenerate());
        assert_eq!(gradient[0], 1.5);
    }
}
