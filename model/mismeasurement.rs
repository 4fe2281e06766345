//! Logistic outcome model with a misclassified binary exposure.
//!
//! Each subject has an outcome `y`, an observed (possibly misclassified)
//! exposure `x*`, further covariates `z`, and, for a validation subset only,
//! the true exposure `x`. The joint density of one subject given `x = s` is
//!
//! ```text
//! p(y | s, z) · p(x* | s) · p(s)
//!   = Bern(y | σ(β₀ + β_x s + z·γ)) · Bern(x* | s ? sens : 1 - spec) · Bern(s | ψ)
//! ```
//!
//! Validated subjects contribute this joint term at their known `x`; everyone
//! else contributes its log-sum-exp over `s ∈ {0, 1}`. Misclassification is
//! non-differential: `p(x* | x)` does not depend on `y` or `z`.

use crate::density::{
    DensityError, bernoulli_ln_pmf, bernoulli_logit_ln_pmf, check_finite, check_probability,
    stable_sigmoid,
};
use crate::draws::{DrawsError, PosteriorDraws, column_means, stack_rows};
use crate::logsumexp::{MarginalTerms, marginalize, marginalize_with_gradient};
use crate::posterior::PosteriorError;
use crate::prior::Prior;
use crate::target::LogDensity;
use crate::transform::{Transform, apply_prior};
use ndarray::{Array1, Array2, ArrayView1, ArrayViewMut1, s};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// The true exposure is binary.
pub const EXPOSURE_STATES: usize = 2;

#[derive(Debug, Error)]
pub enum MismeasurementError {
    #[error("density error: {0}")]
    Density(#[from] DensityError),
    #[error("posterior recovery failed: {0}")]
    Posterior(#[from] PosteriorError),
    #[error("draws error: {0}")]
    Draws(#[from] DrawsError),
    #[error("dataset has no observations")]
    Empty,
    #[error("data columns must all have the same number of rows")]
    DimensionMismatch,
    #[error("observation {index}: {column} must be 0 or 1 (got {value})")]
    InvalidFlag {
        index: usize,
        column: &'static str,
        value: u8,
    },
    #[error("observation {index}: covariate values must be finite")]
    NonFiniteCovariate { index: usize },
    #[error("expected {expected} covariate effects, found {found}")]
    CovariateCountMismatch { expected: usize, found: usize },
    #[error("parameter vector has length {found}, expected {expected}")]
    ParameterLength { expected: usize, found: usize },
    #[error("observation index {index} is out of range for {len} observations")]
    IndexOutOfRange { index: usize, len: usize },
}

/// Column-oriented subject data. `true_exposure` is `Some` for validated subjects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MismeasurementData {
    pub outcome: Array1<u8>,
    pub observed_exposure: Array1<u8>,
    pub true_exposure: Vec<Option<u8>>,
    pub covariates: Array2<f64>,
}

impl MismeasurementData {
    pub fn validate(&self) -> Result<(), MismeasurementError> {
        let n = self.outcome.len();
        if n == 0 {
            return Err(MismeasurementError::Empty);
        }
        if self.observed_exposure.len() != n
            || self.true_exposure.len() != n
            || self.covariates.nrows() != n
        {
            return Err(MismeasurementError::DimensionMismatch);
        }
        for i in 0..n {
            let flags = [
                ("outcome", Some(self.outcome[i])),
                ("observed_exposure", Some(self.observed_exposure[i])),
                ("true_exposure", self.true_exposure[i]),
            ];
            for (column, flag) in flags {
                if let Some(value) = flag {
                    if value > 1 {
                        return Err(MismeasurementError::InvalidFlag {
                            index: i,
                            column,
                            value,
                        });
                    }
                }
            }
            if self.covariates.row(i).iter().any(|v| !v.is_finite()) {
                return Err(MismeasurementError::NonFiniteCovariate { index: i });
            }
        }
        Ok(())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.outcome.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.outcome.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MismeasurementPriors {
    /// Shared by the intercept, the exposure effect and the covariate effects.
    pub coefficient: Prior,
    pub sensitivity: Prior,
    pub specificity: Prior,
    pub prevalence: Prior,
}

impl Default for MismeasurementPriors {
    fn default() -> Self {
        Self {
            coefficient: Prior::Normal { mean: 0.0, sd: 2.5 },
            sensitivity: Prior::Beta { alpha: 1.0, beta: 1.0 },
            specificity: Prior::Beta { alpha: 1.0, beta: 1.0 },
            prevalence: Prior::Beta { alpha: 1.0, beta: 1.0 },
        }
    }
}

impl MismeasurementPriors {
    pub fn validate(&self) -> Result<(), DensityError> {
        self.coefficient.validate()?;
        self.sensitivity.validate()?;
        self.specificity.validate()?;
        self.prevalence.validate()
    }
}

/// Parameters on their natural (constrained) scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MismeasurementParams {
    pub intercept: f64,
    pub exposure_effect: f64,
    pub covariate_effects: Array1<f64>,
    /// `P(x* = 1 | x = 1)`.
    pub sensitivity: f64,
    /// `P(x* = 0 | x = 0)`.
    pub specificity: f64,
    /// `P(x = 1)`.
    pub prevalence: f64,
}

impl MismeasurementParams {
    pub fn validate(&self, num_covariates: usize) -> Result<(), MismeasurementError> {
        if self.covariate_effects.len() != num_covariates {
            return Err(MismeasurementError::CovariateCountMismatch {
                expected: num_covariates,
                found: self.covariate_effects.len(),
            });
        }
        check_finite("intercept", self.intercept)?;
        check_finite("exposure_effect", self.exposure_effect)?;
        for &value in self.covariate_effects.iter() {
            check_finite("covariate_effect", value)?;
        }
        check_probability("sensitivity", self.sensitivity)?;
        check_probability("specificity", self.specificity)?;
        check_probability("prevalence", self.prevalence)?;
        Ok(())
    }

    /// `P(x* = 1 | x = state)`.
    #[inline]
    pub fn observed_probability(&self, state: usize) -> f64 {
        if state == 1 {
            self.sensitivity
        } else {
            1.0 - self.specificity
        }
    }

    #[inline]
    pub fn linear_predictor(&self, state: usize, covariates: ArrayView1<'_, f64>) -> f64 {
        self.intercept + self.exposure_effect * state as f64 + covariates.dot(&self.covariate_effects)
    }
}

/// Evaluator over a fixed dataset; cloning shares the data.
#[derive(Debug, Clone)]
pub struct MismeasurementModel {
    data: Arc<MismeasurementData>,
    complete: Arc<Vec<usize>>,
    reduced: Arc<Vec<usize>>,
    priors: MismeasurementPriors,
}

impl MismeasurementModel {
    pub fn new(
        data: MismeasurementData,
        priors: MismeasurementPriors,
    ) -> Result<Self, MismeasurementError> {
        data.validate()?;
        priors.validate()?;
        let (complete, reduced): (Vec<usize>, Vec<usize>) =
            (0..data.len()).partition(|&i| data.true_exposure[i].is_some());
        log::debug!(
            "Mismeasurement model: {} validated and {} marginalized observations, {} covariates",
            complete.len(),
            reduced.len(),
            data.covariates.ncols()
        );
        if complete.is_empty() {
            log::warn!(
                "No observation has a validated exposure; sensitivity and specificity are informed only by their priors."
            );
        }
        Ok(Self {
            data: Arc::new(data),
            complete: Arc::new(complete),
            reduced: Arc::new(reduced),
            priors,
        })
    }

    pub fn data(&self) -> &MismeasurementData {
        &self.data
    }

    pub fn priors(&self) -> &MismeasurementPriors {
        &self.priors
    }

    pub fn complete_indices(&self) -> &[usize] {
        &self.complete
    }

    /// Observations whose exposure is summed out, in the order used by
    /// [`Self::exposure_probabilities`].
    pub fn reduced_indices(&self) -> &[usize] {
        &self.reduced
    }

    #[inline]
    pub fn num_covariates(&self) -> usize {
        self.data.covariates.ncols()
    }

    fn check_index(&self, index: usize) -> Result<(), MismeasurementError> {
        if index >= self.data.len() {
            return Err(MismeasurementError::IndexOutOfRange {
                index,
                len: self.data.len(),
            });
        }
        Ok(())
    }

    /// `ln p(y, x* , x = state)` for one subject.
    pub fn state_log_density(
        &self,
        params: &MismeasurementParams,
        index: usize,
        state: usize,
    ) -> Result<f64, MismeasurementError> {
        params.validate(self.num_covariates())?;
        self.check_index(index)?;
        if state >= EXPOSURE_STATES {
            return Err(DensityError::StateOutOfRange {
                state,
                support: EXPOSURE_STATES,
            }
            .into());
        }
        self.state_term(params, index, state)
    }

    /// Per-state terms and their log-sum-exp for one subject.
    pub fn reduced_terms(
        &self,
        params: &MismeasurementParams,
        index: usize,
    ) -> Result<MarginalTerms, MismeasurementError> {
        params.validate(self.num_covariates())?;
        self.check_index(index)?;
        self.marginal_terms(params, index)
    }

    /// Joint term at the validated exposure, or the marginal over both exposures.
    pub fn observation_log_likelihood(
        &self,
        params: &MismeasurementParams,
        index: usize,
    ) -> Result<f64, MismeasurementError> {
        params.validate(self.num_covariates())?;
        self.check_index(index)?;
        match self.data.true_exposure[index] {
            Some(x) => self.state_term(params, index, usize::from(x)),
            None => Ok(self.marginal_terms(params, index)?.marginal()),
        }
    }

    // Callers have validated `params` and `index`; `state` is 0 or 1.
    fn state_term(
        &self,
        params: &MismeasurementParams,
        index: usize,
        state: usize,
    ) -> Result<f64, MismeasurementError> {
        let eta = params.linear_predictor(state, self.data.covariates.row(index));
        let outcome = bernoulli_logit_ln_pmf(self.data.outcome[index], eta)?;
        let error = bernoulli_ln_pmf(
            self.data.observed_exposure[index],
            params.observed_probability(state),
        )?;
        let prior = bernoulli_ln_pmf(state as u8, params.prevalence)?;
        Ok(outcome + error + prior)
    }

    fn marginal_terms(
        &self,
        params: &MismeasurementParams,
        index: usize,
    ) -> Result<MarginalTerms, MismeasurementError> {
        marginalize(EXPOSURE_STATES, |state| self.state_term(params, index, state))
    }

    pub fn log_likelihood(&self, params: &MismeasurementParams) -> Result<f64, MismeasurementError> {
        params.validate(self.num_covariates())?;
        let mut total = 0.0;
        for &i in self.complete.iter() {
            let x = usize::from(self.data.true_exposure[i].unwrap_or(0));
            total += self.state_term(params, i, x)?;
        }
        for &i in self.reduced.iter() {
            total += self.marginal_terms(params, i)?.marginal();
        }
        Ok(total)
    }

    /// Prior log-density on the constrained scale.
    pub fn log_prior(&self, params: &MismeasurementParams) -> Result<f64, MismeasurementError> {
        params.validate(self.num_covariates())?;
        let mut total = self.priors.coefficient.ln_pdf(params.intercept)?
            + self.priors.coefficient.ln_pdf(params.exposure_effect)?;
        for &value in params.covariate_effects.iter() {
            total += self.priors.coefficient.ln_pdf(value)?;
        }
        total += self.priors.sensitivity.ln_pdf(params.sensitivity)?;
        total += self.priors.specificity.ln_pdf(params.specificity)?;
        total += self.priors.prevalence.ln_pdf(params.prevalence)?;
        Ok(total)
    }

    pub fn log_posterior(&self, params: &MismeasurementParams) -> Result<f64, MismeasurementError> {
        Ok(self.log_prior(params)? + self.log_likelihood(params)?)
    }

    /// `P(x = 1 | y, x*, z)` for every marginalized subject under one draw.
    pub fn exposure_probabilities(
        &self,
        params: &MismeasurementParams,
    ) -> Result<Array1<f64>, MismeasurementError> {
        params.validate(self.num_covariates())?;
        let mut out = Array1::<f64>::zeros(self.reduced.len());
        for (slot, &i) in self.reduced.iter().enumerate() {
            let probabilities = self.marginal_terms(params, i)?.state_probabilities()?;
            out[slot] = probabilities[1];
        }
        Ok(out)
    }

    /// [`Self::exposure_probabilities`] for every draw; rows are draws.
    pub fn exposure_probability_draws(
        &self,
        draws: &PosteriorDraws,
    ) -> Result<Array2<f64>, MismeasurementError> {
        let selected = draws.select(&self.parameter_names())?;
        let rows = selected.map_draws(|theta| {
            let params = self.constrain(theta)?;
            self.exposure_probabilities(&params)
        })?;
        Ok(stack_rows(rows, self.reduced.len())?)
    }

    /// Posterior mean of `P(x = 1 | y, x*, z)` per marginalized subject.
    pub fn posterior_exposure_probabilities(
        &self,
        draws: &PosteriorDraws,
    ) -> Result<Array1<f64>, MismeasurementError> {
        Ok(column_means(&self.exposure_probability_draws(draws)?))
    }

    fn sensitivity_slot(&self) -> usize {
        2 + self.num_covariates()
    }

    pub fn constrain(
        &self,
        theta: ArrayView1<'_, f64>,
    ) -> Result<MismeasurementParams, MismeasurementError> {
        let expected = self.dim();
        if theta.len() != expected {
            return Err(MismeasurementError::ParameterLength {
                expected,
                found: theta.len(),
            });
        }
        let p = self.num_covariates();
        let slot = self.sensitivity_slot();
        Ok(MismeasurementParams {
            intercept: theta[0],
            exposure_effect: theta[1],
            covariate_effects: theta.slice(s![2..2 + p]).to_owned(),
            sensitivity: Transform::Logit.constrain(theta[slot]),
            specificity: Transform::Logit.constrain(theta[slot + 1]),
            prevalence: Transform::Logit.constrain(theta[slot + 2]),
        })
    }

    pub fn unconstrain(
        &self,
        params: &MismeasurementParams,
    ) -> Result<Array1<f64>, MismeasurementError> {
        params.validate(self.num_covariates())?;
        let mut theta = Vec::with_capacity(self.dim());
        theta.push(params.intercept);
        theta.push(params.exposure_effect);
        theta.extend(params.covariate_effects.iter().copied());
        theta.push(Transform::Logit.unconstrain(params.sensitivity)?);
        theta.push(Transform::Logit.unconstrain(params.specificity)?);
        theta.push(Transform::Logit.unconstrain(params.prevalence)?);
        Ok(Array1::from_vec(theta))
    }

    /// Joint log-density at `state`, adding its unconstrained gradient into `gradient`.
    fn state_term_with_gradient(
        &self,
        params: &MismeasurementParams,
        index: usize,
        state: usize,
        mut gradient: ArrayViewMut1<'_, f64>,
    ) -> Result<f64, MismeasurementError> {
        let covariates = self.data.covariates.row(index);
        let y = self.data.outcome[index];
        let observed = self.data.observed_exposure[index];
        let eta = params.linear_predictor(state, covariates);

        let outcome = bernoulli_logit_ln_pmf(y, eta)?;
        let residual = f64::from(y) - stable_sigmoid(eta);
        gradient[0] += residual;
        gradient[1] += residual * state as f64;
        for (j, &z) in covariates.iter().enumerate() {
            gradient[2 + j] += residual * z;
        }

        let slot = self.sensitivity_slot();
        let error = bernoulli_ln_pmf(observed, params.observed_probability(state))?;
        if state == 1 {
            gradient[slot] += f64::from(observed) - params.sensitivity;
        } else {
            gradient[slot + 1] += f64::from(1 - observed) - params.specificity;
        }

        let prior = bernoulli_ln_pmf(state as u8, params.prevalence)?;
        gradient[slot + 2] += state as f64 - params.prevalence;

        Ok(outcome + error + prior)
    }
}

impl LogDensity for MismeasurementModel {
    type Error = MismeasurementError;

    fn dim(&self) -> usize {
        5 + self.num_covariates()
    }

    fn parameter_names(&self) -> Vec<String> {
        let mut names = vec!["intercept".to_string(), "exposure_effect".to_string()];
        for j in 0..self.num_covariates() {
            names.push(format!("covariate_effect[{}]", j + 1));
        }
        names.push("logit_sensitivity".to_string());
        names.push("logit_specificity".to_string());
        names.push("logit_prevalence".to_string());
        names
    }

    fn log_density_and_gradient(
        &self,
        theta: ArrayView1<'_, f64>,
    ) -> Result<(f64, Array1<f64>), MismeasurementError> {
        let params = self.constrain(theta)?;
        let mut gradient = Array1::<f64>::zeros(self.dim());
        let mut total = 0.0;

        let slot = self.sensitivity_slot();
        for j in 0..slot {
            let c = apply_prior(Transform::Identity, &self.priors.coefficient, theta[j])?;
            total += c.ln_density;
            gradient[j] += c.gradient;
        }
        let probability_priors = [
            &self.priors.sensitivity,
            &self.priors.specificity,
            &self.priors.prevalence,
        ];
        for (offset, prior) in probability_priors.into_iter().enumerate() {
            let c = apply_prior(Transform::Logit, prior, theta[slot + offset])?;
            total += c.ln_density;
            gradient[slot + offset] += c.gradient;
        }

        for &i in self.complete.iter() {
            let x = usize::from(self.data.true_exposure[i].unwrap_or(0));
            total += self.state_term_with_gradient(&params, i, x, gradient.view_mut())?;
        }
        for &i in self.reduced.iter() {
            let terms = marginalize_with_gradient(EXPOSURE_STATES, &mut gradient, |state, g| {
                self.state_term_with_gradient(&params, i, state, g)
            })?;
            total += terms.marginal();
        }
        Ok((total, gradient))
    }
}
