//! Univariate finite normal mixture with the component label summed out.
//!
//! `p(y) = Σ_k w_k N(y | μ_k, σ_k)`. The sampler target uses an ordered
//! transform on the means so that the component labels are identified, an
//! additive log-ratio transform on the weights and log scales.

use crate::density::{
    DensityError, check_finite, check_positive, check_simplex, dirichlet_symmetric_ln_pdf,
    normal_ln_pdf,
};
use crate::draws::{DrawsError, PosteriorDraws, stack_rows};
use crate::logsumexp::{MarginalTerms, marginalize, marginalize_with_gradient};
use crate::posterior::PosteriorError;
use crate::prior::Prior;
use crate::target::LogDensity;
use crate::transform::{
    Transform, apply_prior, ordered_constrain, ordered_log_jacobian, ordered_pullback,
    ordered_unconstrain, simplex_constrain, simplex_log_jacobian_gradient, simplex_unconstrain,
};
use ndarray::{Array1, Array2, ArrayView1, s};
use serde::{Deserialize, Serialize};
use statrs::function::gamma::ln_gamma;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MixtureError {
    #[error("density error: {0}")]
    Density(#[from] DensityError),
    #[error("posterior recovery failed: {0}")]
    Posterior(#[from] PosteriorError),
    #[error("draws error: {0}")]
    Draws(#[from] DrawsError),
    #[error("a mixture needs at least one component")]
    NoComponents,
    #[error("dataset has no observations")]
    Empty,
    #[error("observation {index} is not finite")]
    NonFiniteValue { index: usize },
    #[error("{name} has {found} entries, expected {expected}")]
    ComponentCount {
        name: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("parameter vector has length {found}, expected {expected}")]
    ParameterLength { expected: usize, found: usize },
    #[error("observation index {index} is out of range for {len} observations")]
    IndexOutOfRange { index: usize, len: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MixturePriors {
    /// Symmetric Dirichlet concentration on the weights.
    pub concentration: f64,
    pub mean: Prior,
    pub scale: Prior,
}

impl Default for MixturePriors {
    fn default() -> Self {
        Self {
            concentration: 1.0,
            mean: Prior::Normal { mean: 0.0, sd: 10.0 },
            scale: Prior::HalfNormal { sd: 5.0 },
        }
    }
}

impl MixturePriors {
    pub fn validate(&self) -> Result<(), DensityError> {
        check_positive("dirichlet concentration", self.concentration)?;
        self.mean.validate()?;
        self.scale.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixtureParams {
    pub weights: Array1<f64>,
    pub means: Array1<f64>,
    pub scales: Array1<f64>,
}

impl MixtureParams {
    pub fn validate(&self, components: usize) -> Result<(), MixtureError> {
        for (name, len) in [
            ("weights", self.weights.len()),
            ("means", self.means.len()),
            ("scales", self.scales.len()),
        ] {
            if len != components {
                return Err(MixtureError::ComponentCount {
                    name,
                    expected: components,
                    found: len,
                });
            }
        }
        check_simplex("mixture weights", &self.weights.to_vec())?;
        for &mean in self.means.iter() {
            check_finite("component mean", mean)?;
        }
        for &scale in self.scales.iter() {
            check_positive("component scale", scale)?;
        }
        Ok(())
    }

    fn component_ln_density(&self, component: usize, y: f64) -> Result<f64, DensityError> {
        Ok(self.weights[component].ln()
            + normal_ln_pdf(y, self.means[component], self.scales[component])?)
    }
}

#[derive(Debug, Clone)]
pub struct NormalMixtureModel {
    values: Arc<Array1<f64>>,
    components: usize,
    priors: MixturePriors,
}

impl NormalMixtureModel {
    pub fn new(
        values: Array1<f64>,
        components: usize,
        priors: MixturePriors,
    ) -> Result<Self, MixtureError> {
        if components == 0 {
            return Err(MixtureError::NoComponents);
        }
        if values.is_empty() {
            return Err(MixtureError::Empty);
        }
        if let Some(index) = values.iter().position(|v| !v.is_finite()) {
            return Err(MixtureError::NonFiniteValue { index });
        }
        priors.validate()?;
        log::debug!(
            "Normal mixture: {} observations, {} components",
            values.len(),
            components
        );
        Ok(Self {
            values: Arc::new(values),
            components,
            priors,
        })
    }

    pub fn values(&self) -> ArrayView1<'_, f64> {
        self.values.view()
    }

    pub fn components(&self) -> usize {
        self.components
    }

    pub fn priors(&self) -> &MixturePriors {
        &self.priors
    }

    fn terms_at(&self, params: &MixtureParams, y: f64) -> Result<MarginalTerms, MixtureError> {
        marginalize(self.components, |k| -> Result<f64, MixtureError> {
            Ok(params.component_ln_density(k, y)?)
        })
    }

    /// Per-component terms of observation `index`.
    pub fn observation_terms(
        &self,
        params: &MixtureParams,
        index: usize,
    ) -> Result<MarginalTerms, MixtureError> {
        params.validate(self.components)?;
        let y = self.values.get(index).copied().ok_or(MixtureError::IndexOutOfRange {
            index,
            len: self.values.len(),
        })?;
        self.terms_at(params, y)
    }

    pub fn log_likelihood(&self, params: &MixtureParams) -> Result<f64, MixtureError> {
        params.validate(self.components)?;
        let mut total = 0.0;
        for &y in self.values.iter() {
            total += self.terms_at(params, y)?.marginal();
        }
        Ok(total)
    }

    pub fn log_prior(&self, params: &MixtureParams) -> Result<f64, MixtureError> {
        params.validate(self.components)?;
        let mut total = dirichlet_symmetric_ln_pdf(&params.weights.to_vec(), self.priors.concentration)?;
        for &mean in params.means.iter() {
            total += self.priors.mean.ln_pdf(mean)?;
        }
        for &scale in params.scales.iter() {
            total += self.priors.scale.ln_pdf(scale)?;
        }
        Ok(total)
    }

    pub fn log_posterior(&self, params: &MixtureParams) -> Result<f64, MixtureError> {
        Ok(self.log_prior(params)? + self.log_likelihood(params)?)
    }

    /// Row `i` holds `P(component = k | y_i)`.
    pub fn membership_probabilities(&self, params: &MixtureParams) -> Result<Array2<f64>, MixtureError> {
        params.validate(self.components)?;
        let mut out = Array2::<f64>::zeros((self.values.len(), self.components));
        for (i, &y) in self.values.iter().enumerate() {
            let probabilities = self.terms_at(params, y)?.state_probabilities()?;
            out.row_mut(i).assign(&ArrayView1::from(&probabilities[..]));
        }
        Ok(out)
    }

    /// Mixture density `Σ_k w_k N(y | μ_k, σ_k)` at each grid point.
    pub fn predictive_density(
        &self,
        params: &MixtureParams,
        grid: ArrayView1<'_, f64>,
    ) -> Result<Array1<f64>, MixtureError> {
        params.validate(self.components)?;
        let mut out = Array1::<f64>::zeros(grid.len());
        for (slot, &y) in grid.iter().enumerate() {
            check_finite("grid point", y)?;
            out[slot] = self.terms_at(params, y)?.marginal().exp();
        }
        Ok(out)
    }

    /// Predictive density per draw; rows are draws.
    pub fn predictive_density_draws(
        &self,
        draws: &PosteriorDraws,
        grid: ArrayView1<'_, f64>,
    ) -> Result<Array2<f64>, MixtureError> {
        let selected = draws.select(&self.parameter_names())?;
        let rows = selected.map_draws(|theta| {
            let params = self.constrain(theta)?;
            self.predictive_density(&params, grid)
        })?;
        Ok(stack_rows(rows, grid.len())?)
    }

    /// Membership probabilities averaged over draws.
    pub fn posterior_membership(&self, draws: &PosteriorDraws) -> Result<Array2<f64>, MixtureError> {
        let selected = draws.select(&self.parameter_names())?;
        let per_draw = selected.map_draws(|theta| {
            let params = self.constrain(theta)?;
            self.membership_probabilities(&params)
        })?;
        let mut mean = Array2::<f64>::zeros((self.values.len(), self.components));
        for probabilities in &per_draw {
            mean += probabilities;
        }
        mean /= per_draw.len().max(1) as f64;
        Ok(mean)
    }

    fn check_length(&self, theta: ArrayView1<'_, f64>) -> Result<(), MixtureError> {
        if theta.len() != self.dim() {
            return Err(MixtureError::ParameterLength {
                expected: self.dim(),
                found: theta.len(),
            });
        }
        Ok(())
    }

    pub fn constrain(&self, theta: ArrayView1<'_, f64>) -> Result<MixtureParams, MixtureError> {
        self.check_length(theta)?;
        let k = self.components;
        let (weights, _) = simplex_constrain(theta.slice(s![0..k - 1]));
        Ok(MixtureParams {
            weights,
            means: ordered_constrain(theta.slice(s![k - 1..2 * k - 1])),
            scales: theta.slice(s![2 * k - 1..3 * k - 1]).mapv(f64::exp),
        })
    }

    /// Fails unless the means are strictly increasing and every weight is positive.
    pub fn unconstrain(&self, params: &MixtureParams) -> Result<Array1<f64>, MixtureError> {
        params.validate(self.components)?;
        let mut theta = Vec::with_capacity(self.dim());
        theta.extend(simplex_unconstrain(params.weights.view())?.iter().copied());
        theta.extend(ordered_unconstrain(params.means.view())?.iter().copied());
        for &scale in params.scales.iter() {
            theta.push(Transform::Log.unconstrain(scale)?);
        }
        Ok(Array1::from_vec(theta))
    }
}

impl LogDensity for NormalMixtureModel {
    type Error = MixtureError;

    fn dim(&self) -> usize {
        3 * self.components - 1
    }

    fn parameter_names(&self) -> Vec<String> {
        let k = self.components;
        let mut names = Vec::with_capacity(self.dim());
        names.extend((1..k).map(|j| format!("weight_logratio[{j}]")));
        names.extend((1..=k).map(|j| format!("mean_free[{j}]")));
        names.extend((1..=k).map(|j| format!("log_scale[{j}]")));
        names
    }

    fn log_density_and_gradient(
        &self,
        theta: ArrayView1<'_, f64>,
    ) -> Result<(f64, Array1<f64>), MixtureError> {
        self.check_length(theta)?;
        let k = self.components;
        let means_at = k - 1;
        let scales_at = 2 * k - 1;

        let (weights, ln_weights) = simplex_constrain(theta.slice(s![0..means_at]));
        let mean_free = theta.slice(s![means_at..scales_at]);
        let means = ordered_constrain(mean_free);
        let log_scales = theta.slice(s![scales_at..]);
        let scales = log_scales.mapv(f64::exp);

        // The means block holds ∂/∂μ until the ordered pullback at the end.
        let mut gradient = Array1::<f64>::zeros(self.dim());
        let mut total = 0.0;

        let alpha = self.priors.concentration;
        total += ln_gamma(k as f64 * alpha) - k as f64 * ln_gamma(alpha) + alpha * ln_weights.sum();
        gradient
            .slice_mut(s![0..means_at])
            .scaled_add(alpha, &simplex_log_jacobian_gradient(weights.view()));

        for j in 0..k {
            total += self.priors.mean.ln_pdf(means[j])?;
            gradient[means_at + j] += self.priors.mean.ln_pdf_derivative(means[j]);
        }
        total += ordered_log_jacobian(mean_free);

        for j in 0..k {
            let c = apply_prior(Transform::Log, &self.priors.scale, log_scales[j])?;
            total += c.ln_density;
            gradient[scales_at + j] += c.gradient;
        }

        for &y in self.values.iter() {
            let terms = marginalize_with_gradient(
                k,
                &mut gradient,
                |state, mut g| -> Result<f64, MixtureError> {
                    for j in 0..means_at {
                        g[j] -= weights[j];
                    }
                    if state < means_at {
                        g[state] += 1.0;
                    }
                    let z = (y - means[state]) / scales[state];
                    g[means_at + state] += z / scales[state];
                    g[scales_at + state] += z * z - 1.0;
                    Ok(ln_weights[state] + normal_ln_pdf(y, means[state], scales[state])?)
                },
            )?;
            total += terms.marginal();
        }

        let grad_means = gradient.slice(s![means_at..scales_at]).to_owned();
        let pulled = ordered_pullback(mean_free, grad_means.view());
        gradient.slice_mut(s![means_at..scales_at]).assign(&pulled);

        Ok((total, gradient))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::central_difference_gradient;
    use crate::transform::simplex_log_jacobian;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn toy_model() -> NormalMixtureModel {
        let values = array![-2.1, -1.7, -2.4, 0.3, 0.1, 2.9, 3.4, 3.1, 2.7];
        NormalMixtureModel::new(values, 3, MixturePriors::default()).unwrap()
    }

    fn toy_params() -> MixtureParams {
        MixtureParams {
            weights: array![0.3, 0.25, 0.45],
            means: array![-2.0, 0.2, 3.0],
            scales: array![0.4, 0.6, 0.5],
        }
    }

    #[test]
    fn likelihood_matches_direct_mixture_sum() {
        let model = toy_model();
        let params = toy_params();
        let pdf = |y: f64, m: f64, s: f64| {
            (-0.5 * ((y - m) / s).powi(2)).exp() / (s * (2.0 * std::f64::consts::PI).sqrt())
        };
        let direct: f64 = model
            .values()
            .iter()
            .map(|&y| {
                (0..3)
                    .map(|k| params.weights[k] * pdf(y, params.means[k], params.scales[k]))
                    .sum::<f64>()
                    .ln()
            })
            .sum();
        assert_relative_eq!(model.log_likelihood(&params).unwrap(), direct, epsilon = 1e-10);
    }

    #[test]
    fn membership_rows_are_distributions() {
        let model = toy_model();
        let membership = model.membership_probabilities(&toy_params()).unwrap();
        for row in membership.rows() {
            assert_relative_eq!(row.sum(), 1.0, epsilon = 1e-12);
            assert!(row.iter().all(|&p| (0.0..=1.0).contains(&p)));
        }
        // far-left observation belongs to the first component
        assert!(membership[[0, 0]] > 0.99);
    }

    #[test]
    fn invalid_weights_are_rejected() {
        let model = toy_model();
        let mut params = toy_params();
        params.weights = array![0.5, 0.5, 0.5];
        let err = model.log_likelihood(&params).unwrap_err();
        assert!(matches!(err, MixtureError::Density(DensityError::InvalidSimplex { .. })));
        params.weights = array![0.5, 0.5];
        assert!(matches!(
            model.log_likelihood(&params).unwrap_err(),
            MixtureError::ComponentCount { name: "weights", .. }
        ));
    }

    #[test]
    fn observation_terms_check_component_count() {
        let model = toy_model();
        let params = MixtureParams {
            weights: array![1.0],
            ..toy_params()
        };
        let err = model.observation_terms(&params, 0).unwrap_err();
        assert!(matches!(
            err,
            MixtureError::ComponentCount {
                name: "weights",
                expected: 3,
                found: 1
            }
        ));
        assert!(model.observation_terms(&toy_params(), 9).is_err());
    }

    #[test]
    fn predictive_density_integrates_to_one() {
        let model = toy_model();
        let step = 0.01;
        let grid = Array1::from_iter((0..4000).map(|i| -20.0 + step * i as f64));
        let density = model.predictive_density(&toy_params(), grid.view()).unwrap();
        assert_relative_eq!(density.sum() * step, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn target_adds_change_of_variables_to_constrained_posterior() {
        let model = toy_model();
        let params = toy_params();
        let theta = model.unconstrain(&params).unwrap();
        let target = model.log_density(theta.view()).unwrap();
        let ln_w = params.weights.mapv(f64::ln);
        let jacobian = simplex_log_jacobian(ln_w.view())
            + ordered_log_jacobian(theta.slice(s![2..5]))
            + theta.slice(s![5..8]).sum();
        let constrained = model.log_posterior(&params).unwrap();
        assert_relative_eq!(target, constrained + jacobian, epsilon = 1e-9);
    }

    #[test]
    fn gradient_matches_finite_differences() {
        let priors = MixturePriors {
            concentration: 2.0,
            scale: Prior::Gamma { shape: 2.0, rate: 1.5 },
            ..MixturePriors::default()
        };
        let values = array![-2.1, -1.7, -2.4, 0.3, 0.1, 2.9, 3.4, 3.1, 2.7];
        let model = NormalMixtureModel::new(values, 3, priors).unwrap();
        let theta = model.unconstrain(&toy_params()).unwrap();
        let (_, analytic) = model.log_density_and_gradient(theta.view()).unwrap();
        let numeric = central_difference_gradient(&model, theta.view(), 1e-6).unwrap();
        for i in 0..model.dim() {
            assert_relative_eq!(analytic[i], numeric[i], epsilon = 1e-5, max_relative = 1e-5);
        }
    }

    #[test]
    fn single_component_has_no_weight_coordinates() {
        let model = NormalMixtureModel::new(array![0.5, 1.5], 1, MixturePriors::default()).unwrap();
        assert_eq!(model.dim(), 2);
        let params = MixtureParams {
            weights: array![1.0],
            means: array![1.0],
            scales: array![1.0],
        };
        let theta = model.unconstrain(&params).unwrap();
        assert_eq!(theta, array![1.0, 0.0]);
        let (_, gradient) = model.log_density_and_gradient(theta.view()).unwrap();
        assert_eq!(gradient.len(), 2);
    }

    #[test]
    fn unordered_means_cannot_be_unconstrained() {
        let model = toy_model();
        let mut params = toy_params();
        params.means = array![1.0, 0.0, 2.0];
        assert!(model.unconstrain(&params).is_err());
    }
}
