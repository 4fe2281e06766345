//! Maps between the unconstrained vectors a gradient-based sampler proposes and
//! the constrained parameters the models are written in.
//!
//! Every constrained parameter `x = f(u)` contributes `ln |f'(u)|` to the
//! log-density so that a sampler moving in `u` targets the intended posterior.

use crate::density::{
    DensityError, check_finite, check_positive, check_probability, check_simplex, log_sigmoid,
    stable_sigmoid,
};
use crate::logsumexp::log_sum_exp;
use crate::prior::Prior;
use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};
use statrs::function::gamma::ln_gamma;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transform {
    /// Real line.
    Identity,
    /// Positive half-line, `x = exp(u)`.
    Log,
    /// Unit interval, `x = σ(u)`.
    Logit,
}

impl Transform {
    #[inline]
    pub fn constrain(self, u: f64) -> f64 {
        match self {
            Transform::Identity => u,
            Transform::Log => u.exp(),
            Transform::Logit => stable_sigmoid(u),
        }
    }

    pub fn unconstrain(self, x: f64) -> Result<f64, DensityError> {
        match self {
            Transform::Identity => check_finite("unbounded parameter", x),
            Transform::Log => Ok(check_positive("positive parameter", x)?.ln()),
            Transform::Logit => {
                let p = check_probability("unit-interval parameter", x)?;
                Ok(p.ln() - (-p).ln_1p())
            }
        }
    }

    /// `ln |dx/du|`.
    #[inline]
    pub fn log_jacobian(self, u: f64) -> f64 {
        match self {
            Transform::Identity => 0.0,
            Transform::Log => u,
            Transform::Logit => log_sigmoid(u) + log_sigmoid(-u),
        }
    }

    /// `dx/du`.
    #[inline]
    pub fn jacobian(self, u: f64) -> f64 {
        match self {
            Transform::Identity => 1.0,
            Transform::Log => u.exp(),
            Transform::Logit => {
                let x = stable_sigmoid(u);
                x * (1.0 - x)
            }
        }
    }

    /// `d/du ln |dx/du|`.
    #[inline]
    pub fn log_jacobian_derivative(self, u: f64) -> f64 {
        match self {
            Transform::Identity => 0.0,
            Transform::Log => 1.0,
            Transform::Logit => 1.0 - 2.0 * stable_sigmoid(u),
        }
    }
}

/// A scalar parameter pulled back to the unconstrained scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Constrained {
    pub value: f64,
    /// Prior log-density plus log-Jacobian, up to a constant.
    pub ln_density: f64,
    /// Derivative of `ln_density` with respect to the unconstrained value.
    pub gradient: f64,
}

/// Evaluates `prior` at `transform.constrain(u)` including the change of variables.
///
/// The Beta–logit and Gamma–log pairings are written in closed form on the
/// unconstrained scale so that they stay finite when `x` rounds to a boundary.
pub fn apply_prior(transform: Transform, prior: &Prior, u: f64) -> Result<Constrained, DensityError> {
    let u = check_finite("unconstrained parameter", u)?;
    let value = transform.constrain(u);
    match (transform, *prior) {
        (Transform::Logit, Prior::Beta { alpha, beta }) => {
            prior.validate()?;
            let ln_norm = ln_gamma(alpha + beta) - ln_gamma(alpha) - ln_gamma(beta);
            Ok(Constrained {
                value,
                ln_density: ln_norm + alpha * log_sigmoid(u) + beta * log_sigmoid(-u),
                gradient: alpha * (1.0 - value) - beta * value,
            })
        }
        (Transform::Log, Prior::Gamma { shape, rate }) => {
            prior.validate()?;
            let ln_norm = shape * rate.ln() - ln_gamma(shape);
            Ok(Constrained {
                value,
                ln_density: ln_norm + shape * u - rate * value,
                gradient: shape - rate * value,
            })
        }
        _ => {
            let ln_prior = prior.ln_pdf(value)?;
            Ok(Constrained {
                value,
                ln_density: ln_prior + transform.log_jacobian(u),
                gradient: prior.ln_pdf_derivative(value) * transform.jacobian(u)
                    + transform.log_jacobian_derivative(u),
            })
        }
    }
}

/// Strictly increasing vector: `x_0 = u_0`, `x_k = x_{k-1} + exp(u_k)`.
pub fn ordered_constrain(u: ArrayView1<'_, f64>) -> Array1<f64> {
    let mut x = Array1::<f64>::zeros(u.len());
    for k in 0..u.len() {
        x[k] = if k == 0 { u[0] } else { x[k - 1] + u[k].exp() };
    }
    x
}

pub fn ordered_unconstrain(x: ArrayView1<'_, f64>) -> Result<Array1<f64>, DensityError> {
    let mut u = Array1::<f64>::zeros(x.len());
    for k in 0..x.len() {
        check_finite("ordered element", x[k])?;
        u[k] = if k == 0 {
            x[0]
        } else {
            let step = x[k] - x[k - 1];
            if !(step > 0.0) {
                return Err(DensityError::InvalidParameter {
                    name: format!("ordered element {k}"),
                    value: x[k],
                });
            }
            step.ln()
        };
    }
    Ok(u)
}

pub fn ordered_log_jacobian(u: ArrayView1<'_, f64>) -> f64 {
    u.iter().skip(1).sum()
}

/// Pulls `∂f/∂x` back to `∂f/∂u` for the ordered transform, log-Jacobian included.
pub fn ordered_pullback(u: ArrayView1<'_, f64>, grad_x: ArrayView1<'_, f64>) -> Array1<f64> {
    let n = u.len();
    let mut grad_u = Array1::<f64>::zeros(n);
    let mut tail = 0.0;
    for j in (0..n).rev() {
        tail += grad_x[j];
        grad_u[j] = if j == 0 { tail } else { tail * u[j].exp() + 1.0 };
    }
    grad_u
}

/// Simplex of length `K` from `K - 1` free log-ratios against the last component.
///
/// Returns the weights and their logarithms.
pub fn simplex_constrain(u: ArrayView1<'_, f64>) -> (Array1<f64>, Array1<f64>) {
    let mut logits: Vec<f64> = u.to_vec();
    logits.push(0.0);
    let norm = log_sum_exp(&logits);
    let ln_weights = Array1::from_iter(logits.iter().map(|&v| v - norm));
    let weights = ln_weights.mapv(f64::exp);
    (weights, ln_weights)
}

pub fn simplex_unconstrain(weights: ArrayView1<'_, f64>) -> Result<Array1<f64>, DensityError> {
    let slice = weights.to_vec();
    check_simplex("simplex", &slice)?;
    let k = slice.len();
    let last = slice[k - 1];
    if slice.iter().any(|&w| w <= 0.0) {
        return Err(DensityError::InvalidParameter {
            name: "simplex weight".to_string(),
            value: slice.iter().copied().fold(f64::INFINITY, f64::min),
        });
    }
    Ok(Array1::from_iter(slice[..k - 1].iter().map(|&w| (w / last).ln())))
}

/// `ln |J|` of the additive log-ratio map equals `Σ_k ln w_k`.
pub fn simplex_log_jacobian(ln_weights: ArrayView1<'_, f64>) -> f64 {
    ln_weights.sum()
}

/// Gradient of [`simplex_log_jacobian`] with respect to the free coordinates.
pub fn simplex_log_jacobian_gradient(weights: ArrayView1<'_, f64>) -> Array1<f64> {
    let k = weights.len();
    Array1::from_iter((0..k - 1).map(|j| 1.0 - k as f64 * weights[j]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn scalar_round_trips() {
        for (transform, x) in [
            (Transform::Identity, -3.2),
            (Transform::Log, 0.04),
            (Transform::Logit, 0.83),
        ] {
            let u = transform.unconstrain(x).unwrap();
            assert_relative_eq!(transform.constrain(u), x, epsilon = 1e-12);
        }
        assert!(Transform::Log.unconstrain(-1.0).is_err());
        assert!(Transform::Logit.unconstrain(1.5).is_err());
    }

    #[test]
    fn closed_forms_match_generic_path() {
        let beta = Prior::Beta { alpha: 2.0, beta: 5.0 };
        let u = 0.4;
        let closed = apply_prior(Transform::Logit, &beta, u).unwrap();
        let x = Transform::Logit.constrain(u);
        let generic = beta.ln_pdf(x).unwrap() + Transform::Logit.log_jacobian(u);
        assert_relative_eq!(closed.ln_density, generic, epsilon = 1e-12);
        let generic_grad = beta.ln_pdf_derivative(x) * Transform::Logit.jacobian(u)
            + Transform::Logit.log_jacobian_derivative(u);
        assert_relative_eq!(closed.gradient, generic_grad, epsilon = 1e-12);

        let gamma = Prior::Gamma { shape: 3.0, rate: 2.0 };
        let closed = apply_prior(Transform::Log, &gamma, -0.3).unwrap();
        let x = (-0.3f64).exp();
        let generic = gamma.ln_pdf(x).unwrap() + (-0.3);
        assert_relative_eq!(closed.ln_density, generic, epsilon = 1e-12);
    }

    #[test]
    fn beta_logit_stays_finite_at_extreme_logits() {
        let prior = Prior::Beta { alpha: 2.0, beta: 2.0 };
        let c = apply_prior(Transform::Logit, &prior, 60.0).unwrap();
        assert!(c.ln_density.is_finite());
        assert!(c.gradient.is_finite());
    }

    #[test]
    fn ordered_transform_round_trips_and_pulls_back() {
        let x = array![-1.0, 0.5, 0.75, 4.0];
        let u = ordered_unconstrain(x.view()).unwrap();
        let back = ordered_constrain(u.view());
        for k in 0..x.len() {
            assert_relative_eq!(back[k], x[k], epsilon = 1e-12);
        }
        assert!(ordered_unconstrain(array![1.0, 1.0].view()).is_err());

        // f(x) = Σ c_k x_k plus the log-Jacobian
        let c = array![0.3, -1.2, 2.0, 0.7];
        let f = |u: &Array1<f64>| ordered_constrain(u.view()).dot(&c) + ordered_log_jacobian(u.view());
        let grad = ordered_pullback(u.view(), c.view());
        let h = 1e-6;
        for j in 0..u.len() {
            let mut up = u.clone();
            let mut down = u.clone();
            up[j] += h;
            down[j] -= h;
            assert_relative_eq!(grad[j], (f(&up) - f(&down)) / (2.0 * h), epsilon = 1e-6);
        }
    }

    #[test]
    fn simplex_round_trips_and_log_jacobian_gradient_matches() {
        let w = array![0.2, 0.5, 0.3];
        let u = simplex_unconstrain(w.view()).unwrap();
        let (back, ln_back) = simplex_constrain(u.view());
        for k in 0..3 {
            assert_relative_eq!(back[k], w[k], epsilon = 1e-12);
            assert_relative_eq!(ln_back[k], w[k].ln(), epsilon = 1e-12);
        }

        let f = |u: &Array1<f64>| {
            let (_, lw) = simplex_constrain(u.view());
            simplex_log_jacobian(lw.view())
        };
        let grad = simplex_log_jacobian_gradient(w.view());
        let h = 1e-6;
        for j in 0..u.len() {
            let mut up = u.clone();
            let mut down = u.clone();
            up[j] += h;
            down[j] -= h;
            assert_relative_eq!(grad[j], (f(&up) - f(&down)) / (2.0 * h), epsilon = 1e-6);
        }
    }
}
