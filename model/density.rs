use statrs::function::gamma::ln_gamma;
use thiserror::Error;

/// Absolute tolerance accepted when checking that probabilities sum to one.
pub const SIMPLEX_TOLERANCE: f64 = 1e-9;

const LN_SQRT_2PI: f64 = 0.918_938_533_204_672_8;

/// Errors raised by the log-density kernels and the marginalization core.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DensityError {
    #[error("parameter {name} = {value} is outside its valid domain")]
    InvalidParameter { name: String, value: f64 },
    #[error("{name} probabilities sum to {sum}, expected 1")]
    InvalidSimplex { name: String, sum: f64 },
    #[error("value {value} is outside the support of the {kernel} distribution")]
    InvalidObservation { kernel: &'static str, value: f64 },
    #[error("state index {state} is outside a support of size {support}")]
    StateOutOfRange { state: usize, support: usize },
    #[error("marginalization requires a non-empty support")]
    EmptySupport,
    #[error("state {state} produced an undefined log-density term ({value})")]
    UndefinedTerm { state: usize, value: f64 },
}

fn invalid(name: &str, value: f64) -> DensityError {
    DensityError::InvalidParameter {
        name: name.to_string(),
        value,
    }
}

pub fn check_finite(name: &str, value: f64) -> Result<f64, DensityError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(invalid(name, value))
    }
}

pub fn check_probability(name: &str, p: f64) -> Result<f64, DensityError> {
    if p.is_finite() && (0.0..=1.0).contains(&p) {
        Ok(p)
    } else {
        Err(invalid(name, p))
    }
}

pub fn check_positive(name: &str, value: f64) -> Result<f64, DensityError> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(invalid(name, value))
    }
}

pub fn check_non_negative(name: &str, value: f64) -> Result<f64, DensityError> {
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(invalid(name, value))
    }
}

/// Every entry must be a probability and the entries must sum to one.
pub fn check_simplex(name: &str, probabilities: &[f64]) -> Result<(), DensityError> {
    if probabilities.is_empty() {
        return Err(DensityError::EmptySupport);
    }
    for &p in probabilities {
        check_probability(name, p)?;
    }
    let sum: f64 = probabilities.iter().sum();
    if (sum - 1.0).abs() > SIMPLEX_TOLERANCE {
        return Err(DensityError::InvalidSimplex {
            name: name.to_string(),
            sum,
        });
    }
    Ok(())
}

/// `coefficient * ln(x)` with the convention `0 * ln(0) = 0`.
#[inline]
pub(crate) fn weighted_ln(coefficient: f64, x: f64) -> f64 {
    if coefficient == 0.0 {
        0.0
    } else {
        coefficient * x.ln()
    }
}

/// `factor * amount` with the convention `∞ * 0 = 0`.
#[inline]
pub(crate) fn scaled(factor: f64, amount: f64) -> f64 {
    if amount == 0.0 { 0.0 } else { factor * amount }
}

pub(crate) fn stable_softplus(x: f64) -> f64 {
    if x.is_infinite() {
        if x.is_sign_positive() { x } else { 0.0 }
    } else if x > 20.0 {
        x
    } else if x < -20.0 {
        x.exp().ln_1p()
    } else {
        (1.0 + x.exp()).ln()
    }
}

pub(crate) fn stable_sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let exp_x = x.exp();
        exp_x / (1.0 + exp_x)
    }
}

/// `ln σ(x)` without forming `σ(x)`.
#[inline]
pub(crate) fn log_sigmoid(x: f64) -> f64 {
    -stable_softplus(-x)
}

fn check_binary(kernel: &'static str, y: u8) -> Result<(), DensityError> {
    if y > 1 {
        return Err(DensityError::InvalidObservation {
            kernel,
            value: f64::from(y),
        });
    }
    Ok(())
}

/// Bernoulli log-mass with success probability `p`.
///
/// Returns `-∞` when `p` puts zero mass on `y`; that is a valid value, not an error.
pub fn bernoulli_ln_pmf(y: u8, p: f64) -> Result<f64, DensityError> {
    check_binary("bernoulli", y)?;
    let p = check_probability("bernoulli probability", p)?;
    Ok(if y == 1 { p.ln() } else { (-p).ln_1p() })
}

/// Bernoulli log-mass parameterized on the log-odds scale.
pub fn bernoulli_logit_ln_pmf(y: u8, eta: f64) -> Result<f64, DensityError> {
    check_binary("bernoulli", y)?;
    let eta = check_finite("bernoulli log-odds", eta)?;
    Ok(if y == 1 {
        log_sigmoid(eta)
    } else {
        log_sigmoid(-eta)
    })
}

pub fn normal_ln_pdf(x: f64, mean: f64, sd: f64) -> Result<f64, DensityError> {
    let x = check_finite("normal observation", x)?;
    let mean = check_finite("normal mean", mean)?;
    let sd = check_positive("normal standard deviation", sd)?;
    let z = (x - mean) / sd;
    Ok(-LN_SQRT_2PI - sd.ln() - 0.5 * z * z)
}

pub fn gamma_ln_pdf(x: f64, shape: f64, rate: f64) -> Result<f64, DensityError> {
    let shape = check_positive("gamma shape", shape)?;
    let rate = check_positive("gamma rate", rate)?;
    if !x.is_finite() || x < 0.0 {
        return Err(DensityError::InvalidObservation {
            kernel: "gamma",
            value: x,
        });
    }
    if x == 0.0 {
        return Ok(match shape.partial_cmp(&1.0) {
            Some(std::cmp::Ordering::Less) => f64::INFINITY,
            Some(std::cmp::Ordering::Equal) => rate.ln(),
            _ => f64::NEG_INFINITY,
        });
    }
    Ok(shape * rate.ln() - ln_gamma(shape) + weighted_ln(shape - 1.0, x) - rate * x)
}

pub fn beta_ln_pdf(x: f64, alpha: f64, beta: f64) -> Result<f64, DensityError> {
    let alpha = check_positive("beta alpha", alpha)?;
    let beta = check_positive("beta beta", beta)?;
    if !x.is_finite() || !(0.0..=1.0).contains(&x) {
        return Err(DensityError::InvalidObservation {
            kernel: "beta",
            value: x,
        });
    }
    let ln_norm = ln_gamma(alpha + beta) - ln_gamma(alpha) - ln_gamma(beta);
    let ln_complement = if beta == 1.0 {
        0.0
    } else {
        (beta - 1.0) * (-x).ln_1p()
    };
    Ok(ln_norm + weighted_ln(alpha - 1.0, x) + ln_complement)
}

/// Symmetric Dirichlet log-density over a validated simplex.
pub fn dirichlet_symmetric_ln_pdf(weights: &[f64], concentration: f64) -> Result<f64, DensityError> {
    let alpha = check_positive("dirichlet concentration", concentration)?;
    check_simplex("dirichlet", weights)?;
    let k = weights.len() as f64;
    let ln_norm = ln_gamma(k * alpha) - k * ln_gamma(alpha);
    Ok(ln_norm + weights.iter().map(|&w| weighted_ln(alpha - 1.0, w)).sum::<f64>())
}

/// Half-normal log-density on `[0, ∞)`.
pub fn half_normal_ln_pdf(x: f64, sd: f64) -> Result<f64, DensityError> {
    if !x.is_finite() || x < 0.0 {
        return Err(DensityError::InvalidObservation {
            kernel: "half-normal",
            value: x,
        });
    }
    Ok((2.0f64).ln() + normal_ln_pdf(x, 0.0, sd)?)
}
