use crate::density::{
    DensityError, beta_ln_pdf, check_finite, check_positive, gamma_ln_pdf, half_normal_ln_pdf,
    normal_ln_pdf,
};
use serde::{Deserialize, Serialize};

/// Prior placed on a single scalar parameter, stored in model configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum Prior {
    /// Improper uniform prior; contributes nothing to the log-posterior.
    #[default]
    Flat,
    Normal { mean: f64, sd: f64 },
    HalfNormal { sd: f64 },
    Gamma { shape: f64, rate: f64 },
    Beta { alpha: f64, beta: f64 },
}

impl Prior {
    pub fn validate(&self) -> Result<(), DensityError> {
        match *self {
            Prior::Flat => {}
            Prior::Normal { mean, sd } => {
                check_finite("normal prior mean", mean)?;
                check_positive("normal prior sd", sd)?;
            }
            Prior::HalfNormal { sd } => {
                check_positive("half-normal prior sd", sd)?;
            }
            Prior::Gamma { shape, rate } => {
                check_positive("gamma prior shape", shape)?;
                check_positive("gamma prior rate", rate)?;
            }
            Prior::Beta { alpha, beta } => {
                check_positive("beta prior alpha", alpha)?;
                check_positive("beta prior beta", beta)?;
            }
        }
        Ok(())
    }

    pub fn ln_pdf(&self, x: f64) -> Result<f64, DensityError> {
        match *self {
            Prior::Flat => Ok(0.0),
            Prior::Normal { mean, sd } => normal_ln_pdf(x, mean, sd),
            Prior::HalfNormal { sd } => half_normal_ln_pdf(x, sd),
            Prior::Gamma { shape, rate } => gamma_ln_pdf(x, shape, rate),
            Prior::Beta { alpha, beta } => beta_ln_pdf(x, alpha, beta),
        }
    }

    /// `d/dx ln p(x)` on the constrained scale.
    pub fn ln_pdf_derivative(&self, x: f64) -> f64 {
        match *self {
            Prior::Flat => 0.0,
            Prior::Normal { mean, sd } => -(x - mean) / (sd * sd),
            Prior::HalfNormal { sd } => -x / (sd * sd),
            Prior::Gamma { shape, rate } => {
                let power = if shape == 1.0 { 0.0 } else { (shape - 1.0) / x };
                power - rate
            }
            Prior::Beta { alpha, beta } => {
                let lower = if alpha == 1.0 { 0.0 } else { (alpha - 1.0) / x };
                let upper = if beta == 1.0 { 0.0 } else { (beta - 1.0) / (1.0 - x) };
                lower - upper
            }
        }
    }
}
