//! Piecewise-constant hazard survival model.
//!
//! The time axis is cut into intervals `[c_k, c_{k+1})` with a constant
//! baseline hazard `λ_k` on each; covariates act proportionally through
//! `exp(η)`. For a subject followed until `t` the log-likelihood is
//!
//! ```text
//! event · (η + ln λ_{k(t)})  −  exp(η) · Σ_k λ_k · E_k(t)
//! ```
//!
//! where `E_k(t)` is the time at risk spent in interval `k`. `E_k(t)` and
//! `k(t)` depend only on the data and are computed once per model.

mod curves;
mod intervals;
mod likelihood;

pub use curves::{GridIntegration, SurvivalCurves, baseline_hazard_at, survival_curves};
pub use intervals::{Cutpoints, IntervalExposure};
pub use likelihood::{
    GammaAnchor, HazardData, HazardParams, HazardPriors, PiecewiseHazardModel,
    observation_log_likelihood,
};

use crate::density::DensityError;
use crate::draws::DrawsError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HazardError {
    #[error("density error: {0}")]
    Density(#[from] DensityError),
    #[error("draws error: {0}")]
    Draws(#[from] DrawsError),
    #[error("at least two cutpoints are required, found {0}")]
    TooFewCutpoints(usize),
    #[error("the first cutpoint must be 0, found {0}")]
    FirstCutpointNotZero(f64),
    #[error("cutpoint {index} is {value}; only the last cutpoint may be +inf")]
    NonFiniteCutpoint { index: usize, value: f64 },
    #[error("cutpoint {index} does not exceed the one before it")]
    CutpointsNotIncreasing { index: usize },
    #[error("dataset has no observations")]
    Empty,
    #[error("time, event and covariate columns must have the same number of rows")]
    DimensionMismatch,
    #[error("observation {index}: time {time} must be finite and non-negative")]
    InvalidTime { index: usize, time: f64 },
    #[error("observation {index}: time {time} is not below the last cutpoint {last}")]
    TimeBeyondLastCutpoint { index: usize, time: f64, last: f64 },
    #[error("observation {index}: event indicator must be 0 or 1 (got {value})")]
    InvalidEventFlag { index: usize, value: u8 },
    #[error("observation {index}: covariate values must be finite")]
    NonFiniteCovariate { index: usize },
    #[error("expected {expected} interval hazards, found {found}")]
    HazardCount { expected: usize, found: usize },
    #[error("expected {expected} coefficients, found {found}")]
    CoefficientCount { expected: usize, found: usize },
    #[error("parameter vector has length {found}, expected {expected}")]
    ParameterLength { expected: usize, found: usize },
    #[error("evaluation grid must be finite, non-negative and non-decreasing")]
    InvalidGrid,
}
