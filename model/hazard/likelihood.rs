use super::curves::{GridIntegration, SurvivalCurves, survival_curves};
use super::intervals::Cutpoints;
use super::HazardError;
use crate::density::{DensityError, check_finite, check_non_negative, check_positive, scaled};
use crate::draws::PosteriorDraws;
use crate::prior::Prior;
use crate::target::LogDensity;
use crate::transform::{Transform, apply_prior};
use ndarray::{Array1, Array2, ArrayView1, s};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HazardData {
    pub time: Array1<f64>,
    pub event: Array1<u8>,
    pub covariates: Array2<f64>,
}

impl HazardData {
    pub fn validate(&self) -> Result<(), HazardError> {
        let n = self.time.len();
        if n == 0 {
            return Err(HazardError::Empty);
        }
        if self.event.len() != n || self.covariates.nrows() != n {
            return Err(HazardError::DimensionMismatch);
        }
        for i in 0..n {
            let time = self.time[i];
            if !time.is_finite() || time < 0.0 {
                return Err(HazardError::InvalidTime { index: i, time });
            }
            if self.event[i] > 1 {
                return Err(HazardError::InvalidEventFlag {
                    index: i,
                    value: self.event[i],
                });
            }
            if self.covariates.row(i).iter().any(|v| !v.is_finite()) {
                return Err(HazardError::NonFiniteCovariate { index: i });
            }
        }
        Ok(())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.time.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }
}

/// Gamma prior on an interval hazard given as a mean and a precision:
/// `shape = precision · expected_hazard`, `rate = precision`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GammaAnchor {
    pub expected_hazard: f64,
    pub precision: f64,
}

impl GammaAnchor {
    pub fn validate(&self) -> Result<(), DensityError> {
        check_positive("expected hazard", self.expected_hazard)?;
        check_positive("hazard prior precision", self.precision)?;
        Ok(())
    }

    pub fn prior(&self) -> Prior {
        Prior::Gamma {
            shape: self.precision * self.expected_hazard,
            rate: self.precision,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HazardPriors {
    /// Prior on the first interval.
    pub first: GammaAnchor,
    /// Prior shared by every later interval.
    pub rest: GammaAnchor,
    pub coefficient: Prior,
}

impl Default for HazardPriors {
    fn default() -> Self {
        Self {
            first: GammaAnchor {
                expected_hazard: 0.1,
                precision: 1.0,
            },
            rest: GammaAnchor {
                expected_hazard: 0.1,
                precision: 1.0,
            },
            coefficient: Prior::Normal { mean: 0.0, sd: 2.5 },
        }
    }
}

impl HazardPriors {
    pub fn validate(&self) -> Result<(), DensityError> {
        self.first.validate()?;
        self.rest.validate()?;
        self.coefficient.validate()
    }

    pub fn interval_prior(&self, k: usize) -> Prior {
        if k == 0 {
            self.first.prior()
        } else {
            self.rest.prior()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HazardParams {
    /// Baseline hazard per interval.
    pub hazards: Array1<f64>,
    pub coefficients: Array1<f64>,
}

impl HazardParams {
    pub fn validate(&self, intervals: usize, covariates: usize) -> Result<(), HazardError> {
        if self.hazards.len() != intervals {
            return Err(HazardError::HazardCount {
                expected: intervals,
                found: self.hazards.len(),
            });
        }
        if self.coefficients.len() != covariates {
            return Err(HazardError::CoefficientCount {
                expected: covariates,
                found: self.coefficients.len(),
            });
        }
        for &h in self.hazards.iter() {
            check_non_negative("interval hazard", h)?;
        }
        for &b in self.coefficients.iter() {
            check_finite("coefficient", b)?;
        }
        Ok(())
    }
}

/// Log-likelihood of one subject from its per-interval exposure.
fn subject_log_likelihood(
    hazards: ArrayView1<'_, f64>,
    exposure: ArrayView1<'_, f64>,
    event_interval: Option<usize>,
    eta: f64,
) -> Result<f64, HazardError> {
    let cumulative = check_finite("cumulative hazard", scaled(eta.exp(), hazards.dot(&exposure)))?;
    let mut total = -cumulative;
    if let Some(k) = event_interval {
        total += eta + hazards[k].ln();
    }
    Ok(total)
}

/// Log-likelihood contribution of a single subject followed until `time`.
///
/// `time` must lie in `[0, c_K)`. A zero hazard in the event interval gives `-∞`.
pub fn observation_log_likelihood(
    cutpoints: &Cutpoints,
    hazards: ArrayView1<'_, f64>,
    time: f64,
    event: bool,
    eta: f64,
) -> Result<f64, HazardError> {
    if hazards.len() != cutpoints.intervals() {
        return Err(HazardError::HazardCount {
            expected: cutpoints.intervals(),
            found: hazards.len(),
        });
    }
    for &h in hazards.iter() {
        check_non_negative("interval hazard", h)?;
    }
    check_finite("linear predictor", eta)?;
    if !time.is_finite() || time < 0.0 {
        return Err(HazardError::InvalidTime { index: 0, time });
    }
    let interval = cutpoints.locate(time).ok_or(HazardError::TimeBeyondLastCutpoint {
        index: 0,
        time,
        last: cutpoints.last(),
    })?;
    let exposure = cutpoints.exposure_row(time);
    let event_interval = event.then_some(interval);
    subject_log_likelihood(hazards, exposure.view(), event_interval, eta)
}

/// Evaluator over a fixed dataset and interval layout; cloning shares the data.
#[derive(Debug, Clone)]
pub struct PiecewiseHazardModel {
    data: Arc<HazardData>,
    cutpoints: Cutpoints,
    exposure: Arc<Array2<f64>>,
    event_interval: Arc<Vec<Option<usize>>>,
    priors: HazardPriors,
}

impl PiecewiseHazardModel {
    pub fn new(
        data: HazardData,
        cutpoints: Cutpoints,
        priors: HazardPriors,
    ) -> Result<Self, HazardError> {
        data.validate()?;
        priors.validate()?;

        let n = data.len();
        let intervals = cutpoints.intervals();
        let mut exposure = Array2::<f64>::zeros((n, intervals));
        let mut event_interval = Vec::with_capacity(n);
        for i in 0..n {
            let time = data.time[i];
            let interval = cutpoints
                .locate(time)
                .ok_or(HazardError::TimeBeyondLastCutpoint {
                    index: i,
                    time,
                    last: cutpoints.last(),
                })?;
            exposure.row_mut(i).assign(&cutpoints.exposure_row(time));
            event_interval.push((data.event[i] == 1).then_some(interval));
        }

        let events = event_interval.iter().filter(|k| k.is_some()).count();
        log::debug!(
            "Piecewise hazard: {} subjects, {} events, {} intervals, {} covariates",
            n,
            events,
            intervals,
            data.covariates.ncols()
        );
        for k in 0..intervals {
            if exposure.column(k).sum() == 0.0 {
                log::warn!(
                    "No follow-up time falls in interval {} [{}, {}); its hazard is informed only by the prior.",
                    k,
                    cutpoints.lower(k),
                    cutpoints.upper(k)
                );
            }
        }

        Ok(Self {
            data: Arc::new(data),
            cutpoints,
            exposure: Arc::new(exposure),
            event_interval: Arc::new(event_interval),
            priors,
        })
    }

    pub fn data(&self) -> &HazardData {
        &self.data
    }

    pub fn cutpoints(&self) -> &Cutpoints {
        &self.cutpoints
    }

    pub fn priors(&self) -> &HazardPriors {
        &self.priors
    }

    /// Time at risk per subject (rows) and interval (columns).
    pub fn exposure(&self) -> &Array2<f64> {
        &self.exposure
    }

    #[inline]
    pub fn intervals(&self) -> usize {
        self.cutpoints.intervals()
    }

    #[inline]
    pub fn num_covariates(&self) -> usize {
        self.data.covariates.ncols()
    }

    fn linear_predictor(&self, coefficients: ArrayView1<'_, f64>) -> Array1<f64> {
        self.data.covariates.dot(&coefficients)
    }

    pub fn log_likelihood(&self, params: &HazardParams) -> Result<f64, HazardError> {
        params.validate(self.intervals(), self.num_covariates())?;
        let eta = self.linear_predictor(params.coefficients.view());
        let mut total = 0.0;
        for i in 0..self.data.len() {
            total += subject_log_likelihood(
                params.hazards.view(),
                self.exposure.row(i),
                self.event_interval[i],
                eta[i],
            )?;
        }
        Ok(total)
    }

    pub fn log_prior(&self, params: &HazardParams) -> Result<f64, HazardError> {
        params.validate(self.intervals(), self.num_covariates())?;
        let mut total = 0.0;
        for (k, &h) in params.hazards.iter().enumerate() {
            total += self.priors.interval_prior(k).ln_pdf(h)?;
        }
        for &b in params.coefficients.iter() {
            total += self.priors.coefficient.ln_pdf(b)?;
        }
        Ok(total)
    }

    pub fn log_posterior(&self, params: &HazardParams) -> Result<f64, HazardError> {
        Ok(self.log_prior(params)? + self.log_likelihood(params)?)
    }

    /// Hazard, cumulative hazard and survival for a covariate profile.
    pub fn curves(
        &self,
        params: &HazardParams,
        profile: ArrayView1<'_, f64>,
        grid: ArrayView1<'_, f64>,
        mode: GridIntegration,
    ) -> Result<SurvivalCurves, HazardError> {
        params.validate(self.intervals(), self.num_covariates())?;
        if profile.len() != self.num_covariates() {
            return Err(HazardError::CoefficientCount {
                expected: self.num_covariates(),
                found: profile.len(),
            });
        }
        let eta = profile.dot(&params.coefficients);
        survival_curves(&self.cutpoints, params.hazards.view(), eta, grid, mode)
    }

    /// [`Self::curves`] for every draw, in draw order.
    pub fn curve_draws(
        &self,
        draws: &PosteriorDraws,
        profile: ArrayView1<'_, f64>,
        grid: ArrayView1<'_, f64>,
        mode: GridIntegration,
    ) -> Result<Vec<SurvivalCurves>, HazardError> {
        let selected = draws.select(&self.parameter_names())?;
        selected.map_draws(|theta| {
            let params = self.constrain(theta)?;
            self.curves(&params, profile, grid, mode)
        })
    }

    fn check_length(&self, theta: ArrayView1<'_, f64>) -> Result<(), HazardError> {
        if theta.len() != self.dim() {
            return Err(HazardError::ParameterLength {
                expected: self.dim(),
                found: theta.len(),
            });
        }
        Ok(())
    }

    pub fn constrain(&self, theta: ArrayView1<'_, f64>) -> Result<HazardParams, HazardError> {
        self.check_length(theta)?;
        let k = self.intervals();
        Ok(HazardParams {
            hazards: theta.slice(s![..k]).mapv(f64::exp),
            coefficients: theta.slice(s![k..]).to_owned(),
        })
    }

    /// Every hazard must be strictly positive.
    pub fn unconstrain(&self, params: &HazardParams) -> Result<Array1<f64>, HazardError> {
        params.validate(self.intervals(), self.num_covariates())?;
        let mut theta = Vec::with_capacity(self.dim());
        for &h in params.hazards.iter() {
            theta.push(Transform::Log.unconstrain(h)?);
        }
        theta.extend(params.coefficients.iter().copied());
        Ok(Array1::from_vec(theta))
    }
}

impl LogDensity for PiecewiseHazardModel {
    type Error = HazardError;

    fn dim(&self) -> usize {
        self.intervals() + self.num_covariates()
    }

    fn parameter_names(&self) -> Vec<String> {
        (1..=self.intervals())
            .map(|k| format!("log_hazard[{k}]"))
            .chain((1..=self.num_covariates()).map(|j| format!("coefficient[{j}]")))
            .collect()
    }

    fn log_density_and_gradient(
        &self,
        theta: ArrayView1<'_, f64>,
    ) -> Result<(f64, Array1<f64>), HazardError> {
        self.check_length(theta)?;
        let k_total = self.intervals();
        let mut gradient = Array1::<f64>::zeros(self.dim());
        let mut total = 0.0;

        let mut hazards = Array1::<f64>::zeros(k_total);
        for k in 0..k_total {
            let c = apply_prior(Transform::Log, &self.priors.interval_prior(k), theta[k])?;
            hazards[k] = c.value;
            total += c.ln_density;
            gradient[k] += c.gradient;
        }
        let coefficients = theta.slice(s![k_total..]);
        for (j, &b) in coefficients.iter().enumerate() {
            let c = apply_prior(Transform::Identity, &self.priors.coefficient, b)?;
            total += c.ln_density;
            gradient[k_total + j] += c.gradient;
        }

        let eta = self.linear_predictor(coefficients);
        for i in 0..self.data.len() {
            let exposure = self.exposure.row(i);
            let scale = eta[i].exp();
            let event_interval = self.event_interval[i];
            total += subject_log_likelihood(hazards.view(), exposure, event_interval, eta[i])?;

            // ∂/∂ln λ_k of −exp(η) λ_k E_k, and ∂/∂η of the whole subject term
            let mut cumulative = 0.0;
            for k in 0..k_total {
                let contribution = scaled(scale, hazards[k] * exposure[k]);
                gradient[k] -= contribution;
                cumulative += contribution;
            }
            let mut d_eta = -cumulative;
            if let Some(k) = event_interval {
                gradient[k] += 1.0;
                d_eta += 1.0;
            }
            for (j, &z) in self.data.covariates.row(i).iter().enumerate() {
                gradient[k_total + j] += d_eta * z;
            }
        }
        Ok((total, gradient))
    }
}
