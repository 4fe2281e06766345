use super::intervals::Cutpoints;
use super::HazardError;
use crate::density::{check_finite, check_non_negative, scaled};
use itertools::Itertools;
use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};

/// How the cumulative hazard is accumulated along an evaluation grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GridIntegration {
    /// Each grid step is charged the hazard at its left end. Lags the true
    /// cumulative hazard wherever a step straddles a cutpoint.
    #[default]
    LeftPoint,
    /// Integrates the piecewise-constant hazard exactly.
    Exact,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurvivalCurves {
    pub grid: Array1<f64>,
    pub hazard: Array1<f64>,
    pub cumulative_hazard: Array1<f64>,
    pub survival: Array1<f64>,
}

/// Baseline hazard in force at time `t`, the last interval extended to `+∞`.
pub fn baseline_hazard_at(cutpoints: &Cutpoints, hazards: ArrayView1<'_, f64>, t: f64) -> Option<f64> {
    cutpoints.locate_open(t).and_then(|k| hazards.get(k).copied())
}

fn validate_grid(grid: ArrayView1<'_, f64>) -> Result<(), HazardError> {
    let finite = grid.iter().all(|&t| t.is_finite() && t >= 0.0);
    let ordered = grid.iter().tuple_windows().all(|(a, b)| a <= b);
    if finite && ordered {
        Ok(())
    } else {
        Err(HazardError::InvalidGrid)
    }
}

/// Hazard, cumulative hazard and survival on `grid` for linear predictor `eta`.
pub fn survival_curves(
    cutpoints: &Cutpoints,
    hazards: ArrayView1<'_, f64>,
    eta: f64,
    grid: ArrayView1<'_, f64>,
    mode: GridIntegration,
) -> Result<SurvivalCurves, HazardError> {
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
    validate_grid(grid)?;

    let last = cutpoints.last();
    if last.is_finite() && grid.iter().any(|&t| t >= last) {
        log::warn!(
            "Evaluation grid reaches past the last cutpoint {last}; the final interval's hazard is carried forward."
        );
    }

    let n = grid.len();
    let mut hazard = Array1::<f64>::zeros(n);
    for (slot, &t) in grid.iter().enumerate() {
        hazard[slot] = baseline_hazard_at(cutpoints, hazards, t).ok_or(HazardError::InvalidGrid)?;
    }

    let mut cumulative = Array1::<f64>::zeros(n);
    match mode {
        GridIntegration::LeftPoint => {
            let mut previous_time = 0.0;
            let mut previous_hazard =
                baseline_hazard_at(cutpoints, hazards, 0.0).ok_or(HazardError::InvalidGrid)?;
            let mut running = 0.0;
            for (slot, &t) in grid.iter().enumerate() {
                running += previous_hazard * (t - previous_time);
                cumulative[slot] = running;
                previous_time = t;
                previous_hazard = hazard[slot];
            }
        }
        GridIntegration::Exact => {
            for (slot, &t) in grid.iter().enumerate() {
                cumulative[slot] = hazards.dot(&cutpoints.open_exposure_row(t));
            }
        }
    }

    let scale = eta.exp();
    hazard.mapv_inplace(|h| scaled(scale, h));
    cumulative.mapv_inplace(|h| scaled(scale, h));
    let survival = cumulative.mapv(|h| (-h).exp());

    Ok(SurvivalCurves {
        grid: grid.to_owned(),
        hazard,
        cumulative_hazard: cumulative,
        survival,
    })
}
