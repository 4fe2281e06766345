//! Model configuration stored as TOML.
//!
//! ```toml
//! model = "piecewise_hazard"
//! cutpoints = [0.0, 2.0, 5.0, inf]
//! integration = "exact"
//! grid = [1.0, 2.0, 3.0]
//!
//! [priors.first]
//! expected_hazard = 0.05
//! precision = 10.0
//! ```

use crate::density::DensityError;
use crate::hazard::{
    Cutpoints, GridIntegration, HazardData, HazardError, HazardParams, HazardPriors,
    PiecewiseHazardModel, SurvivalCurves,
};
use crate::mismeasurement::{
    MismeasurementData, MismeasurementError, MismeasurementModel, MismeasurementPriors,
};
use crate::mixture::{MixtureError, MixturePriors, NormalMixtureModel};
use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read or write config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML config: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize config to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("Invalid prior in config: {0}")]
    InvalidPrior(#[from] DensityError),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum ModelConfig {
    Mismeasurement(MismeasurementConfig),
    Mixture(MixtureConfig),
    PiecewiseHazard(HazardConfig),
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MismeasurementConfig {
    #[serde(default)]
    pub priors: MismeasurementPriors,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixtureConfig {
    pub components: usize,
    #[serde(default)]
    pub priors: MixturePriors,
}

// Plain values are declared before the tables so the TOML layout stays flat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HazardConfig {
    pub cutpoints: Cutpoints,
    #[serde(default)]
    pub integration: GridIntegration,
    /// Times at which curves are reported.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub grid: Vec<f64>,
    #[serde(default)]
    pub priors: HazardPriors,
}

impl MismeasurementConfig {
    pub fn build(&self, data: MismeasurementData) -> Result<MismeasurementModel, MismeasurementError> {
        MismeasurementModel::new(data, self.priors)
    }
}

impl MixtureConfig {
    pub fn build(&self, values: Array1<f64>) -> Result<NormalMixtureModel, MixtureError> {
        NormalMixtureModel::new(values, self.components, self.priors)
    }
}

impl HazardConfig {
    pub fn build(&self, data: HazardData) -> Result<PiecewiseHazardModel, HazardError> {
        PiecewiseHazardModel::new(data, self.cutpoints.clone(), self.priors)
    }

    /// Curves on the configured grid with the configured integration mode.
    pub fn curves(
        &self,
        model: &PiecewiseHazardModel,
        params: &HazardParams,
        profile: ArrayView1<'_, f64>,
    ) -> Result<SurvivalCurves, HazardError> {
        let grid = Array1::from_vec(self.grid.clone());
        model.curves(params, profile, grid.view(), self.integration)
    }
}

impl ModelConfig {
    /// Checks hyperparameters without building a model.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            ModelConfig::Mismeasurement(config) => config.priors.validate()?,
            ModelConfig::Mixture(config) => {
                if config.components == 0 {
                    return Err(ConfigError::Invalid(
                        "a mixture needs at least one component".to_string(),
                    ));
                }
                config.priors.validate()?;
            }
            ModelConfig::PiecewiseHazard(config) => {
                config.priors.validate()?;
                let grid_ok = config.grid.iter().all(|&t| t.is_finite() && t >= 0.0)
                    && config.grid.windows(2).all(|w| w[0] <= w[1]);
                if !grid_ok {
                    return Err(ConfigError::Invalid(
                        "curve grid must be finite, non-negative and non-decreasing".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Saves the configuration in a human-readable TOML format.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let toml_string = fs::read_to_string(path)?;
        Self::from_toml_str(&toml_string)
    }
}
