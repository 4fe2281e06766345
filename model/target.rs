//! Sampler-facing interface.
//!
//! An external inference engine sees a model only through [`LogDensity`]: an
//! unconstrained parameter vector goes in, the log-posterior (up to an additive
//! constant) and its gradient come out. Implementations are pure and
//! `Send + Sync`; fixed data lives behind `Arc` so that cloning a target for
//! each chain shares it instead of copying it.

use ndarray::{Array1, ArrayView1};

pub trait LogDensity: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Length of the unconstrained parameter vector.
    fn dim(&self) -> usize;

    /// One name per unconstrained coordinate, in order.
    fn parameter_names(&self) -> Vec<String>;

    fn log_density_and_gradient(
        &self,
        theta: ArrayView1<'_, f64>,
    ) -> Result<(f64, Array1<f64>), Self::Error>;

    fn log_density(&self, theta: ArrayView1<'_, f64>) -> Result<f64, Self::Error> {
        self.log_density_and_gradient(theta).map(|(value, _)| value)
    }
}

/// Central-difference gradient of any target.
///
/// Useful for targets without an analytic gradient and for checking the ones
/// that have one.
pub fn central_difference_gradient<T>(
    target: &T,
    theta: ArrayView1<'_, f64>,
    step: f64,
) -> Result<Array1<f64>, T::Error>
where
    T: LogDensity + ?Sized,
{
    let mut gradient = Array1::<f64>::zeros(theta.len());
    let mut probe = theta.to_owned();
    for i in 0..theta.len() {
        let h = step * theta[i].abs().max(1.0);
        probe[i] = theta[i] + h;
        let forward = target.log_density(probe.view())?;
        probe[i] = theta[i] - h;
        let backward = target.log_density(probe.view())?;
        probe[i] = theta[i];
        gradient[i] = (forward - backward) / (2.0 * h);
    }
    Ok(gradient)
}
