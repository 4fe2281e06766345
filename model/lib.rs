#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

pub mod config;
pub mod density;
pub mod draws;
pub mod hazard;
pub mod logsumexp;
pub mod mismeasurement;
pub mod mixture;
pub mod posterior;
pub mod prior;
pub mod target;
pub mod transform;

pub use logsumexp::{MarginalTerms, log_sum_exp, marginalize, marginalize_with_gradient};
pub use posterior::StateProbabilities;
pub use target::LogDensity;
