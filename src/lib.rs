//! LUNA-TIC - terminal landing survivability
//!
//! A 1-DOF vertical descent model of a crewed lunar lander (constant-thrust
//! braking burn followed by engine-off free fall) wrapped in a seeded Monte
//! Carlo driver that estimates the fraction of safe landings under Gaussian
//! dispersions in mass, burn-start state and thrust.

pub mod config;
pub mod monte_carlo;
pub mod output;
pub mod sim;
pub mod verification;

use thiserror::Error;

pub use config::{nominal_thrust, BatchConfig, BurnProfile, DescentConfig, MonteCarloConfig};
pub use monte_carlo::{
    run_monte_carlo, run_monte_carlo_parallel, MonteCarloResults, MonteCarloSummary, SampleRow,
};
pub use sim::{simulate_descent, SimulationResult, TrajectorySample};
pub use verification::{free_fall_convergence, observed_order, ConvergencePoint, FreeFallCase};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum LanderError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

pub(crate) fn ensure(condition: bool, message: impl FnOnce() -> String) -> Result<(), LanderError> {
    if condition {
        Ok(())
    } else {
        Err(LanderError::InvalidParameter(message()))
    }
}
