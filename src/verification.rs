//! Free-fall convergence check for the descent integrator
//!
//! With the engine off the model has a closed form,
//! `h(t) = h0 - v0*t - 0.5*g*t^2`. Running the integrator at a sequence of
//! shrinking steps and comparing against it should show the maximum altitude
//! error shrinking linearly with `dt`.

use serde::Serialize;

use crate::config::{BurnProfile, DescentConfig};
use crate::sim::simulate_descent;
use crate::{ensure, LanderError};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FreeFallCase {
    /// Initial altitude [m]
    pub h0: f64,
    /// Initial downward speed [m/s]
    pub v0: f64,
    pub g_lunar: f64,
    /// Time steps to test, coarse to fine [s]
    pub dts: Vec<f64>,
    pub max_time: f64,
}

impl Default for FreeFallCase {
    fn default() -> Self {
        Self {
            h0: 1_000.0,
            v0: 0.0,
            g_lunar: 1.62,
            dts: vec![0.4, 0.2, 0.1, 0.05],
            max_time: 600.0,
        }
    }
}

impl FreeFallCase {
    pub fn analytic_altitude(&self, t: f64) -> f64 {
        self.h0 - self.v0 * t - 0.5 * self.g_lunar * t * t
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ConvergencePoint {
    pub dt: f64,
    pub steps: usize,
    pub max_error: f64,
}

/// Integrates the free-fall case once per `dt` and reports the largest
/// |h_num - h_exact| over the recorded history.
pub fn free_fall_convergence(case: &FreeFallCase) -> Result<Vec<ConvergencePoint>, LanderError> {
    ensure(!case.dts.is_empty(), || "at least one dt is required".into())?;

    // Zero thrust with the cut-off at v0 skips the powered phase entirely.
    let burn = BurnProfile::new(0.0, case.v0)?;

    case.dts
        .iter()
        .map(|&dt| -> Result<ConvergencePoint, LanderError> {
            let config = DescentConfig {
                g_lunar: case.g_lunar,
                dt,
                max_time: case.max_time,
                ..DescentConfig::default()
            };
            let result = simulate_descent(1.0, case.h0, case.v0, &burn, &config)?;
            let max_error = result
                .times
                .iter()
                .zip(&result.altitudes)
                .map(|(&t, &h)| (h - case.analytic_altitude(t)).abs())
                .fold(0.0, f64::max);

            Ok(ConvergencePoint {
                dt,
                steps: result.len(),
                max_error,
            })
        })
        .collect()
}

/// Observed order of accuracy between consecutive points,
/// `ln(e_i / e_{i+1}) / ln(dt_i / dt_{i+1})`.
pub fn observed_order(points: &[ConvergencePoint]) -> Vec<f64> {
    points
        .windows(2)
        .map(|pair| {
            let (coarse, fine) = (pair[0], pair[1]);
            (coarse.max_error / fine.max_error).ln() / (coarse.dt / fine.dt).ln()
        })
        .collect()
}
