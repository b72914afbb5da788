//! Two-phase vertical descent integrator
//!
//! Altitude `h` is positive upward, velocity `v` is positive downward:
//!
//! ```text
//! dh/dt = -v
//! dv/dt = g_lunar - T/m    powered braking, until v <= v_target
//! dv/dt = g_lunar          engine-off free fall, until h <= 0
//! ```
//!
//! Velocity is advanced with explicit Euler and altitude with the freshly
//! updated velocity (semi-implicit Euler), which is first order in `dt`.
//! The loop stops on the first step that ends at or below the surface, so the
//! reported touchdown state lies up to one step of travel below `h = 0`.

use serde::Serialize;
use tracing::warn;

use crate::config::{BurnProfile, DescentConfig};
use crate::{ensure, LanderError};

/// State recorded at the start of one integration step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrajectorySample {
    pub time: f64,
    pub altitude: f64,
    pub velocity: f64,
    pub acceleration: f64,
    pub g_load: f64,
}

/// History and safety metrics of one descent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulationResult {
    pub times: Vec<f64>,
    pub altitudes: Vec<f64>,
    pub velocities: Vec<f64>,
    pub accelerations: Vec<f64>,
    pub g_loads: Vec<f64>,
    pub touchdown_velocity: f64,
    pub max_g_load: f64,
    pub success: bool,
    /// Altitude after the last update; <= 0 unless `max_time` was hit first.
    pub final_altitude: f64,
    pub final_time: f64,
    /// Time at which the braking burn reached `v_target` above the surface.
    pub cutoff_time: Option<f64>,
}

impl SimulationResult {
    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn sample(&self, index: usize) -> Option<TrajectorySample> {
        (index < self.len()).then(|| TrajectorySample {
            time: self.times[index],
            altitude: self.altitudes[index],
            velocity: self.velocities[index],
            acceleration: self.accelerations[index],
            g_load: self.g_loads[index],
        })
    }

    pub fn samples(&self) -> impl Iterator<Item = TrajectorySample> + '_ {
        (0..self.len()).filter_map(|index| self.sample(index))
    }

    pub fn reached_surface(&self) -> bool {
        self.final_altitude <= 0.0
    }
}

#[derive(Debug, Clone, Copy)]
struct DescentState {
    t: f64,
    h: f64,
    v: f64,
}

impl DescentState {
    fn record(&self, acceleration: f64, g_load: f64) -> TrajectorySample {
        TrajectorySample {
            time: self.t,
            altitude: self.h,
            velocity: self.v,
            acceleration,
            g_load,
        }
    }

    fn advance(&mut self, acceleration: f64, dt: f64) {
        self.v += acceleration * dt;
        self.h -= self.v * dt;
        self.t += dt;
    }

    fn airborne(&self, config: &DescentConfig) -> bool {
        self.t < config.max_time && self.h > 0.0
    }
}

/// Integrates one descent from burn start to touchdown.
///
/// Fails with [`LanderError::InvalidParameter`] for a non-positive mass,
/// non-finite initial state, or an invalid burn profile / descent config.
/// Running into `max_time` is not an error; check
/// [`SimulationResult::reached_surface`].
pub fn simulate_descent(
    mass: f64,
    initial_altitude: f64,
    initial_velocity: f64,
    burn_profile: &BurnProfile,
    config: &DescentConfig,
) -> Result<SimulationResult, LanderError> {
    let result = integrate_descent(
        mass,
        initial_altitude,
        initial_velocity,
        burn_profile,
        config,
    )?;

    if !result.reached_surface() {
        warn!(
            max_time = config.max_time,
            altitude = result.final_altitude,
            "descent hit max_time before touchdown"
        );
    }

    Ok(result)
}

/// [`simulate_descent`] without the `max_time` warning. Batch drivers count
/// those cases instead of logging each one.
pub(crate) fn integrate_descent(
    mass: f64,
    initial_altitude: f64,
    initial_velocity: f64,
    burn_profile: &BurnProfile,
    config: &DescentConfig,
) -> Result<SimulationResult, LanderError> {
    ensure(mass.is_finite() && mass > 0.0, || {
        format!("mass must be finite and > 0, got {mass}")
    })?;
    ensure(initial_altitude.is_finite(), || {
        format!("initial altitude must be finite, got {initial_altitude}")
    })?;
    ensure(initial_velocity.is_finite(), || {
        format!("initial velocity must be finite, got {initial_velocity}")
    })?;
    burn_profile.validate()?;
    config.validate()?;

    let mut state = DescentState {
        t: 0.0,
        h: initial_altitude,
        v: initial_velocity,
    };
    let mut samples: Vec<TrajectorySample> = Vec::with_capacity(config.step_capacity_hint());
    let mut max_g_load = 0.0_f64;

    // Phase 1: powered braking at constant thrust.
    let braking_acceleration = config.g_lunar - burn_profile.thrust / mass;
    let braking_g_load = braking_acceleration.abs() / config.g0;
    while state.airborne(config) && state.v > burn_profile.v_target {
        max_g_load = max_g_load.max(braking_g_load);
        samples.push(state.record(braking_acceleration, braking_g_load));
        state.advance(braking_acceleration, config.dt);
    }

    let cutoff_time = state.airborne(config).then_some(state.t);

    // Phase 2: engine off, crew weightless.
    while state.airborne(config) {
        samples.push(state.record(config.g_lunar, 0.0));
        state.advance(config.g_lunar, config.dt);
    }

    let touchdown_velocity = state.v;
    Ok(SimulationResult {
        success: config.is_safe(touchdown_velocity, max_g_load),
        touchdown_velocity,
        max_g_load,
        final_altitude: state.h,
        final_time: state.t,
        cutoff_time,
        ..into_columns(samples)
    })
}

fn into_columns(samples: Vec<TrajectorySample>) -> SimulationResult {
    let n = samples.len();
    let mut result = SimulationResult {
        times: Vec::with_capacity(n),
        altitudes: Vec::with_capacity(n),
        velocities: Vec::with_capacity(n),
        accelerations: Vec::with_capacity(n),
        g_loads: Vec::with_capacity(n),
        touchdown_velocity: 0.0,
        max_g_load: 0.0,
        success: false,
        final_altitude: 0.0,
        final_time: 0.0,
        cutoff_time: None,
    };

    for sample in samples {
        result.times.push(sample.time);
        result.altitudes.push(sample.altitude);
        result.velocities.push(sample.velocity);
        result.accelerations.push(sample.acceleration);
        result.g_loads.push(sample.g_load);
    }

    result
}
