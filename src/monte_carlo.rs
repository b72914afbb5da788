//! Monte Carlo driver
//!
//! Each sample draws mass, burn-start altitude, burn-start velocity and thrust
//! (in that order) from independent Gaussians and integrates one descent.
//! Safe-landing estimates converge as O(1/sqrt(n_samples)).

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, trace, warn};

use crate::config::{BurnProfile, DescentConfig, MonteCarloConfig};
use crate::sim::integrate_descent;
use crate::LanderError;

/// Aggregated per-sample outputs of one batch. Index `i` of every array
/// refers to the same sampled trajectory.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonteCarloResults {
    pub touchdown_velocities: Vec<f64>,
    pub max_g_loads: Vec<f64>,
    pub successes: Vec<bool>,
    /// False where the descent ran into `max_time` still airborne.
    pub reached_surface: Vec<bool>,
    pub masses: Vec<f64>,
    pub initial_altitudes: Vec<f64>,
    pub initial_velocities: Vec<f64>,
    pub thrusts: Vec<f64>,
    pub config: MonteCarloConfig,
    pub descent_config: DescentConfig,
    pub burn_profile: BurnProfile,
}

#[derive(Debug, Clone, Serialize)]
pub struct SampleRow {
    pub sample: usize,
    pub mass_kg: f64,
    pub h0_m: f64,
    pub v0_mps: f64,
    pub thrust_n: f64,
    pub touchdown_velocity_mps: f64,
    pub max_g_load: f64,
    pub success: bool,
    pub reached_surface: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonteCarloSummary {
    pub n_samples: usize,
    pub seed: u64,
    pub safe_count: usize,
    pub safe_fraction: f64,
    pub safe_fraction_std_error: f64,
    pub timed_out_count: usize,
    pub mean_touchdown_velocity: f64,
    pub std_touchdown_velocity: f64,
    pub min_touchdown_velocity: f64,
    pub max_touchdown_velocity: f64,
    pub mean_max_g_load: f64,
    pub peak_g_load: f64,
    pub mass_mean: f64,
    pub mass_sigma: f64,
    pub h0_mean: f64,
    pub h0_sigma: f64,
    pub v0_mean: f64,
    pub v0_sigma: f64,
    pub thrust_nominal: f64,
    pub thrust_sigma: f64,
    pub v_target: f64,
}

#[derive(Debug, Clone, Copy)]
struct SampleDraw {
    mass: f64,
    h0: f64,
    v0: f64,
    thrust: f64,
}

#[derive(Debug, Clone, Copy)]
struct SampleOutcome {
    draw: SampleDraw,
    touchdown_velocity: f64,
    max_g_load: f64,
    success: bool,
    reached_surface: bool,
}

struct Dispersions {
    mass: Normal<f64>,
    h0: Normal<f64>,
    v0: Normal<f64>,
    thrust: Normal<f64>,
}

impl Dispersions {
    fn new(config: &MonteCarloConfig) -> Result<Self, LanderError> {
        let normal = |name: &str, mean: f64, sigma: f64| {
            Normal::new(mean, sigma).map_err(|e| {
                LanderError::InvalidParameter(format!("{name} distribution N({mean}, {sigma}): {e}"))
            })
        };

        Ok(Self {
            mass: normal("mass", config.mass_mean, config.mass_sigma)?,
            h0: normal("h0", config.h0_mean, config.h0_sigma)?,
            v0: normal("v0", config.v0_mean, config.v0_sigma)?,
            thrust: normal("thrust", config.thrust_nominal, config.thrust_sigma())?,
        })
    }

    // Draw order is part of the seed contract.
    fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> SampleDraw {
        let mass = self.mass.sample(rng);
        let h0 = self.h0.sample(rng);
        let v0 = self.v0.sample(rng);
        let thrust = self.thrust.sample(rng);
        SampleDraw {
            mass,
            h0,
            v0,
            thrust,
        }
    }
}

fn integrate_sample(
    index: usize,
    draw: SampleDraw,
    v_target: f64,
    descent_config: &DescentConfig,
) -> Result<SampleOutcome, LanderError> {
    let burn = BurnProfile {
        thrust: draw.thrust,
        v_target,
    };
    let result = integrate_descent(draw.mass, draw.h0, draw.v0, &burn, descent_config).map_err(
        |LanderError::InvalidParameter(reason)| {
            LanderError::InvalidParameter(format!("sample {index}: {reason}"))
        },
    )?;

    trace!(
        sample = index,
        mass = draw.mass,
        h0 = draw.h0,
        v0 = draw.v0,
        thrust = draw.thrust,
        touchdown_velocity = result.touchdown_velocity,
        success = result.success,
        "sample integrated"
    );
    if !result.reached_surface() {
        debug!(
            sample = index,
            altitude = result.final_altitude,
            "sample hit max_time before touchdown"
        );
    }

    Ok(SampleOutcome {
        draw,
        touchdown_velocity: result.touchdown_velocity,
        max_g_load: result.max_g_load,
        success: result.success,
        reached_surface: result.reached_surface(),
    })
}

fn validate_batch(
    mc_config: &MonteCarloConfig,
    descent_config: &DescentConfig,
    burn_profile: &BurnProfile,
) -> Result<Dispersions, LanderError> {
    mc_config.validate()?;
    descent_config.validate()?;
    burn_profile.validate()?;
    Dispersions::new(mc_config)
}

/// Runs `n_samples` independent descents from one seeded random stream.
///
/// Identical configs and seed give bit-identical results. The first sample
/// the integrator rejects (e.g. a non-positive drawn mass) aborts the batch.
/// `burn_profile` only contributes its `v_target`; thrust is drawn per sample.
pub fn run_monte_carlo(
    mc_config: &MonteCarloConfig,
    descent_config: &DescentConfig,
    burn_profile: &BurnProfile,
) -> Result<MonteCarloResults, LanderError> {
    let dispersions = validate_batch(mc_config, descent_config, burn_profile)?;
    info!(
        n_samples = mc_config.n_samples,
        seed = mc_config.seed,
        "starting sequential Monte Carlo batch"
    );

    let mut rng = ChaCha8Rng::seed_from_u64(mc_config.seed);
    let mut outcomes = Vec::with_capacity(mc_config.n_samples);
    for index in 0..mc_config.n_samples {
        let draw = dispersions.draw(&mut rng);
        outcomes.push(integrate_sample(
            index,
            draw,
            burn_profile.v_target,
            descent_config,
        )?);
    }

    Ok(finish_batch(outcomes, mc_config, descent_config, burn_profile))
}

/// Parallel variant of [`run_monte_carlo`].
///
/// Sample `i` draws from its own ChaCha8 generator seeded with the batch seed
/// and switched to stream `i`, so results are reproducible for a seed and
/// independent of the thread count, but differ numerically from the
/// sequential driver. Every sample is integrated before errors are checked,
/// so a failing batch reports its lowest failing index, like the sequential
/// driver.
pub fn run_monte_carlo_parallel(
    mc_config: &MonteCarloConfig,
    descent_config: &DescentConfig,
    burn_profile: &BurnProfile,
) -> Result<MonteCarloResults, LanderError> {
    let dispersions = validate_batch(mc_config, descent_config, burn_profile)?;
    info!(
        n_samples = mc_config.n_samples,
        seed = mc_config.seed,
        threads = rayon::current_num_threads(),
        "starting parallel Monte Carlo batch"
    );

    let outcomes = (0..mc_config.n_samples)
        .into_par_iter()
        .map(|index| {
            let mut rng = ChaCha8Rng::seed_from_u64(mc_config.seed);
            rng.set_stream(index as u64);
            let draw = dispersions.draw(&mut rng);
            integrate_sample(index, draw, burn_profile.v_target, descent_config)
        })
        .collect::<Vec<_>>()
        .into_iter()
        .collect::<Result<Vec<_>, _>>()?;

    Ok(finish_batch(outcomes, mc_config, descent_config, burn_profile))
}

fn finish_batch(
    outcomes: Vec<SampleOutcome>,
    mc_config: &MonteCarloConfig,
    descent_config: &DescentConfig,
    burn_profile: &BurnProfile,
) -> MonteCarloResults {
    let n = outcomes.len();
    let mut results = MonteCarloResults {
        touchdown_velocities: Vec::with_capacity(n),
        max_g_loads: Vec::with_capacity(n),
        successes: Vec::with_capacity(n),
        reached_surface: Vec::with_capacity(n),
        masses: Vec::with_capacity(n),
        initial_altitudes: Vec::with_capacity(n),
        initial_velocities: Vec::with_capacity(n),
        thrusts: Vec::with_capacity(n),
        config: mc_config.clone(),
        descent_config: *descent_config,
        burn_profile: *burn_profile,
    };

    for outcome in outcomes {
        results.touchdown_velocities.push(outcome.touchdown_velocity);
        results.max_g_loads.push(outcome.max_g_load);
        results.successes.push(outcome.success);
        results.reached_surface.push(outcome.reached_surface);
        results.masses.push(outcome.draw.mass);
        results.initial_altitudes.push(outcome.draw.h0);
        results.initial_velocities.push(outcome.draw.v0);
        results.thrusts.push(outcome.draw.thrust);
    }

    let timed_out = results.timed_out_count();
    if timed_out > 0 {
        warn!(
            timed_out,
            n_samples = n,
            max_time = descent_config.max_time,
            "samples hit max_time before touchdown"
        );
    }
    info!(
        n_samples = n,
        safe_fraction = results.safe_fraction(),
        "Monte Carlo batch complete"
    );
    results
}

impl MonteCarloResults {
    pub fn len(&self) -> usize {
        self.touchdown_velocities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.touchdown_velocities.is_empty()
    }

    pub fn safe_count(&self) -> usize {
        self.successes.iter().filter(|&&ok| ok).count()
    }

    pub fn timed_out_count(&self) -> usize {
        self.reached_surface.iter().filter(|&&landed| !landed).count()
    }

    pub fn safe_fraction(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        self.safe_count() as f64 / self.len() as f64
    }

    pub fn mean_touchdown_velocity(&self) -> f64 {
        mean(&self.touchdown_velocities)
    }

    pub fn mean_max_g_load(&self) -> f64 {
        mean(&self.max_g_loads)
    }

    pub fn rows(&self) -> Vec<SampleRow> {
        (0..self.len())
            .map(|i| SampleRow {
                sample: i,
                mass_kg: self.masses[i],
                h0_m: self.initial_altitudes[i],
                v0_mps: self.initial_velocities[i],
                thrust_n: self.thrusts[i],
                touchdown_velocity_mps: self.touchdown_velocities[i],
                max_g_load: self.max_g_loads[i],
                success: self.successes[i],
                reached_surface: self.reached_surface[i],
            })
            .collect()
    }

    pub fn summary(&self) -> MonteCarloSummary {
        let n = self.len();
        let safe_fraction = self.safe_fraction();
        let safe_fraction_std_error = if n == 0 {
            0.0
        } else {
            (safe_fraction * (1.0 - safe_fraction) / n as f64).sqrt()
        };

        MonteCarloSummary {
            n_samples: n,
            seed: self.config.seed,
            safe_count: self.safe_count(),
            safe_fraction,
            safe_fraction_std_error,
            timed_out_count: self.timed_out_count(),
            mean_touchdown_velocity: self.mean_touchdown_velocity(),
            std_touchdown_velocity: std_dev(&self.touchdown_velocities),
            min_touchdown_velocity: fold_or_zero(&self.touchdown_velocities, f64::min),
            max_touchdown_velocity: fold_or_zero(&self.touchdown_velocities, f64::max),
            mean_max_g_load: self.mean_max_g_load(),
            peak_g_load: fold_or_zero(&self.max_g_loads, f64::max),
            mass_mean: self.config.mass_mean,
            mass_sigma: self.config.mass_sigma,
            h0_mean: self.config.h0_mean,
            h0_sigma: self.config.h0_sigma,
            v0_mean: self.config.v0_mean,
            v0_sigma: self.config.v0_sigma,
            thrust_nominal: self.config.thrust_nominal,
            thrust_sigma: self.config.thrust_sigma(),
            v_target: self.burn_profile.v_target,
        }
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let sum_sq: f64 = values.iter().map(|v| (v - m) * (v - m)).sum();
    (sum_sq / (values.len() - 1) as f64).sqrt()
}

fn fold_or_zero(values: &[f64], f: fn(f64, f64) -> f64) -> f64 {
    values.iter().copied().reduce(f).unwrap_or(0.0)
}
