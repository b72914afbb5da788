use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::{ensure, LanderError};

/// Lunar surface gravity [m/s^2]
pub const LUNAR_GRAVITY: f64 = 1.62;
/// Earth reference gravity used to express g-loads [m/s^2]
pub const EARTH_GRAVITY: f64 = 9.81;
/// Engine cut-off speed used when a batch does not supply a burn profile [m/s]
pub const DEFAULT_V_TARGET: f64 = 2.0;
/// Nominal thrust expressed as a multiple of the mean lander's lunar weight
pub const DEFAULT_THRUST_TO_WEIGHT: f64 = 1.5;

const MAX_PREALLOCATED_STEPS: usize = 1 << 16;

/// Time integration settings and human-rating limits for one descent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DescentConfig {
    /// Lunar gravity [m/s^2]
    pub g_lunar: f64,
    /// Earth g used to convert accelerations into g-loads [m/s^2]
    pub g0: f64,
    /// Fixed integration step [s]
    pub dt: f64,
    /// Safety cap on simulated time [s]
    pub max_time: f64,
    /// Largest |touchdown velocity| that still counts as a safe landing [m/s]
    pub touchdown_velocity_limit: f64,
    /// Largest g-load the crew may experience [g]
    pub max_g_limit: f64,
}

impl Default for DescentConfig {
    fn default() -> Self {
        Self {
            g_lunar: LUNAR_GRAVITY,
            g0: EARTH_GRAVITY,
            dt: 0.02,
            max_time: 600.0,
            touchdown_velocity_limit: 3.0,
            max_g_limit: 5.0,
        }
    }
}

impl DescentConfig {
    pub fn validate(&self) -> Result<(), LanderError> {
        ensure(self.g_lunar.is_finite(), || "g_lunar must be finite".into())?;
        ensure(self.g0.is_finite() && self.g0 > 0.0, || {
            format!("g0 must be finite and > 0, got {}", self.g0)
        })?;
        ensure(self.dt.is_finite() && self.dt > 0.0, || {
            format!("dt must be finite and > 0, got {}", self.dt)
        })?;
        ensure(self.max_time.is_finite() && self.max_time > 0.0, || {
            format!("max_time must be finite and > 0, got {}", self.max_time)
        })?;
        ensure(self.touchdown_velocity_limit >= 0.0, || {
            format!(
                "touchdown_velocity_limit must be >= 0, got {}",
                self.touchdown_velocity_limit
            )
        })?;
        ensure(self.max_g_limit >= 0.0, || {
            format!("max_g_limit must be >= 0, got {}", self.max_g_limit)
        })?;
        Ok(())
    }

    /// Landing classification. Both limits are inclusive.
    pub fn is_safe(&self, touchdown_velocity: f64, max_g_load: f64) -> bool {
        touchdown_velocity.abs() <= self.touchdown_velocity_limit
            && max_g_load <= self.max_g_limit
    }

    /// Upper bound on recorded steps, capped so a tiny `dt` does not force a
    /// huge up-front allocation.
    pub(crate) fn step_capacity_hint(&self) -> usize {
        let steps = (self.max_time / self.dt).ceil();
        if steps.is_finite() && steps > 0.0 {
            (steps as usize).min(MAX_PREALLOCATED_STEPS)
        } else {
            0
        }
    }
}

/// Constant-thrust terminal braking burn with a velocity cut-off.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BurnProfile {
    /// Engine thrust magnitude, acting upward [N]
    pub thrust: f64,
    /// The engine is cut once the downward speed drops to this value [m/s]
    pub v_target: f64,
}

impl BurnProfile {
    pub fn new(thrust: f64, v_target: f64) -> Result<Self, LanderError> {
        let profile = Self { thrust, v_target };
        profile.validate()?;
        Ok(profile)
    }

    /// Burn used for a batch when the caller does not supply one.
    pub fn nominal(config: &MonteCarloConfig) -> Self {
        Self {
            thrust: config.thrust_nominal,
            v_target: DEFAULT_V_TARGET,
        }
    }

    pub fn validate(&self) -> Result<(), LanderError> {
        ensure(self.thrust.is_finite() && self.thrust >= 0.0, || {
            format!("thrust must be finite and >= 0, got {}", self.thrust)
        })?;
        ensure(self.v_target.is_finite(), || {
            format!("v_target must be finite, got {}", self.v_target)
        })
    }
}

/// Thrust that is `thrust_to_weight` times the lunar weight of `mass`.
pub fn nominal_thrust(mass: f64, g_lunar: f64, thrust_to_weight: f64) -> f64 {
    thrust_to_weight * mass * g_lunar
}

/// Gaussian dispersions and sample count for a Monte Carlo batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonteCarloConfig {
    pub n_samples: usize,
    /// Lander mass [kg]
    pub mass_mean: f64,
    pub mass_sigma: f64,
    /// Altitude at burn start [m]
    pub h0_mean: f64,
    pub h0_sigma: f64,
    /// Downward speed at burn start [m/s]
    pub v0_mean: f64,
    pub v0_sigma: f64,
    /// Nominal engine thrust [N]
    pub thrust_nominal: f64,
    /// Thrust standard deviation as a fraction of `thrust_nominal`
    pub thrust_sigma_fraction: f64,
    pub seed: u64,
}

impl Default for MonteCarloConfig {
    fn default() -> Self {
        Self {
            n_samples: 1000,
            mass_mean: 15_000.0,
            mass_sigma: 500.0,
            h0_mean: 1_000.0,
            h0_sigma: 50.0,
            v0_mean: 40.0,
            v0_sigma: 5.0,
            thrust_nominal: 0.0,
            thrust_sigma_fraction: 0.10,
            seed: 1,
        }
        .with_thrust_to_weight(DEFAULT_THRUST_TO_WEIGHT, LUNAR_GRAVITY)
    }
}

impl MonteCarloConfig {
    /// Re-derives `thrust_nominal` from the configured `mass_mean`.
    pub fn with_thrust_to_weight(mut self, thrust_to_weight: f64, g_lunar: f64) -> Self {
        self.thrust_nominal = nominal_thrust(self.mass_mean, g_lunar, thrust_to_weight);
        self
    }

    pub fn thrust_sigma(&self) -> f64 {
        self.thrust_nominal * self.thrust_sigma_fraction
    }

    pub fn validate(&self) -> Result<(), LanderError> {
        ensure(self.n_samples >= 1, || "n_samples must be at least 1".into())?;

        let means = [
            ("mass_mean", self.mass_mean),
            ("h0_mean", self.h0_mean),
            ("v0_mean", self.v0_mean),
        ];
        for (name, value) in means {
            ensure(value.is_finite(), || format!("{name} must be finite, got {value}"))?;
        }

        let sigmas = [
            ("mass_sigma", self.mass_sigma),
            ("h0_sigma", self.h0_sigma),
            ("v0_sigma", self.v0_sigma),
            ("thrust_sigma_fraction", self.thrust_sigma_fraction),
        ];
        for (name, value) in sigmas {
            ensure(value.is_finite() && value >= 0.0, || {
                format!("{name} must be finite and >= 0, got {value}")
            })?;
        }

        ensure(
            self.thrust_nominal.is_finite() && self.thrust_nominal >= 0.0,
            || format!("thrust_nominal must be finite and >= 0, got {}", self.thrust_nominal),
        )
    }
}

/// Everything needed to run one batch, as loaded from a TOML file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchConfig {
    pub monte_carlo: MonteCarloConfig,
    pub descent: DescentConfig,
    pub burn: BurnProfile,
}

impl Default for BatchConfig {
    fn default() -> Self {
        let monte_carlo = MonteCarloConfig::default();
        let burn = BurnProfile::nominal(&monte_carlo);
        Self {
            monte_carlo,
            descent: DescentConfig::default(),
            burn,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct BatchFile {
    monte_carlo: MonteCarloSection,
    descent: DescentConfig,
    burn: BurnSection,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct MonteCarloSection {
    n_samples: usize,
    mass_mean: f64,
    mass_sigma: f64,
    h0_mean: f64,
    h0_sigma: f64,
    v0_mean: f64,
    v0_sigma: f64,
    thrust_nominal: Option<f64>,
    thrust_to_weight: Option<f64>,
    thrust_sigma_fraction: f64,
    seed: u64,
}

impl Default for MonteCarloSection {
    fn default() -> Self {
        let defaults = MonteCarloConfig::default();
        Self {
            n_samples: defaults.n_samples,
            mass_mean: defaults.mass_mean,
            mass_sigma: defaults.mass_sigma,
            h0_mean: defaults.h0_mean,
            h0_sigma: defaults.h0_sigma,
            v0_mean: defaults.v0_mean,
            v0_sigma: defaults.v0_sigma,
            thrust_nominal: None,
            thrust_to_weight: None,
            thrust_sigma_fraction: defaults.thrust_sigma_fraction,
            seed: defaults.seed,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct BurnSection {
    thrust: Option<f64>,
    v_target: f64,
}

impl Default for BurnSection {
    fn default() -> Self {
        Self {
            thrust: None,
            v_target: DEFAULT_V_TARGET,
        }
    }
}

impl BatchConfig {
    pub fn from_toml_file(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        Self::from_toml_str(&raw)
            .with_context(|| format!("failed to load batch config: {}", path.display()))
    }

    /// Parses a batch file. A missing `thrust_nominal` is derived from the
    /// file's own `mass_mean` and `g_lunar`, and a missing burn thrust follows
    /// the resolved `thrust_nominal`.
    pub fn from_toml_str(raw: &str) -> anyhow::Result<Self> {
        let file: BatchFile = toml::from_str(raw).context("failed to parse TOML batch config")?;
        let section = file.monte_carlo;

        anyhow::ensure!(
            section.thrust_nominal.is_none() || section.thrust_to_weight.is_none(),
            "set either monte_carlo.thrust_nominal or monte_carlo.thrust_to_weight, not both"
        );

        let mut monte_carlo = MonteCarloConfig {
            n_samples: section.n_samples,
            mass_mean: section.mass_mean,
            mass_sigma: section.mass_sigma,
            h0_mean: section.h0_mean,
            h0_sigma: section.h0_sigma,
            v0_mean: section.v0_mean,
            v0_sigma: section.v0_sigma,
            thrust_nominal: 0.0,
            thrust_sigma_fraction: section.thrust_sigma_fraction,
            seed: section.seed,
        };
        monte_carlo = match section.thrust_nominal {
            Some(thrust) => MonteCarloConfig {
                thrust_nominal: thrust,
                ..monte_carlo
            },
            None => monte_carlo.with_thrust_to_weight(
                section.thrust_to_weight.unwrap_or(DEFAULT_THRUST_TO_WEIGHT),
                file.descent.g_lunar,
            ),
        };

        let burn = BurnProfile {
            thrust: file.burn.thrust.unwrap_or(monte_carlo.thrust_nominal),
            v_target: file.burn.v_target,
        };

        let config = Self {
            monte_carlo,
            descent: file.descent,
            burn,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), LanderError> {
        self.monte_carlo.validate()?;
        self.descent.validate()?;
        self.burn.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_thrust_is_one_and_a_half_lunar_weights() {
        let config = MonteCarloConfig::default();
        assert_eq!(config.thrust_nominal, 1.5 * 15_000.0 * 1.62);
        assert_eq!(BurnProfile::nominal(&config).v_target, DEFAULT_V_TARGET);
    }

    #[test]
    fn thrust_follows_overridden_mass() {
        let config = MonteCarloConfig {
            mass_mean: 20_000.0,
            ..MonteCarloConfig::default()
        }
        .with_thrust_to_weight(2.0, LUNAR_GRAVITY);
        assert_eq!(config.thrust_nominal, 2.0 * 20_000.0 * 1.62);
    }

    #[test]
    fn safety_limits_are_inclusive() {
        let config = DescentConfig::default();
        assert!(config.is_safe(3.0, 5.0));
        assert!(config.is_safe(-3.0, 5.0));
        assert!(!config.is_safe(3.000_000_1, 5.0));
        assert!(!config.is_safe(3.0, 5.000_000_1));
    }

    #[test]
    fn rejects_degenerate_descent_config() {
        let zero_dt = DescentConfig {
            dt: 0.0,
            ..DescentConfig::default()
        };
        assert!(matches!(
            zero_dt.validate(),
            Err(LanderError::InvalidParameter(_))
        ));

        let negative_time = DescentConfig {
            max_time: -1.0,
            ..DescentConfig::default()
        };
        assert!(negative_time.validate().is_err());
    }

    #[test]
    fn rejects_zero_samples_and_negative_sigma() {
        let empty = MonteCarloConfig {
            n_samples: 0,
            ..MonteCarloConfig::default()
        };
        assert!(empty.validate().is_err());

        let negative = MonteCarloConfig {
            h0_sigma: -1.0,
            ..MonteCarloConfig::default()
        };
        let err = negative.validate().unwrap_err();
        assert!(err.to_string().contains("h0_sigma"));
    }

    #[test]
    fn burn_profile_rejects_negative_thrust() {
        assert!(BurnProfile::new(-1.0, 2.0).is_err());
        assert!(BurnProfile::new(0.0, 2.0).is_ok());
    }

    #[test]
    fn capacity_hint_is_capped() {
        let fine = DescentConfig {
            dt: 1e-6,
            ..DescentConfig::default()
        };
        assert_eq!(fine.step_capacity_hint(), MAX_PREALLOCATED_STEPS);
        assert_eq!(DescentConfig::default().step_capacity_hint(), 30_000);
    }

    #[test]
    fn empty_toml_matches_defaults() {
        let config = BatchConfig::from_toml_str("").expect("empty file is valid");
        assert_eq!(config, BatchConfig::default());
    }

    #[test]
    fn toml_derives_thrust_from_file_values() {
        let raw = r#"
            [monte_carlo]
            mass_mean = 20000.0

            [descent]
            g_lunar = 1.0
        "#;
        let config = BatchConfig::from_toml_str(raw).expect("valid config");
        assert_eq!(config.monte_carlo.thrust_nominal, 1.5 * 20_000.0);
        assert_eq!(config.burn.thrust, config.monte_carlo.thrust_nominal);
        assert_eq!(config.burn.v_target, DEFAULT_V_TARGET);
    }

    #[test]
    fn toml_rejects_conflicting_thrust_keys() {
        let raw = r#"
            [monte_carlo]
            thrust_nominal = 30000.0
            thrust_to_weight = 1.2
        "#;
        assert!(BatchConfig::from_toml_str(raw).is_err());
    }

    #[test]
    fn toml_rejects_unknown_descent_key() {
        let raw = r#"
            [monte_carlo]
            n_samples = 10

            [descent]
            dt_s = 0.5
        "#;
        let err = BatchConfig::from_toml_str(raw).unwrap_err();
        assert!(format!("{err:#}").contains("dt_s"), "{err:#}");

        let known = r#"
            [descent]
            dt = 0.5
        "#;
        let config = BatchConfig::from_toml_str(known).expect("valid config");
        assert_eq!(config.descent.dt, 0.5);
    }

    #[test]
    fn toml_rejects_invalid_values() {
        let raw = r#"
            [monte_carlo]
            n_samples = 0
        "#;
        assert!(BatchConfig::from_toml_str(raw).is_err());
    }
}
