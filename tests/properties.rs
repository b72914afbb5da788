//! Batch-level and scenario properties of the descent model.

use std::path::PathBuf;

use approx::assert_relative_eq;
use proptest::prelude::*;

use luna_lander::config::{BatchConfig, LUNAR_GRAVITY};
use luna_lander::{
    free_fall_convergence, run_monte_carlo, run_monte_carlo_parallel, simulate_descent,
    BurnProfile, DescentConfig, FreeFallCase, LanderError, MonteCarloConfig, MonteCarloResults,
};

fn batch(config: &MonteCarloConfig, descent: &DescentConfig) -> MonteCarloResults {
    run_monte_carlo(config, descent, &BurnProfile::nominal(config)).expect("batch should run")
}

/// Largest representable value strictly below a positive `x`.
fn just_below(x: f64) -> f64 {
    assert!(x > 0.0);
    f64::from_bits(x.to_bits() - 1)
}

#[test]
fn same_seed_gives_bit_identical_batches() {
    let config = MonteCarloConfig {
        n_samples: 64,
        seed: 7,
        ..MonteCarloConfig::default()
    };
    let descent = DescentConfig::default();
    let a = batch(&config, &descent);
    let b = batch(&config, &descent);

    let bits = |v: &[f64]| v.iter().map(|x| x.to_bits()).collect::<Vec<_>>();
    assert_eq!(bits(&a.touchdown_velocities), bits(&b.touchdown_velocities));
    assert_eq!(bits(&a.max_g_loads), bits(&b.max_g_loads));
    assert_eq!(bits(&a.masses), bits(&b.masses));
    assert_eq!(bits(&a.thrusts), bits(&b.thrusts));
    assert_eq!(a.successes, b.successes);
}

#[test]
fn parallel_streams_differ_from_sequential_stream() {
    let config = MonteCarloConfig {
        n_samples: 16,
        ..MonteCarloConfig::default()
    };
    let descent = DescentConfig::default();
    let burn = BurnProfile::nominal(&config);
    let sequential = run_monte_carlo(&config, &descent, &burn).expect("batch should run");
    let parallel = run_monte_carlo_parallel(&config, &descent, &burn).expect("batch should run");

    assert_eq!(parallel.len(), sequential.len());
    assert_ne!(parallel.masses, sequential.masses);
}

#[test]
fn each_row_reproduces_its_own_trajectory() {
    let config = MonteCarloConfig {
        n_samples: 12,
        ..MonteCarloConfig::default()
    };
    let descent = DescentConfig::default();
    let results = batch(&config, &descent);

    for i in 0..results.len() {
        let burn = BurnProfile {
            thrust: results.thrusts[i],
            v_target: results.burn_profile.v_target,
        };
        let single = simulate_descent(
            results.masses[i],
            results.initial_altitudes[i],
            results.initial_velocities[i],
            &burn,
            &descent,
        )
        .expect("drawn parameters are valid");

        assert_eq!(single.touchdown_velocity, results.touchdown_velocities[i]);
        assert_eq!(single.max_g_load, results.max_g_loads[i]);
        assert_eq!(single.success, results.successes[i]);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn every_array_has_n_samples_entries(n_samples in 1usize..40, seed in any::<u64>()) {
        let config = MonteCarloConfig {
            n_samples,
            seed,
            ..MonteCarloConfig::default()
        };
        let descent = DescentConfig {
            dt: 0.1,
            ..DescentConfig::default()
        };
        let results = batch(&config, &descent);

        prop_assert_eq!(results.len(), n_samples);
        prop_assert_eq!(results.max_g_loads.len(), n_samples);
        prop_assert_eq!(results.successes.len(), n_samples);
        prop_assert_eq!(results.reached_surface.len(), n_samples);
        prop_assert_eq!(results.masses.len(), n_samples);
        prop_assert_eq!(results.initial_altitudes.len(), n_samples);
        prop_assert_eq!(results.initial_velocities.len(), n_samples);
        prop_assert_eq!(results.thrusts.len(), n_samples);
        prop_assert_eq!(results.rows().len(), n_samples);
    }
}

#[test]
fn free_fall_error_shrinks_linearly_with_dt() {
    let case = FreeFallCase::default();
    assert_eq!(case.dts, vec![0.4, 0.2, 0.1, 0.05]);

    let points = free_fall_convergence(&case).expect("valid case");
    for pair in points.windows(2) {
        let ratio = pair[0].max_error / pair[1].max_error;
        assert!(
            (1.8..=2.2).contains(&ratio),
            "error ratio {ratio} between dt={} and dt={}",
            pair[0].dt,
            pair[1].dt
        );
    }
    // Semi-implicit Euler lags the closed form by 0.5*g*t*dt.
    assert!(points[0].max_error > 10.0 && points[0].max_error < 12.0);
}

#[test]
fn free_fall_matches_closed_form_with_initial_speed() {
    let case = FreeFallCase {
        v0: 5.0,
        dts: vec![0.01],
        ..FreeFallCase::default()
    };
    let points = free_fall_convergence(&case).expect("valid case");
    assert!(points[0].max_error < 0.5, "{:?}", points[0]);
}

#[test]
fn limits_are_inclusive_at_the_boundary() {
    let burn = BurnProfile {
        thrust: 1.5 * 15_000.0 * LUNAR_GRAVITY,
        v_target: 2.0,
    };
    let reference = simulate_descent(15_000.0, 1_000.0, 40.0, &burn, &DescentConfig::default())
        .expect("valid inputs");

    let exact = DescentConfig {
        touchdown_velocity_limit: reference.touchdown_velocity,
        max_g_limit: reference.max_g_load,
        ..DescentConfig::default()
    };
    let at_limit = simulate_descent(15_000.0, 1_000.0, 40.0, &burn, &exact).expect("valid inputs");
    assert!(at_limit.success);

    let tight_speed = DescentConfig {
        touchdown_velocity_limit: just_below(reference.touchdown_velocity),
        ..exact
    };
    assert!(
        !simulate_descent(15_000.0, 1_000.0, 40.0, &burn, &tight_speed)
            .expect("valid inputs")
            .success
    );

    let tight_g = DescentConfig {
        max_g_limit: just_below(reference.max_g_load),
        ..exact
    };
    assert!(
        !simulate_descent(15_000.0, 1_000.0, 40.0, &burn, &tight_g)
            .expect("valid inputs")
            .success
    );
}

fn mean_safe_fraction(thrust_to_weight: f64, descent: &DescentConfig) -> f64 {
    let seeds = [11_u64, 12, 13, 14];
    let total: f64 = seeds
        .iter()
        .map(|&seed| {
            let config = MonteCarloConfig {
                n_samples: 200,
                seed,
                ..MonteCarloConfig::default()
            }
            .with_thrust_to_weight(thrust_to_weight, descent.g_lunar);
            batch(&config, descent).safe_fraction()
        })
        .sum();
    total / seeds.len() as f64
}

#[test]
fn more_thrust_lands_more_safely_when_braking_is_short() {
    // Thrust-to-weight 1.1 to 1.3 cannot null 40 m/s within 1000 m, so extra
    // thrust only lowers the impact speed.
    let descent = DescentConfig {
        dt: 0.05,
        touchdown_velocity_limit: 20.0,
        ..DescentConfig::default()
    };
    let fractions: Vec<f64> = [1.1, 1.2, 1.3]
        .iter()
        .map(|&ratio| mean_safe_fraction(ratio, &descent))
        .collect();

    assert!(
        fractions.windows(2).all(|w| w[1] >= w[0]),
        "safe fractions {fractions:?}"
    );
    assert!(fractions[2] > fractions[0], "safe fractions {fractions:?}");
}

#[test]
fn reference_scenario_lands_within_band() {
    let burn = BurnProfile {
        thrust: 1.5 * 15_000.0 * 1.62,
        v_target: 2.0,
    };
    let config = DescentConfig {
        g_lunar: 1.62,
        g0: 9.81,
        dt: 0.02,
        max_time: 600.0,
        ..DescentConfig::default()
    };
    let result = simulate_descent(15_000.0, 1_000.0, 40.0, &burn, &config).expect("valid inputs");

    assert!(result.reached_surface());
    assert!(result.final_time < config.max_time);
    assert_eq!(result.len(), 2510);

    // Braking ends ~15 m up, so the free fall finishes at ~7.3 m/s.
    let cutoff = result.cutoff_time.expect("burn ends above the surface");
    assert!((46.8..47.0).contains(&cutoff), "cutoff at {cutoff}");
    assert!(
        (7.2..=7.4).contains(&result.touchdown_velocity),
        "touchdown {}",
        result.touchdown_velocity
    );
    assert_relative_eq!(result.touchdown_velocity, 7.3084, epsilon = 1e-6);
    assert_relative_eq!(result.max_g_load, 0.81 / 9.81, epsilon = 1e-12);
    assert!(result.final_altitude <= 0.0 && result.final_altitude > -0.2);
    assert!(!result.success);
}

#[test]
fn invalid_batches_fail_before_sampling() {
    let descent = DescentConfig::default();

    let empty = MonteCarloConfig {
        n_samples: 0,
        ..MonteCarloConfig::default()
    };
    assert!(matches!(
        run_monte_carlo(&empty, &descent, &BurnProfile::nominal(&empty)),
        Err(LanderError::InvalidParameter(_))
    ));

    let negative_sigma = MonteCarloConfig {
        mass_sigma: -1.0,
        ..MonteCarloConfig::default()
    };
    assert!(run_monte_carlo_parallel(
        &negative_sigma,
        &descent,
        &BurnProfile::nominal(&negative_sigma)
    )
    .is_err());

    let bad_step = DescentConfig {
        dt: -0.01,
        ..DescentConfig::default()
    };
    let config = MonteCarloConfig::default();
    assert!(run_monte_carlo(&config, &bad_step, &BurnProfile::nominal(&config)).is_err());
}

#[test]
fn shipped_config_matches_defaults() {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("configs")
        .join("default.toml");
    let loaded = BatchConfig::from_toml_file(&path).expect("shipped config loads");
    assert_eq!(loaded, BatchConfig::default());
}
