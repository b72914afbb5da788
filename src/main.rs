use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use luna_lander::config::BatchConfig;
use luna_lander::output::{
    create_timestamped_run_dir, make_plots, plot_convergence, write_convergence_csv, write_json,
    write_samples_csv, write_trajectory_csv, OutputFiles, RunReport, DEFAULT_HISTOGRAM_BINS,
};
use luna_lander::{
    free_fall_convergence, observed_order, run_monte_carlo, run_monte_carlo_parallel,
    simulate_descent, FreeFallCase, MonteCarloSummary,
};

const LOG_ENV: &str = "LUNA_LANDER_LOG";

#[derive(Debug, Parser)]
#[command(author, version, about = "Monte Carlo simulation of LUNA-TIC human lunar landing")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a batch of randomized terminal descents and summarize landing safety
    MonteCarlo(MonteCarloArgs),
    /// Compare the integrator against the free-fall closed form at several step sizes
    Verify(VerifyArgs),
}

#[derive(Debug, Args)]
struct MonteCarloArgs {
    /// TOML batch config; flags below override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output base directory; each run gets a timestamped subdirectory
    #[arg(long, default_value = "output-luna-lander")]
    output: PathBuf,

    /// Number of Monte Carlo landing simulations
    #[arg(long)]
    samples: Option<usize>,

    /// Mean downward speed at burn start [m/s]
    #[arg(long)]
    v0_mean: Option<f64>,

    /// Nominal thrust as a multiple of the mean lander's lunar weight
    #[arg(long)]
    thrust_multiplier: Option<f64>,

    /// Engine cut-off speed [m/s]
    #[arg(long)]
    v_target: Option<f64>,

    /// Integration step [s]
    #[arg(long)]
    dt: Option<f64>,

    /// Random seed
    #[arg(long)]
    seed: Option<u64>,

    /// Integrate samples on all cores (per-sample random streams)
    #[arg(long, default_value_t = false)]
    parallel: bool,

    /// Skip PNG histograms
    #[arg(long, default_value_t = false)]
    no_plots: bool,

    /// Histogram bin count
    #[arg(long, default_value_t = DEFAULT_HISTOGRAM_BINS)]
    bins: usize,
}

#[derive(Debug, Args)]
struct VerifyArgs {
    /// Output base directory; each run gets a timestamped subdirectory
    #[arg(long, default_value = "output-luna-lander")]
    output: PathBuf,

    /// Initial altitude [m]
    #[arg(long, default_value_t = 1_000.0)]
    h0: f64,

    /// Initial downward speed [m/s]
    #[arg(long, default_value_t = 0.0)]
    v0: f64,

    /// Time steps to compare, coarse to fine [s]
    #[arg(long, value_delimiter = ',', default_values_t = vec![0.4, 0.2, 0.1, 0.05])]
    dts: Vec<f64>,

    /// Skip the log-log convergence PNG
    #[arg(long, default_value_t = false)]
    no_plots: bool,
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::MonteCarlo(args) => run_batch(&args),
        Command::Verify(args) => run_verify(&args),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_batch(args: &MonteCarloArgs) -> anyhow::Result<BatchConfig> {
    let mut batch = match &args.config {
        Some(path) => BatchConfig::from_toml_file(path)?,
        None => BatchConfig::default(),
    };

    if let Some(v) = args.samples {
        batch.monte_carlo.n_samples = v;
    }
    if let Some(v) = args.v0_mean {
        batch.monte_carlo.v0_mean = v;
    }
    if let Some(v) = args.seed {
        batch.monte_carlo.seed = v;
    }
    if let Some(v) = args.dt {
        batch.descent.dt = v;
    }
    if let Some(v) = args.v_target {
        batch.burn.v_target = v;
    }
    if let Some(multiplier) = args.thrust_multiplier {
        batch.monte_carlo = batch
            .monte_carlo
            .with_thrust_to_weight(multiplier, batch.descent.g_lunar);
        batch.burn.thrust = batch.monte_carlo.thrust_nominal;
    }

    batch.validate().context("invalid batch configuration")?;
    Ok(batch)
}

fn run_batch(args: &MonteCarloArgs) -> anyhow::Result<()> {
    anyhow::ensure!(args.bins > 0, "--bins must be > 0");
    let batch = load_batch(args)?;

    let results = if args.parallel {
        run_monte_carlo_parallel(&batch.monte_carlo, &batch.descent, &batch.burn)?
    } else {
        run_monte_carlo(&batch.monte_carlo, &batch.descent, &batch.burn)?
    };
    let summary = results.summary();

    let nominal = simulate_descent(
        batch.monte_carlo.mass_mean,
        batch.monte_carlo.h0_mean,
        batch.monte_carlo.v0_mean,
        &batch.burn,
        &batch.descent,
    )?;

    print_summary(&summary);

    let output_dir = create_timestamped_run_dir(&args.output)?;
    let files = OutputFiles::in_dir(&output_dir);
    write_samples_csv(&files.samples_csv_path, &results.rows())?;
    write_trajectory_csv(&files.trajectory_csv_path, &nominal)?;
    if !args.no_plots {
        make_plots(&results, &nominal, &files, args.bins)?;
    }

    let report = RunReport {
        batch,
        parallel: args.parallel,
        summary,
        nominal_touchdown_velocity: nominal.touchdown_velocity,
        nominal_max_g_load: nominal.max_g_load,
        outputs: files.clone(),
    };
    write_json(&files.summary_path, &report)?;

    info!(dir = %output_dir.display(), "run outputs written");
    print_path("Run directory", &output_dir);
    Ok(())
}

fn print_summary(summary: &MonteCarloSummary) {
    println!("--- LUNA-TIC Monte Carlo summary ---");
    println!("Total runs            : {}", summary.n_samples);
    println!(
        "Safe landing fraction : {:.3} (+/- {:.3})",
        summary.safe_fraction, summary.safe_fraction_std_error
    );
    println!(
        "Mean touchdown speed  : {:.2} m/s",
        summary.mean_touchdown_velocity
    );
    println!("Mean max g-load       : {:.2} g", summary.mean_max_g_load);
    println!(
        "Sampling              : mass N({:.0}, {:.0}) kg | h0 N({:.0}, {:.0}) m | v0 N({:.1}, {:.1}) m/s",
        summary.mass_mean,
        summary.mass_sigma,
        summary.h0_mean,
        summary.h0_sigma,
        summary.v0_mean,
        summary.v0_sigma
    );
    println!(
        "Thrust                : N({:.0}, {:.0}) N | cut-off {:.2} m/s | seed {}",
        summary.thrust_nominal, summary.thrust_sigma, summary.v_target, summary.seed
    );
}

fn run_verify(args: &VerifyArgs) -> anyhow::Result<()> {
    let case = FreeFallCase {
        h0: args.h0,
        v0: args.v0,
        dts: args.dts.clone(),
        ..FreeFallCase::default()
    };
    let points = free_fall_convergence(&case)?;
    let orders = observed_order(&points);

    println!("--- Free-fall convergence test ---");
    println!(
        "h0 = {:.1} m, v0 = {:.1} m/s, g = {:.2} m/s^2",
        case.h0, case.v0, case.g_lunar
    );
    println!("dt [s]   max |h_num - h_exact| [m]   order");
    for (i, point) in points.iter().enumerate() {
        let order = i
            .checked_sub(1)
            .and_then(|j| orders.get(j))
            .map(|p| format!("{p:.3}"))
            .unwrap_or_else(|| "-".to_string());
        println!("{:6.3}      {:10.5}              {}", point.dt, point.max_error, order);
    }

    let output_dir = create_timestamped_run_dir(&args.output)?;
    let path = output_dir.join("convergence.csv");
    write_convergence_csv(&path, &points)?;
    print_path("Convergence CSV", &path);

    if !args.no_plots {
        let plot_path = output_dir.join("convergence.png");
        plot_convergence(&points, &plot_path)?;
        print_path("Convergence plot", &plot_path);
    }
    Ok(())
}

fn print_path(label: &str, path: &Path) {
    println!("{label:<22}: {}", path.display());
}
