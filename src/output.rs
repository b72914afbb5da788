use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Utc;
use plotters::prelude::*;
use serde::Serialize;

use crate::config::BatchConfig;
use crate::monte_carlo::{MonteCarloResults, MonteCarloSummary, SampleRow};
use crate::sim::SimulationResult;
use crate::verification::ConvergencePoint;

pub const DEFAULT_HISTOGRAM_BINS: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HistogramBin {
    pub lower: f64,
    pub upper: f64,
    pub count: usize,
}

/// Equal-width bins spanning the finite values. The maximum lands in the
/// last bin; a constant input gets a unit-wide range centred on it.
pub fn histogram(values: &[f64], bins: usize) -> Vec<HistogramBin> {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() || bins == 0 {
        return Vec::new();
    }

    let mut lo = finite.iter().copied().fold(f64::INFINITY, f64::min);
    let mut hi = finite.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if hi - lo <= f64::EPSILON * lo.abs().max(1.0) {
        lo -= 0.5;
        hi += 0.5;
    }

    let width = (hi - lo) / bins as f64;
    let mut out: Vec<HistogramBin> = (0..bins)
        .map(|i| HistogramBin {
            lower: lo + width * i as f64,
            upper: if i + 1 == bins {
                hi
            } else {
                lo + width * (i + 1) as f64
            },
            count: 0,
        })
        .collect();

    for v in finite {
        let idx = (((v - lo) / width) as usize).min(bins - 1);
        out[idx].count += 1;
    }

    out
}

#[derive(Debug, Clone, Serialize)]
pub struct TrajectoryRow {
    pub time_s: f64,
    pub altitude_m: f64,
    pub velocity_mps: f64,
    pub acceleration_mps2: f64,
    pub g_load: f64,
}

pub fn trajectory_rows(result: &SimulationResult) -> Vec<TrajectoryRow> {
    result
        .samples()
        .map(|s| TrajectoryRow {
            time_s: s.time,
            altitude_m: s.altitude,
            velocity_mps: s.velocity,
            acceleration_mps2: s.acceleration,
            g_load: s.g_load,
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct OutputFiles {
    pub output_dir: PathBuf,
    pub samples_csv_path: PathBuf,
    pub summary_path: PathBuf,
    pub trajectory_csv_path: PathBuf,
    pub plot_touchdown_path: PathBuf,
    pub plot_g_load_path: PathBuf,
    pub plot_trajectory_path: PathBuf,
}

impl OutputFiles {
    pub fn in_dir(output_dir: &Path) -> Self {
        Self {
            output_dir: output_dir.to_path_buf(),
            samples_csv_path: output_dir.join("samples.csv"),
            summary_path: output_dir.join("summary.json"),
            trajectory_csv_path: output_dir.join("nominal_trajectory.csv"),
            plot_touchdown_path: output_dir.join("hist_touchdown_speed.png"),
            plot_g_load_path: output_dir.join("hist_max_g_load.png"),
            plot_trajectory_path: output_dir.join("nominal_altitude.png"),
        }
    }
}

/// Contents of `summary.json`.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub batch: BatchConfig,
    pub parallel: bool,
    pub summary: MonteCarloSummary,
    pub nominal_touchdown_velocity: f64,
    pub nominal_max_g_load: f64,
    pub outputs: OutputFiles,
}

pub fn create_timestamped_run_dir(base_dir: &Path) -> anyhow::Result<PathBuf> {
    fs::create_dir_all(base_dir).with_context(|| {
        format!(
            "failed to create output base directory {}",
            base_dir.display()
        )
    })?;

    let timestamp = Utc::now().format("%Y%m%d-%H%M%S").to_string();
    let mut run_dir = base_dir.join(&timestamp);
    let mut counter: usize = 1;
    while run_dir.exists() {
        run_dir = base_dir.join(format!("{timestamp}-{counter:02}"));
        counter += 1;
    }

    fs::create_dir_all(&run_dir)
        .with_context(|| format!("failed to create run directory {}", run_dir.display()))?;
    Ok(run_dir)
}

pub fn write_csv<T: Serialize>(path: &Path, rows: &[T]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("failed to open CSV path {}", path.display()))?;

    for row in rows {
        writer.serialize(row)?;
    }

    writer.flush()?;
    Ok(())
}

pub fn write_samples_csv(path: &Path, rows: &[SampleRow]) -> anyhow::Result<()> {
    write_csv(path, rows)
}

pub fn write_trajectory_csv(path: &Path, result: &SimulationResult) -> anyhow::Result<()> {
    write_csv(path, &trajectory_rows(result))
}

pub fn write_convergence_csv(path: &Path, points: &[ConvergencePoint]) -> anyhow::Result<()> {
    write_csv(path, points)
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let data = serde_json::to_string_pretty(value)?;
    fs::write(path, data).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

pub fn make_plots(
    results: &MonteCarloResults,
    nominal: &SimulationResult,
    files: &OutputFiles,
    bins: usize,
) -> anyhow::Result<()> {
    let speeds: Vec<f64> = results.touchdown_velocities.iter().map(|v| v.abs()).collect();
    plot_histogram(
        &files.plot_touchdown_path,
        "Touchdown speed distribution",
        "Touchdown vertical speed [m/s]",
        &histogram(&speeds, bins),
    )?;
    plot_histogram(
        &files.plot_g_load_path,
        "Max g-load distribution",
        "Maximum g-load [g]",
        &histogram(&results.max_g_loads, bins),
    )?;
    plot_altitude(nominal, &files.plot_trajectory_path)?;
    Ok(())
}

fn plot_histogram(
    path: &Path,
    title: &str,
    x_desc: &str,
    bins: &[HistogramBin],
) -> anyhow::Result<()> {
    let (Some(first), Some(last)) = (bins.first(), bins.last()) else {
        return Ok(());
    };

    let root = BitMapBackend::new(path, (1280, 720)).into_drawing_area();
    root.fill(&WHITE)?;

    let max_count = bins.iter().map(|b| b.count).max().unwrap_or(1).max(1) as f64;

    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 34).into_font())
        .margin(20)
        .x_label_area_size(50)
        .y_label_area_size(70)
        .build_cartesian_2d(first.lower..last.upper, 0.0..max_count * 1.05)?;

    chart
        .configure_mesh()
        .x_desc(x_desc)
        .y_desc("Count")
        .draw()?;

    chart.draw_series(bins.iter().map(|b| {
        Rectangle::new(
            [(b.lower, 0.0), (b.upper, b.count as f64)],
            BLUE.mix(0.6).filled(),
        )
    }))?;

    root.present()?;
    Ok(())
}

/// Log-log plot of maximum altitude error against `dt`. A first-order
/// integrator shows up as a line of slope one.
pub fn plot_convergence(points: &[ConvergencePoint], path: &Path) -> anyhow::Result<()> {
    let Some(((dt_lo, dt_hi), (err_lo, err_hi))) = convergence_ranges(points) else {
        return Ok(());
    };

    let root = BitMapBackend::new(path, (1280, 720)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(
            "Free-fall convergence of the descent integrator",
            ("sans-serif", 34).into_font(),
        )
        .margin(20)
        .x_label_area_size(50)
        .y_label_area_size(70)
        .build_cartesian_2d(
            (dt_lo..dt_hi).log_scale(),
            (err_lo..err_hi).log_scale(),
        )?;

    chart
        .configure_mesh()
        .x_desc("Time step dt [s]")
        .y_desc("Max altitude error [m]")
        .draw()?;

    let usable = || {
        points
            .iter()
            .filter(|p| p.dt > 0.0 && p.max_error > 0.0)
            .map(|p| (p.dt, p.max_error))
    };
    chart.draw_series(LineSeries::new(usable(), &BLUE))?;
    chart.draw_series(usable().map(|xy| Circle::new(xy, 5, BLUE.filled())))?;

    root.present()?;
    Ok(())
}

/// Axis ranges for [`plot_convergence`], padded by a factor of two on each
/// side. `None` when no point has a positive `dt` and error.
fn convergence_ranges(points: &[ConvergencePoint]) -> Option<((f64, f64), (f64, f64))> {
    let usable: Vec<&ConvergencePoint> = points
        .iter()
        .filter(|p| p.dt > 0.0 && p.max_error > 0.0 && p.max_error.is_finite())
        .collect();
    if usable.is_empty() {
        return None;
    }

    let span = |values: Vec<f64>| {
        let lo = values.iter().copied().fold(f64::INFINITY, f64::min);
        let hi = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        (lo / 2.0, hi * 2.0)
    };
    Some((
        span(usable.iter().map(|p| p.dt).collect()),
        span(usable.iter().map(|p| p.max_error).collect()),
    ))
}

fn plot_altitude(result: &SimulationResult, path: &Path) -> anyhow::Result<()> {
    let root = BitMapBackend::new(path, (1280, 720)).into_drawing_area();
    root.fill(&WHITE)?;

    let max_time = result.times.last().copied().unwrap_or(1.0).max(1.0);
    let max_alt = result
        .altitudes
        .iter()
        .copied()
        .fold(0.0_f64, f64::max)
        .max(1.0);

    let mut chart = ChartBuilder::on(&root)
        .caption("Nominal descent altitude", ("sans-serif", 34).into_font())
        .margin(20)
        .x_label_area_size(50)
        .y_label_area_size(70)
        .build_cartesian_2d(0.0..max_time, 0.0..max_alt)?;

    chart
        .configure_mesh()
        .x_desc("Time [s]")
        .y_desc("Altitude [m]")
        .draw()?;

    chart.draw_series(LineSeries::new(
        result.samples().map(|s| (s.time, s.altitude)),
        &BLUE,
    ))?;

    if let Some(cutoff) = result.cutoff_time {
        chart.draw_series(LineSeries::new(
            vec![(cutoff, 0.0), (cutoff, max_alt)],
            RED.stroke_width(2),
        ))?;
    }

    root.present()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BurnProfile, DescentConfig};
    use crate::sim::simulate_descent;

    #[test]
    fn histogram_counts_every_finite_value() {
        let values = [0.0, 0.5, 1.0, 1.5, 2.0, f64::NAN];
        let bins = histogram(&values, 4);
        assert_eq!(bins.len(), 4);
        assert_eq!(bins.iter().map(|b| b.count).sum::<usize>(), 5);
        assert_eq!(bins[0].lower, 0.0);
        assert_eq!(bins[3].upper, 2.0);
        assert_eq!(bins[3].count, 2);
    }

    #[test]
    fn histogram_of_constant_values_has_width() {
        let bins = histogram(&[3.0, 3.0, 3.0], 2);
        assert_eq!(bins.len(), 2);
        assert!(bins[0].lower < 3.0 && bins[1].upper > 3.0);
        assert_eq!(bins.iter().map(|b| b.count).sum::<usize>(), 3);
    }

    #[test]
    fn histogram_of_nothing_is_empty() {
        assert!(histogram(&[], 10).is_empty());
        assert!(histogram(&[1.0], 0).is_empty());
    }

    #[test]
    fn trajectory_csv_has_one_row_per_step() {
        let burn = BurnProfile {
            thrust: 36_450.0,
            v_target: 2.0,
        };
        let config = DescentConfig {
            dt: 0.1,
            ..DescentConfig::default()
        };
        let result =
            simulate_descent(15_000.0, 1_000.0, 40.0, &burn, &config).expect("valid inputs");

        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("trajectory.csv");
        write_trajectory_csv(&path, &result).expect("csv written");

        let mut reader = csv::Reader::from_path(&path).expect("csv readable");
        let headers = reader.headers().expect("headers").clone();
        assert_eq!(&headers[0], "time_s");
        assert_eq!(&headers[4], "g_load");
        assert_eq!(reader.records().count(), result.len());
    }

    #[test]
    fn convergence_axes_cover_every_point() {
        let points = [
            ConvergencePoint {
                dt: 0.4,
                steps: 88,
                max_error: 11.3,
            },
            ConvergencePoint {
                dt: 0.05,
                steps: 703,
                max_error: 1.4,
            },
        ];
        let ((dt_lo, dt_hi), (err_lo, err_hi)) =
            convergence_ranges(&points).expect("positive points");
        assert!(dt_lo < 0.05 && dt_hi > 0.4);
        assert!(err_lo < 1.4 && err_hi > 11.3);
    }

    #[test]
    fn convergence_plot_skips_unplottable_points() {
        let zero_error = [ConvergencePoint {
            dt: 0.1,
            steps: 10,
            max_error: 0.0,
        }];
        assert!(convergence_ranges(&zero_error).is_none());

        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("convergence.png");
        plot_convergence(&zero_error, &path).expect("nothing to draw");
        assert!(!path.exists());
    }

    #[test]
    fn run_dirs_do_not_collide() {
        let base = tempfile::tempdir().expect("temp dir");
        let a = create_timestamped_run_dir(base.path()).expect("first dir");
        let b = create_timestamped_run_dir(base.path()).expect("second dir");
        assert_ne!(a, b);
        assert!(a.is_dir() && b.is_dir());
    }
}
