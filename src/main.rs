// src/main.rs
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use beadtf::transfer::{JsonRecordSource, NoiseShift};
use beadtf::{AnalysisConfig, CalibrationPipeline, PipelineOutput};
use clap::Parser;
use log::{info, warn};
use serde::Serialize;
use serde_json::json;

/// Build, calibrate and fit the bead transfer function from a set of
/// drive/response records.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON array of records
    #[arg(short, long)]
    records: PathBuf,
    /// Analysis configuration (JSON); defaults are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Volts per newton of the single-charge step calibration
    #[arg(long)]
    vpn: f64,
    /// Where to write the fitted transfer function
    #[arg(short, long, default_value = "transfer_function.json")]
    output: PathBuf,
    /// Where to write the implied charge
    #[arg(long)]
    charge_output: Option<PathBuf>,
    /// Seed for the noise-reference shift
    #[arg(long)]
    seed: Option<u64>,
    /// Also sample and invert on a linear grid: start,stop,points
    #[arg(long, value_delimiter = ',', num_args = 3)]
    grid: Option<Vec<f64>>,
    /// Where to write the inverted array when --grid is given
    #[arg(long, default_value = "tf_array.json")]
    grid_output: PathBuf,
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Serialize)]
struct InverseArrayFile {
    frequencies_hz: Vec<f64>,
    condition_numbers: Vec<f64>,
    /// [grid][drive][response] as (re, im)
    values: Vec<Vec<Vec<(f64, f64)>>>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let mut config = match &args.config {
        Some(path) => AnalysisConfig::from_json_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => AnalysisConfig::default(),
    };
    if let Some(seed) = args.seed {
        config.matrix.noise_shift = NoiseShift::Random { seed: Some(seed) };
    }

    let source = JsonRecordSource::open(&args.records)
        .with_context(|| format!("reading records from {}", args.records.display()))?;
    info!("loaded {} records", source.remaining());
    let mut pipeline = CalibrationPipeline::new(source, config)?;
    let output = pipeline.run(args.vpn).context("transfer function build failed")?;

    for (r, d) in output.transfer_function.failed_components() {
        warn!("component ({r}, {d}) has no model and cannot be evaluated");
    }
    write_json(&args.output, &output.transfer_function)?;
    info!("transfer function written to {}", args.output.display());

    if let Some(path) = &args.charge_output {
        write_json(path, &charge_summary(&output, args.vpn))?;
        info!("charge summary written to {}", path.display());
    }

    if let Some(bounds) = &args.grid {
        let grid = linear_grid(bounds)?;
        write_json(&args.grid_output, &inverse_array(&output, &grid)?)?;
        info!("inverted array written to {}", args.grid_output.display());
    }
    Ok(())
}

fn charge_summary(output: &PipelineOutput, vpn: f64) -> serde_json::Value {
    let cal = &output.calibration;
    json!({
        "volts_per_newton": vpn,
        "reference_freq_hz": cal.reference_freq_hz,
        "reference_magnitude": cal.reference_magnitude,
        "mean_low_freq_response": cal.mean_low_freq_response,
        "implied_charge_coulombs": cal.implied_charge_coulombs,
        "implied_charge_e": cal.implied_charge_e,
    })
}

fn linear_grid(bounds: &[f64]) -> Result<Vec<f64>> {
    let &[start, stop, points] = bounds else {
        bail!("--grid takes start,stop,points");
    };
    if !(points >= 2.0) || points.fract() != 0.0 || !(stop > start) {
        bail!("invalid grid {start},{stop},{points}");
    }
    let n = points as usize;
    let step = (stop - start) / (n - 1) as f64;
    Ok((0..n).map(|i| start + step * i as f64).collect())
}

fn inverse_array(output: &PipelineOutput, grid: &[f64]) -> Result<InverseArrayFile> {
    let forward = output.tf_array(grid)?;
    let condition_numbers = forward.condition_numbers();
    let inverse = forward.invert().context("inverting the sampled transfer function")?;
    let values = inverse
        .values
        .outer_iter()
        .map(|slice| {
            slice
                .rows()
                .into_iter()
                .map(|row| row.iter().map(|z| (z.re, z.im)).collect())
                .collect()
        })
        .collect();
    Ok(InverseArrayFile {
        frequencies_hz: inverse.frequencies_hz,
        condition_numbers,
        values,
    })
}

fn write_json(path: &Path, value: &impl Serialize) -> Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    fs::write(path, text).with_context(|| format!("writing {}", path.display()))
}
