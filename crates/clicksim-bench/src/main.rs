//! clicksim-bench: CLI tool for click-simulation experiments and diagnostics.
//!
//! Runs a simulated interaction loop on a synthetic spherical lesion
//! phantom. Each round asks the engine for clicks, rasterizes guidance,
//! and then lets a toy "model" grow its prediction around the lesion
//! clicks, so later rounds see a partially corrected prediction. Useful
//! for:
//!
//! - Comparing click strategies (global, probabilistic, patch-based)
//! - Tuning guidance sigma and disk mode
//! - Recording click sequences for later `REPLAY_FROM_FILE` runs
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin clicksim-bench -- [OPTIONS]
//! ```

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;
use clicksim_engine::{
    ClickConfig, ClickEngine, ClickError, ClickRecord, ClickSession, ClickStrategy,
    InteractionDiagnostics, LabelMap, RoundDiagnostics, Sample,
};
use clicksim_replay::ReplayDir;
use log::{debug, info};
use ndarray::{ArrayD, Dimension, IxDyn};
use rand::SeedableRng;
use rand::rngs::StdRng;

/// Click-simulation experiments for interactive segmentation training.
///
/// Runs a simulated annotator against a synthetic phantom with
/// configurable strategy and guidance parameters and prints per-round
/// outcomes, remaining errors and timings.
#[derive(Parser)]
#[command(name = "clicksim-bench", version)]
struct Cli {
    /// Spatial shape of the phantom, 2 or 3 comma-separated extents.
    #[arg(long, value_delimiter = ',', default_value = "32,32,32")]
    shape: Vec<usize>,

    /// Click strategy (REPLAY_FROM_FILE, GLOBAL_NON_CORRECTIVE,
    /// GLOBAL_CORRECTIVE, PROBABILISTIC_GLOBAL_CORRECTIVE,
    /// PATCH_BASED_CORRECTIVE).
    #[arg(long, default_value = "GLOBAL_CORRECTIVE")]
    strategy: String,

    /// Interaction probability for the probabilistic strategy.
    #[arg(long, default_value_t = 1.0)]
    probability: f64,

    /// Patch size for the patch-based strategy; defaults to half the
    /// phantom shape.
    #[arg(long, value_delimiter = ',')]
    patch_size: Option<Vec<usize>>,

    /// Gaussian sigma of the guidance signal.
    #[arg(long, default_value_t = ClickConfig::DEFAULT_SIGMA)]
    sigma: f32,

    /// Threshold guidance into filled disks.
    #[arg(long)]
    disks: bool,

    /// Clip applied before exponential weighting of sampling fields.
    #[arg(long, default_value_t = clicksim_engine::sampler::DEFAULT_OVERFLOW_THRESHOLD)]
    overflow_threshold: f64,

    /// Number of interaction rounds per run.
    #[arg(long, default_value_t = 5, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    rounds: usize,

    /// Radius (voxels) the toy model grows its prediction around each
    /// lesion click.
    #[arg(long, default_value_t = 4.0)]
    grow_radius: f64,

    /// Base random seed; run `i` uses `seed + i`.
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Sample identity used for replay lookup and record output.
    #[arg(long, default_value = "phantom.nii.gz")]
    sample_id: String,

    /// Directory of recorded clicks for `REPLAY_FROM_FILE`.
    #[arg(long)]
    replay_dir: Option<PathBuf>,

    /// Write the clicks of the first run into this directory.
    #[arg(long)]
    record_out: Option<PathBuf>,

    /// Number of runs for averaging.
    #[arg(long, default_value_t = 1, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    runs: usize,

    /// Output diagnostics as JSON instead of human-readable report.
    #[arg(long)]
    json: bool,

    /// Full click config as a JSON string.
    ///
    /// When provided, the strategy, probability, patch size, sigma,
    /// disks and overflow threshold flags are ignored. The JSON must be
    /// a valid `ClickConfig` serialization.
    #[arg(long)]
    config_json: Option<String>,

    /// Log filter for stderr logging (e.g. `warn`, `debug`,
    /// `clicksim_engine=trace`).
    #[arg(long, default_value = "warn")]
    log_level: String,
}

/// Build a [`ClickConfig`] from CLI arguments.
///
/// If `--config-json` is provided, the JSON is parsed directly and the
/// individual parameter flags are ignored. Either way the result is
/// validated.
fn config_from_cli(cli: &Cli) -> Result<ClickConfig, String> {
    let config = if let Some(ref json) = cli.config_json {
        serde_json::from_str(json).map_err(|e| format!("Error parsing --config-json: {e}"))?
    } else {
        let patch_size = cli
            .patch_size
            .clone()
            .unwrap_or_else(|| cli.shape.iter().map(|&n| (n / 2).max(1)).collect());
        let strategy = ClickStrategy::from_name(&cli.strategy, cli.probability, &patch_size)
            .map_err(|e| e.to_string())?;
        ClickConfig {
            strategy,
            sigma: cli.sigma,
            disks: cli.disks,
            overflow_threshold: cli.overflow_threshold,
        }
    };
    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let _logger = match flexi_logger::Logger::try_with_str(&cli.log_level)
        .and_then(|logger| logger.log_to_stderr().start())
    {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Error initializing logging with `{}`: {e}", cli.log_level);
            return ExitCode::FAILURE;
        }
    };

    if !(2..=3).contains(&cli.shape.len()) || cli.shape.contains(&0) {
        eprintln!(
            "--shape must have 2 or 3 non-zero extents, got {:?}",
            cli.shape
        );
        return ExitCode::FAILURE;
    }

    let config = match config_from_cli(&cli) {
        Ok(c) => c,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };

    eprintln!("Phantom: {:?}", cli.shape);
    eprintln!("Config: {config:#?}");
    eprintln!("Rounds: {}  |  Runs: {}", cli.rounds, cli.runs);
    eprintln!();

    let mut all_diagnostics = Vec::with_capacity(cli.runs);

    for run in 0..cli.runs {
        if cli.runs > 1 {
            eprintln!("--- Run {}/{} ---", run + 1, cli.runs);
        }

        let seed = cli.seed.wrapping_add(run as u64);
        match simulate(&cli, &config, seed) {
            Ok((diagnostics, record)) => {
                if cli.json {
                    match serde_json::to_string_pretty(&diagnostics) {
                        Ok(json) => println!("{json}"),
                        Err(e) => {
                            eprintln!("Error serializing diagnostics: {e}");
                            return ExitCode::FAILURE;
                        }
                    }
                } else {
                    println!("{}", diagnostics.report());
                }

                // Record clicks from the first run only.
                if run == 0
                    && let Some(ref dir) = cli.record_out
                {
                    match ReplayDir::new(dir).write(&cli.sample_id, &record) {
                        Ok(path) => eprintln!("Clicks written to {}", path.display()),
                        Err(e) => eprintln!("Error writing clicks: {e}"),
                    }
                }

                all_diagnostics.push(diagnostics);
            }
            Err(e) => {
                eprintln!("Simulation error: {e}");
                return ExitCode::FAILURE;
            }
        }

        if cli.runs > 1 {
            eprintln!();
        }
    }

    if cli.runs > 1 {
        print_multi_run_summary(&all_diagnostics);
    }

    ExitCode::SUCCESS
}

/// Run all rounds of one simulated interaction.
fn simulate(
    cli: &Cli,
    config: &ClickConfig,
    seed: u64,
) -> Result<(InteractionDiagnostics, ClickRecord), ClickError> {
    let labels = LabelMap::from_names(["background", "lesion"])?;
    let label = sphere_phantom(&cli.shape);
    let image = label.mapv(|v| 0.7f32.mul_add(v, 0.1));
    let mut prediction = ArrayD::<f32>::zeros(label.raw_dim());

    let mut engine = ClickEngine::new();
    if let Some(ref dir) = cli.replay_dir {
        engine = engine.with_record_source(Box::new(ReplayDir::new(dir)));
    }

    let mut session = ClickSession::new(cli.shape.len());
    let mut rng = StdRng::seed_from_u64(seed);
    let mut diagnostics = InteractionDiagnostics::new(cli.sample_id.clone());

    for round in 0..cli.rounds {
        let start = Instant::now();
        let (report, input) = {
            let sample = Sample::new(&cli.sample_id, label.view(), prediction.view(), &labels);
            clicksim_engine::interact(&engine, config, &sample, image.view(), &mut session, &mut rng)?
        };
        let elapsed = start.elapsed();
        debug!("round {round}: model input {:?}", input.shape());

        diagnostics.push(RoundDiagnostics::collect(
            round,
            elapsed,
            &report,
            &session,
            label.view(),
            prediction.view(),
            &labels,
        )?);

        grow_prediction(&mut prediction, &label, &session, cli.grow_radius);
    }

    info!(
        "seed {seed}: {} clicks after {} rounds",
        session.total_clicks(),
        cli.rounds
    );
    Ok((diagnostics, ClickRecord::from_session(&session, &labels)))
}

/// Label volume `(1, ...shape)` with a centered ball of lesion (id 1)
/// whose radius is 30% of the smallest extent.
#[allow(clippy::cast_precision_loss)]
fn sphere_phantom(shape: &[usize]) -> ArrayD<f32> {
    let mut full = vec![1];
    full.extend_from_slice(shape);
    let radius = shape.iter().copied().min().unwrap_or(0) as f64 * 0.3;
    ArrayD::from_shape_fn(IxDyn(&full), |idx| {
        let d2: f64 = idx
            .slice()
            .iter()
            .skip(1)
            .zip(shape)
            .map(|(&i, &n)| {
                let d = i as f64 - (n as f64 - 1.0) / 2.0;
                d * d
            })
            .sum();
        if d2 <= radius * radius { 1.0 } else { 0.0 }
    })
}

/// Mark every lesion voxel within `radius` of a lesion click as
/// predicted.
#[allow(clippy::cast_precision_loss)]
fn grow_prediction(prediction: &mut ArrayD<f32>, label: &ArrayD<f32>, session: &ClickSession, radius: f64) {
    let spatial = session.spatial_dims();
    let clicks: Vec<&[i64]> = session
        .clicks("lesion")
        .coordinates()
        .iter()
        .filter_map(|c| c.spatial(spatial))
        .collect();
    if clicks.is_empty() {
        return;
    }
    let r2 = radius * radius;
    for (idx, p) in prediction.indexed_iter_mut() {
        if label[idx.slice()] < 0.5 {
            continue;
        }
        let voxel = idx.slice();
        let near = clicks.iter().any(|click| {
            let d2: f64 = voxel
                .iter()
                .skip(1)
                .zip(click.iter())
                .map(|(&i, &c)| {
                    let d = i as f64 - c as f64;
                    d * d
                })
                .sum();
            d2 <= r2
        });
        if near {
            *p = 1.0;
        }
    }
}

/// Print aggregated statistics across multiple runs.
#[allow(clippy::cast_precision_loss)]
fn print_multi_run_summary(all_diagnostics: &[InteractionDiagnostics]) {
    debug_assert!(!all_diagnostics.is_empty(), "no diagnostics to summarize");

    println!();
    println!(
        "Summary ({} runs)\n{}",
        all_diagnostics.len(),
        "=".repeat(60),
    );

    if all_diagnostics.is_empty() {
        println!("Warning: no diagnostics to summarize");
        return;
    }

    let durations: Vec<f64> = all_diagnostics
        .iter()
        .map(|d| d.total_duration().as_secs_f64() * 1000.0)
        .collect();
    let min = durations.iter().copied().reduce(f64::min).unwrap_or(0.0);
    let max = durations.iter().copied().reduce(f64::max).unwrap_or(0.0);
    let mean = durations.iter().sum::<f64>() / durations.len() as f64;
    println!("Total duration: min={min:.3}ms  mean={mean:.3}ms  max={max:.3}ms");

    let clicks = all_diagnostics.iter().map(InteractionDiagnostics::final_clicks).sum::<usize>() as f64
        / all_diagnostics.len() as f64;
    println!("Mean final clicks: {clicks:.2}");

    // Per-label mean Dice at the last round.
    println!();
    println!("{:<24} {:>12}", "Label", "Mean Dice");
    println!("{}", "-".repeat(40));

    let mut per_label: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for diag in all_diagnostics {
        if let Some(last) = diag.rounds.last() {
            for (name, label) in &last.labels {
                per_label.entry(name.as_str()).or_default().push(label.dice);
            }
        }
    }
    for (name, dice) in &per_label {
        let label_mean = dice.iter().sum::<f64>() / dice.len() as f64;
        println!("{name:<24} {label_mean:>12.4}");
    }
}
